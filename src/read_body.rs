//! Convenience helper: open a URL and read the whole body into one
//! buffer.

use crate::error::{Error, Result};
use crate::stream::HttpStream;

/// Open `url` on `stream` and read body bytes into `buf` until the
/// buffer is full, `Content-Length` bytes have been delivered, or the
/// body ends. Returns the number of bytes read.
///
/// A connection close with no advertised `Content-Length` is a normal
/// end of body, not an error. Responses larger than `buf` are
/// truncated to the buffer; the remainder stays readable via
/// `read_some`.
pub async fn read_body(stream: &mut HttpStream, url: &str, buf: &mut [u8]) -> Result<usize> {
    stream.open(url).await?;
    read_open_body(stream, buf).await
}

/// Blocking [`read_body`]. Must be called from outside the runtime.
pub fn read_body_blocking(stream: &mut HttpStream, url: &str, buf: &mut [u8]) -> Result<usize> {
    let handle = stream.handle().clone();
    handle.block_on(read_body(stream, url, buf))
}

/// Drain an already-open stream into `buf`.
pub(crate) async fn read_open_body(stream: &mut HttpStream, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        if let Some(length) = stream.content_length() {
            if total as u64 >= length {
                break;
            }
        }
        match stream.read_some(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(Error::Eof) if stream.content_length().is_none() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
