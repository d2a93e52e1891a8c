//! Status-line and header-block parsing for HTTP/1.x responses.
//!
//! Hand-rolled over raw bytes for control of the error taxonomy and of
//! the obsolete line-folding rules; the same parser serves the main
//! response path and the CONNECT tunnel reply.

use crate::error::{Error, Result};
use crate::options::{keys, ResponseOptions};

/// Parsed `HTTP/<major>.<minor> <code> <reason>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    pub version_major: u8,
    pub version_minor: u8,
    pub status: u16,
}

/// Fields the engine extracts from the response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadFields {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub content_encoding: Option<ContentEncoding>,
    pub location: Option<String>,
    pub keep_alive: bool,
}

/// Advertised body compression this crate can undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

/// Find the first CRLF in a buffer, returning its position.
pub(crate) fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Find the end of a header block (`\r\n\r\n`), returning the position
/// one past the terminator.
pub(crate) fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse a status line (without its trailing CRLF).
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine> {
    let line = std::str::from_utf8(line).map_err(|_| Error::MalformedStatusLine)?;

    let rest = line.strip_prefix("HTTP/").ok_or(Error::MalformedStatusLine)?;
    let mut chars = rest.bytes();
    let major = match chars.next() {
        Some(d @ b'0'..=b'9') => d - b'0',
        _ => return Err(Error::MalformedStatusLine),
    };
    if chars.next() != Some(b'.') {
        return Err(Error::MalformedStatusLine);
    }
    let minor = match chars.next() {
        Some(d @ b'0'..=b'9') => d - b'0',
        _ => return Err(Error::MalformedStatusLine),
    };
    if chars.next() != Some(b' ') {
        return Err(Error::MalformedStatusLine);
    }

    // Three status digits, then end of line or a space before the
    // reason phrase (which may be empty).
    let rest = &rest[4..];
    if rest.len() < 3 || !rest.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedStatusLine);
    }
    match rest.as_bytes().get(3) {
        None | Some(b' ') => {}
        Some(_) => return Err(Error::MalformedStatusLine),
    }
    let status: u16 = rest[..3].parse().map_err(|_| Error::MalformedStatusLine)?;

    Ok(StatusLine {
        version_major: major,
        version_minor: minor,
        status,
    })
}

/// Parse a header block into `opts`, extracting the fields the engine
/// acts on.
///
/// `block` is everything between the status line and the blank line;
/// a trailing empty line is tolerated. Obsolete folded continuations
/// (lines starting with SP/HT) are joined to the previous value with a
/// single space. `version_minor` decides the keep-alive default: HTTP/1.1
/// defaults to keep-alive, HTTP/1.0 to close.
pub fn parse_header_block(
    block: &[u8],
    version_minor: u8,
    opts: &mut ResponseOptions,
) -> Result<HeadFields> {
    let block = std::str::from_utf8(block).map_err(|_| Error::MalformedResponseHeaders)?;

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Obsolete folding: continuation of the previous value.
            let (_, value) = headers
                .last_mut()
                .ok_or(Error::MalformedResponseHeaders)?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(Error::MalformedResponseHeaders)?;
        if name.is_empty() {
            return Err(Error::MalformedResponseHeaders);
        }
        headers.push((name.to_string(), value.trim_start().to_string()));
    }

    let mut fields = HeadFields {
        keep_alive: version_minor != 0,
        ..Default::default()
    };

    for (name, value) in &headers {
        if name.eq_ignore_ascii_case("Content-Type") {
            fields.content_type = Some(value.clone());
        } else if name.eq_ignore_ascii_case("Content-Length") {
            let length: u64 = value
                .trim()
                .parse()
                .map_err(|_| Error::MalformedResponseHeaders)?;
            fields.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            if value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
            {
                fields.chunked = true;
            }
        } else if name.eq_ignore_ascii_case("Content-Encoding") {
            let token = value.trim();
            if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
                fields.content_encoding = Some(ContentEncoding::Gzip);
            } else if token.eq_ignore_ascii_case("deflate") {
                fields.content_encoding = Some(ContentEncoding::Deflate);
            }
        } else if name.eq_ignore_ascii_case("Location") {
            fields.location = Some(value.clone());
        } else if name.eq_ignore_ascii_case("Connection") {
            if value.trim().eq_ignore_ascii_case("keep-alive") {
                fields.keep_alive = true;
            } else if value.trim().eq_ignore_ascii_case("close") {
                fields.keep_alive = false;
            }
        }
    }

    for (name, value) in headers {
        opts.insert(name, value);
    }

    Ok(fields)
}

/// Read a full response head from `stream`, status line included.
///
/// Used by the CONNECT negotiator, which parses the proxy reply with the
/// exact same rules as a normal response head.
pub(crate) async fn read_head<S>(stream: &mut S) -> Result<(StatusLine, ResponseOptions)>
where
    S: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        if buffer.len() > MAX_HEAD_SIZE {
            return Err(Error::MalformedResponseHeaders);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Eof);
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let line_end = find_crlf(&buffer).ok_or(Error::MalformedStatusLine)?;
    let status = parse_status_line(&buffer[..line_end])?;
    let mut opts = ResponseOptions::new();
    opts.insert(keys::STATUS_CODE, status.status.to_string());
    parse_header_block(
        &buffer[line_end + 2..head_end - 2],
        status.version_minor,
        &mut opts,
    )?;
    Ok((status, opts))
}

/// Upper bound on a response head before the parse is rejected.
pub(crate) const MAX_HEAD_SIZE: usize = 64 * 1024;
