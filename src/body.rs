//! Body decoding: identity and chunked framing, with optional
//! gzip/deflate inflation.
//!
//! The decoder never copies received bytes into a parallel buffer: it
//! drains the stream's shared read buffer first (the body prefix left
//! behind by head parsing) and then pulls from the transport directly.

use bytes::{Buf, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::parser::{find_crlf, ContentEncoding, HeadFields};

/// Upper bound on a chunk-size line before the parse is rejected.
const MAX_CHUNK_LINE: usize = 16 * 1024;

/// Chunked transfer-decoding states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Expecting a `size[;ext]CRLF` line.
    AwaitSize,
    /// Delivering chunk payload bytes.
    ReadChunk { remaining: u64 },
    /// Expecting the CRLF that closes a chunk payload.
    AwaitTrailerCrlf,
    /// Consuming trailer lines after the zero-size chunk.
    AwaitTrailers,
    /// Body complete; further reads return 0.
    Done,
}

/// Wire framing of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Identity,
    Chunked,
}

/// De-frames the wire body (identity or chunked).
#[derive(Debug)]
struct Framer {
    framing: Framing,
    chunk_state: ChunkState,
    /// Some servers prefix the first chunk-size line with a stray CRLF.
    skip_crlf: bool,
    content_length: Option<u64>,
    delivered: u64,
    done: bool,
}

impl Framer {
    fn inert() -> Self {
        Self {
            framing: Framing::Identity,
            chunk_state: ChunkState::AwaitSize,
            skip_crlf: false,
            content_length: Some(0),
            delivered: 0,
            done: false,
        }
    }

    async fn read<S>(&mut self, stream: &mut S, buffer: &mut BytesMut, out: &mut [u8]) -> Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        match self.framing {
            Framing::Identity => self.read_identity(stream, buffer, out).await,
            Framing::Chunked => self.read_chunked(stream, buffer, out).await,
        }
    }

    async fn read_identity<S>(
        &mut self,
        stream: &mut S,
        buffer: &mut BytesMut,
        out: &mut [u8],
    ) -> Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        if self.done {
            return Ok(0);
        }
        match self.content_length {
            Some(length) => {
                let remaining = length - self.delivered;
                if remaining == 0 {
                    self.done = true;
                    return Ok(0);
                }
                if buffer.is_empty() && fill(stream, buffer).await? == 0 {
                    return Err(Error::ContentLengthMismatch {
                        expected: length,
                        actual: self.delivered,
                    });
                }
                let take = out.len().min(buffer.len()).min(remaining as usize);
                out[..take].copy_from_slice(&buffer[..take]);
                buffer.advance(take);
                self.delivered += take as u64;
                Ok(take)
            }
            None => {
                // Delimited by connection close.
                if buffer.is_empty() && fill(stream, buffer).await? == 0 {
                    self.done = true;
                    return Ok(0);
                }
                let take = out.len().min(buffer.len());
                out[..take].copy_from_slice(&buffer[..take]);
                buffer.advance(take);
                self.delivered += take as u64;
                Ok(take)
            }
        }
    }

    async fn read_chunked<S>(
        &mut self,
        stream: &mut S,
        buffer: &mut BytesMut,
        out: &mut [u8],
    ) -> Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            match self.chunk_state {
                ChunkState::AwaitSize => {
                    if self.skip_crlf {
                        while buffer.len() < 2 {
                            if fill(stream, buffer).await? == 0 {
                                return Err(Error::Eof);
                            }
                        }
                        if &buffer[..2] == b"\r\n" {
                            buffer.advance(2);
                        }
                        self.skip_crlf = false;
                    }
                    let line_end = loop {
                        if let Some(pos) = find_crlf(buffer) {
                            break pos;
                        }
                        if buffer.len() > MAX_CHUNK_LINE {
                            return Err(Error::MalformedChunkedEncoding);
                        }
                        if fill(stream, buffer).await? == 0 {
                            return Err(Error::Eof);
                        }
                    };
                    let size = parse_chunk_size(&buffer[..line_end])?;
                    buffer.advance(line_end + 2);
                    self.chunk_state = if size == 0 {
                        ChunkState::AwaitTrailers
                    } else {
                        ChunkState::ReadChunk { remaining: size }
                    };
                }
                ChunkState::ReadChunk { remaining } => {
                    if buffer.is_empty() && fill(stream, buffer).await? == 0 {
                        return Err(Error::Eof);
                    }
                    let take = out.len().min(buffer.len()).min(remaining as usize);
                    out[..take].copy_from_slice(&buffer[..take]);
                    buffer.advance(take);
                    self.delivered += take as u64;
                    let left = remaining - take as u64;
                    self.chunk_state = if left == 0 {
                        ChunkState::AwaitTrailerCrlf
                    } else {
                        ChunkState::ReadChunk { remaining: left }
                    };
                    return Ok(take);
                }
                ChunkState::AwaitTrailerCrlf => {
                    while buffer.len() < 2 {
                        if fill(stream, buffer).await? == 0 {
                            return Err(Error::Eof);
                        }
                    }
                    if &buffer[..2] != b"\r\n" {
                        return Err(Error::MalformedChunkedEncoding);
                    }
                    buffer.advance(2);
                    self.chunk_state = ChunkState::AwaitSize;
                }
                ChunkState::AwaitTrailers => {
                    // Zero or more trailer lines, terminated by an empty
                    // line. A close here counts as termination.
                    let pos = loop {
                        if let Some(pos) = find_crlf(buffer) {
                            break Some(pos);
                        }
                        if buffer.len() > MAX_CHUNK_LINE {
                            return Err(Error::MalformedChunkedEncoding);
                        }
                        if fill(stream, buffer).await? == 0 {
                            break None;
                        }
                    };
                    match pos {
                        Some(0) | None => {
                            if pos.is_some() {
                                buffer.advance(2);
                            }
                            self.chunk_state = ChunkState::Done;
                        }
                        Some(pos) => {
                            buffer.advance(pos + 2);
                        }
                    }
                }
                ChunkState::Done => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}

/// Parse the leading hex digits of a chunk-size line; anything after an
/// optional `;` extension marker is ignored.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let digits_end = line
        .iter()
        .position(|&b| !b.is_ascii_hexdigit())
        .unwrap_or(line.len());
    if digits_end == 0 {
        return Err(Error::MalformedChunkedEncoding);
    }
    let rest = line[digits_end..].iter().copied().find(|&b| b != b' ');
    if !matches!(rest, None | Some(b';')) {
        return Err(Error::MalformedChunkedEncoding);
    }
    let digits =
        std::str::from_utf8(&line[..digits_end]).map_err(|_| Error::MalformedChunkedEncoding)?;
    u64::from_str_radix(digits, 16).map_err(|_| Error::MalformedChunkedEncoding)
}

/// Streaming inflater over the framed body bytes.
struct Inflater {
    /// Constructed lazily for `deflate`, which needs the first two
    /// bytes to tell a zlib wrapper from a raw stream.
    z: Option<Decompress>,
    pending: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl Inflater {
    fn gzip() -> Self {
        Self {
            z: Some(Decompress::new_gzip(15)),
            pending: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn deflate() -> Self {
        Self {
            z: None,
            pending: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn has_pending(&self) -> bool {
        self.pos < self.pending.len()
    }

    fn push(&mut self, data: &[u8]) {
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
        self.pending.extend_from_slice(data);
    }

    /// Inflate pending input into `out`, returning bytes produced.
    fn inflate_into(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.z.is_none() {
            let available = &self.pending[self.pos..];
            if available.len() < 2 {
                return Ok(0);
            }
            // A zlib wrapper announces itself with CMF/FLG: deflate
            // method in the low CMF nibble and a 31-divisible check.
            let check = u16::from_be_bytes([available[0], available[1]]);
            let zlib = available[0] & 0x0F == 8 && check % 31 == 0;
            self.z = Some(Decompress::new(zlib));
        }
        let Some(z) = self.z.as_mut() else {
            return Ok(0);
        };

        let before_in = z.total_in();
        let before_out = z.total_out();
        let status = z
            .decompress(&self.pending[self.pos..], out, FlushDecompress::None)
            .map_err(|e| Error::decompression(e.to_string()))?;
        self.pos += (z.total_in() - before_in) as usize;
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
        if matches!(status, Status::StreamEnd) {
            self.finished = true;
        }
        Ok((z.total_out() - before_out) as usize)
    }
}

/// Decodes the response body into caller buffers.
pub(crate) struct BodyDecoder {
    framer: Framer,
    inflater: Option<Inflater>,
}

impl BodyDecoder {
    /// An inert decoder; every read reports end of body.
    pub(crate) fn new() -> Self {
        Self {
            framer: Framer::inert(),
            inflater: None,
        }
    }

    /// Arm the decoder for a freshly parsed response head.
    pub(crate) fn configure(&mut self, fields: &HeadFields) {
        self.framer = Framer {
            framing: if fields.chunked {
                Framing::Chunked
            } else {
                Framing::Identity
            },
            chunk_state: ChunkState::AwaitSize,
            skip_crlf: fields.chunked,
            content_length: if fields.chunked {
                None
            } else {
                fields.content_length
            },
            delivered: 0,
            done: false,
        };
        self.inflater = match fields.content_encoding {
            Some(ContentEncoding::Gzip) => Some(Inflater::gzip()),
            Some(ContentEncoding::Deflate) => Some(Inflater::deflate()),
            None => None,
        };
    }

    /// Framed (pre-inflate) body bytes consumed so far.
    pub(crate) fn bytes_consumed(&self) -> u64 {
        self.framer.delivered
    }

    /// Deliver decoded body bytes into `out`. `Ok(0)` is end of body.
    pub(crate) async fn read<S>(
        &mut self,
        stream: &mut S,
        buffer: &mut BytesMut,
        out: &mut [u8],
    ) -> Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        if out.is_empty() {
            return Ok(0);
        }
        let framer = &mut self.framer;
        let Some(inflater) = self.inflater.as_mut() else {
            return framer.read(stream, buffer, out).await;
        };

        let mut chunk = [0u8; 4096];
        loop {
            if inflater.finished {
                // The inflater has seen the end of stream; anything
                // left on the wire (gzip trailer, stray padding) is
                // consumed and dropped.
                loop {
                    if framer.read(stream, buffer, &mut chunk).await? == 0 {
                        return Ok(0);
                    }
                }
            }
            if inflater.has_pending() {
                let produced = inflater.inflate_into(out)?;
                if produced > 0 {
                    return Ok(produced);
                }
                if inflater.finished {
                    continue;
                }
            }
            let n = framer.read(stream, buffer, &mut chunk).await?;
            if n == 0 {
                return Err(Error::decompression("truncated compressed body"));
            }
            inflater.push(&chunk[..n]);
        }
    }
}

/// Append fresh transport bytes to the shared buffer. Returns 0 at EOF.
async fn fill<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    let n = stream.read_buf(buffer).await?;
    Ok(n)
}
