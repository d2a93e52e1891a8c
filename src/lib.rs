//! # siphon
//!
//! Client-side HTTP/1.1 transport that reads like a socket.
//!
//! [`HttpStream::open`] takes a URL and performs everything the
//! exchange needs: DNS, an optional SOCKS4/SOCKS4a/SOCKS5 or HTTP
//! CONNECT proxy negotiation, an optional TLS handshake, request
//! formatting, response head parsing, and redirect following.
//! [`HttpStream::read_some`] then delivers the body as ordinary bytes,
//! transparently undoing chunked framing and gzip/deflate encoding.
//!
//! Every operation exists in an async and a blocking flavor; a stream
//! is bound to one tokio runtime handle at construction and the
//! blocking calls drive that handle from outside the runtime.
//!
//! ```no_run
//! use siphon::HttpStream;
//!
//! # async fn run() -> siphon::Result<()> {
//! let mut stream = HttpStream::new(tokio::runtime::Handle::current());
//! stream.open("http://example.com/").await?;
//! let mut buf = [0u8; 4096];
//! loop {
//!     match stream.read_some(&mut buf).await? {
//!         0 => break,
//!         n => print!("{}", String::from_utf8_lossy(&buf[..n])),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Core modules
mod body;
pub mod error;
pub mod options;
pub mod parser;
pub mod url;

// Proxy negotiation
pub mod proxy;

// Transport layer
pub mod transport;

// Engine and helpers
pub mod read_body;
pub mod storage;
pub mod stream;

// Re-exports for convenient access
pub use error::{Error, Result};
pub use options::{OptionMap, RequestOptions, ResponseOptions};
pub use proxy::{ProxyKind, ProxySettings};
pub use read_body::{read_body, read_body_blocking};
pub use storage::{download, FileStorage, Storage};
pub use stream::{HttpStream, DEFAULT_MAX_REDIRECTS};
pub use url::HttpUrl;

// Transport re-exports
pub use transport::connector::{Connector, MaybeTlsStream};
