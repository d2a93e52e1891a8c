//! Error types for the siphon crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening a URL or streaming its body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A redirect target was unusable or the redirect budget ran out.
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    /// DNS resolution produced no usable address.
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// IO error from the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection before the body was complete.
    #[error("unexpected end of stream")]
    Eof,

    /// The operation was cancelled by `close()`.
    #[error("operation aborted")]
    OperationAborted,

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// SOCKS5 server accepted none of the offered authentication methods.
    #[error("SOCKS5: no acceptable authentication method")]
    SocksNoAcceptableMethod,

    /// SOCKS5 username/password authentication was rejected.
    #[error("SOCKS5: authentication failed")]
    SocksAuthenticationError,

    /// SOCKS5 reply 0x01: general server failure.
    #[error("SOCKS5: general server failure")]
    SocksGeneralFailure,

    /// SOCKS5 reply 0x02: connection not allowed by ruleset.
    #[error("SOCKS5: connection not allowed by ruleset")]
    SocksConnectionNotAllowed,

    /// SOCKS5 reply 0x03: network unreachable.
    #[error("SOCKS5: network unreachable")]
    SocksNetworkUnreachable,

    /// SOCKS5 reply 0x04: host unreachable.
    #[error("SOCKS5: host unreachable")]
    SocksHostUnreachable,

    /// SOCKS5 reply 0x05: connection refused by destination.
    #[error("SOCKS5: connection refused")]
    SocksConnectionRefused,

    /// SOCKS5 reply 0x06: TTL expired.
    #[error("SOCKS5: TTL expired")]
    SocksTtlExpired,

    /// SOCKS5 reply 0x07: command not supported.
    #[error("SOCKS5: command not supported")]
    SocksCommandNotSupported,

    /// SOCKS5 reply 0x08: address type not supported.
    #[error("SOCKS5: address type not supported")]
    SocksAddressTypeNotSupported,

    /// SOCKS4 request rejected. `code` is the server reply code
    /// (0x5B rejected or failed, 0x5C/0x5D identd failures).
    #[error("SOCKS4: request rejected (code {code:#04x})")]
    SocksRequestRejected { code: u8 },

    /// An HTTP proxy answered CONNECT with a non-2xx status.
    #[error("HTTP proxy refused CONNECT with status {0}")]
    HttpProxyRefused(u16),

    /// The response status line did not parse.
    #[error("malformed status line")]
    MalformedStatusLine,

    /// The response header block did not parse.
    #[error("malformed response headers")]
    MalformedResponseHeaders,

    /// A chunk-size line or chunk terminator did not parse.
    #[error("malformed chunked encoding")]
    MalformedChunkedEncoding,

    /// The server answered `100 Continue` to a pending `Expect`.
    /// The caller may now send the request body and call
    /// `receive_response` for the final head.
    #[error("100 Continue received, send the request body")]
    ContinueRequest,

    /// A non-2xx, non-redirect final status. The body remains readable
    /// so callers can consume error payloads.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The inflater rejected the compressed body.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// The connection closed before `Content-Length` bytes arrived.
    #[error("content length mismatch: expected {expected}, got {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },
}

impl Error {
    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a decompression error.
    pub fn decompression(message: impl Into<String>) -> Self {
        Self::Decompression(message.into())
    }

    /// Create an invalid-URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }

    /// Map a SOCKS5 reply code to the matching error.
    ///
    /// Reply 0x00 is success and must not reach this function; unknown
    /// codes map to the general failure kind.
    pub(crate) fn from_socks5_reply(rep: u8) -> Self {
        match rep {
            0x02 => Self::SocksConnectionNotAllowed,
            0x03 => Self::SocksNetworkUnreachable,
            0x04 => Self::SocksHostUnreachable,
            0x05 => Self::SocksConnectionRefused,
            0x06 => Self::SocksTtlExpired,
            0x07 => Self::SocksCommandNotSupported,
            0x08 => Self::SocksAddressTypeNotSupported,
            _ => Self::SocksGeneralFailure,
        }
    }
}
