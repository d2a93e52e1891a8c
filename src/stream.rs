//! The HTTP stream engine.
//!
//! An [`HttpStream`] looks like a socket: `open(url)` performs DNS, an
//! optional proxy negotiation, an optional TLS handshake, writes the
//! request, and parses the response head; `read_some` then delivers the
//! decoded body bytes. The async methods are the primary surface; the
//! `*_blocking` wrappers drive the bound runtime handle and must be
//! called from outside the runtime.
//!
//! A stream is bound to one reactor for its lifetime and is not safe
//! for concurrent use; `&mut self` on every operation enforces the
//! one-outstanding-operation rule at compile time.

use std::net::SocketAddr;
use std::path::Path;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;

use crate::body::BodyDecoder;
use crate::error::{Error, Result};
use crate::options::{keys, RequestOptions, ResponseOptions};
use crate::parser::{self, MAX_HEAD_SIZE};
use crate::proxy::{self, ProxyKind, ProxySettings, Socks4Target};
use crate::transport::{Connector, MaybeTlsStream};
use crate::url::HttpUrl;

/// Default redirect budget.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// A byte-oriented stream over one HTTP/1.1 request/response exchange.
pub struct HttpStream {
    handle: Handle,
    connector: Connector,
    transport: Option<MaybeTlsStream>,
    /// Shared head/body buffer: head parsing leaves the body prefix in
    /// place and the decoder drains it before touching the transport.
    buffer: BytesMut,
    decoder: BodyDecoder,
    request_opts: RequestOptions,
    response_opts: ResponseOptions,
    proxy: ProxySettings,
    url: Option<HttpUrl>,
    location: Option<String>,
    content_length: Option<u64>,
    content_type: Option<String>,
    keep_alive: bool,
    expect_continue: bool,
    max_redirects: usize,
    opened: bool,
}

impl HttpStream {
    /// Create a stream bound to the given reactor handle.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            connector: Connector::new(),
            transport: None,
            buffer: BytesMut::with_capacity(8 * 1024),
            decoder: BodyDecoder::new(),
            request_opts: RequestOptions::new(),
            response_opts: ResponseOptions::new(),
            proxy: ProxySettings::none(),
            url: None,
            location: None,
            content_length: None,
            content_type: None,
            keep_alive: false,
            expect_continue: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            opened: false,
        }
    }

    /// The reactor handle the stream is bound to.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Set the request options used by the next `open`/`request`.
    pub fn set_request_options(&mut self, options: RequestOptions) {
        self.request_opts = options;
    }

    /// The currently configured request options.
    pub fn request_options(&self) -> &RequestOptions {
        &self.request_opts
    }

    /// The parsed response head of the last request.
    pub fn response_options(&self) -> &ResponseOptions {
        &self.response_opts
    }

    /// The `Location` header of the last response, if any.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// The URL that was ultimately requested, after redirects.
    pub fn final_url(&self) -> Option<&str> {
        self.url.as_ref().map(HttpUrl::as_str)
    }

    /// The response `Content-Length`, if the server sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The response `Content-Type`, if the server sent one.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether the server agreed to keep the connection alive.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Wire-level body bytes consumed so far, before decompression.
    pub fn bytes_consumed(&self) -> u64 {
        self.decoder.bytes_consumed()
    }

    /// Set the redirect budget. Zero refuses to follow any redirect.
    pub fn set_max_redirects(&mut self, n: usize) {
        self.max_redirects = n;
    }

    /// Route subsequent opens through the given proxy.
    pub fn set_proxy(&mut self, settings: ProxySettings) {
        self.proxy = settings;
    }

    /// Enable or disable TLS server certificate verification.
    pub fn check_certificate(&mut self, check: bool) {
        self.connector.set_verify_certificate(check);
    }

    /// Add a directory of trusted PEM certificates.
    pub fn add_verify_path(&mut self, path: impl AsRef<Path>) {
        self.connector.add_ca_path(path.as_ref());
    }

    /// Load trusted certificates from a PEM file.
    pub fn load_verify_file(&mut self, file: impl AsRef<Path>) {
        self.connector.set_ca_file(file.as_ref());
    }

    /// Whether the stream currently owns a transport.
    pub fn is_open(&self) -> bool {
        self.opened && self.transport.is_some()
    }

    /// Open a URL: dial (optionally via proxy), handshake, send the
    /// request, parse the head, and follow redirects within budget.
    ///
    /// On success the stream is ready for `read_some`. A non-2xx final
    /// status is reported as [`Error::HttpStatus`] with the body still
    /// readable. [`Error::ContinueRequest`] reports an interim `100`
    /// when the caller opted into `Expect: 100-continue`; send the body
    /// with `write_some` and finish with `receive_response`.
    pub async fn open(&mut self, url: &str) -> Result<()> {
        let mut target = HttpUrl::parse(url)?;
        let mut redirects = 0usize;
        loop {
            match self.connect_and_send(&target).await {
                Ok(status) if (200..300).contains(&status) => return Ok(()),
                Ok(status) if is_redirect(status) && self.location.is_some() => {
                    let location = self.location.clone().unwrap_or_default();
                    if redirects >= self.max_redirects {
                        self.close().await;
                        return Err(Error::InvalidRedirect(format!(
                            "budget of {} exhausted at {}",
                            self.max_redirects, location
                        )));
                    }
                    redirects += 1;
                    tracing::debug!(status, location = %location, "following redirect");
                    let next = match target.redirect(&location) {
                        Ok(next) => next,
                        Err(e) => {
                            self.close().await;
                            return Err(e);
                        }
                    };
                    self.close().await;
                    target = next;
                }
                Ok(status) => return Err(Error::HttpStatus(status)),
                Err(e @ Error::ContinueRequest) => return Err(e),
                Err(e) => {
                    self.close().await;
                    return Err(e);
                }
            }
        }
    }

    /// Blocking [`open`](Self::open). Must be called from outside the
    /// runtime.
    pub fn open_blocking(&mut self, url: &str) -> Result<()> {
        let handle = self.handle.clone();
        handle.block_on(self.open(url))
    }

    /// Issue another request over the already-connected stream
    /// (keep-alive reuse). Redirects are not followed here.
    pub async fn request(&mut self, options: RequestOptions) -> Result<()> {
        if self.transport.is_none() {
            return Err(Error::OperationAborted);
        }
        let target = self.url.clone().ok_or(Error::OperationAborted)?;
        self.request_opts = options;
        self.reset_response_state();
        self.send_request_head(&target).await?;
        self.receive_response().await
    }

    /// Blocking [`request`](Self::request).
    pub fn request_blocking(&mut self, options: RequestOptions) -> Result<()> {
        let handle = self.handle.clone();
        handle.block_on(self.request(options))
    }

    /// Read and parse a response head from the open transport.
    ///
    /// Callers normally never need this: `open` and `request` call it.
    /// After a [`Error::ContinueRequest`], call it to read the final
    /// head once the body has been written.
    pub async fn receive_response(&mut self) -> Result<()> {
        let status = self.receive_head().await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(Error::HttpStatus(status))
        }
    }

    /// Blocking [`receive_response`](Self::receive_response).
    pub fn receive_response_blocking(&mut self) -> Result<()> {
        let handle = self.handle.clone();
        handle.block_on(self.receive_response())
    }

    /// Deliver decoded body bytes into `out`. `Ok(0)` means the body is
    /// complete; a premature close surfaces as an error.
    pub async fn read_some(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(Error::OperationAborted);
        }
        let Self {
            transport,
            buffer,
            decoder,
            ..
        } = self;
        let transport = transport.as_mut().ok_or(Error::OperationAborted)?;
        decoder.read(transport, buffer, out).await
    }

    /// Blocking [`read_some`](Self::read_some).
    pub fn read_some_blocking(&mut self, out: &mut [u8]) -> Result<usize> {
        let handle = self.handle.clone();
        handle.block_on(self.read_some(out))
    }

    /// Write raw bytes to the transport. Used to send a request body
    /// after a `100 Continue`.
    pub async fn write_some(&mut self, data: &[u8]) -> Result<usize> {
        let transport = self.transport.as_mut().ok_or(Error::OperationAborted)?;
        let n = transport.write(data).await?;
        transport.flush().await?;
        Ok(n)
    }

    /// Blocking [`write_some`](Self::write_some).
    pub fn write_some_blocking(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.handle.clone();
        handle.block_on(self.write_some(data))
    }

    /// Shut the transport down and mark the stream closed. Subsequent
    /// operations report [`Error::OperationAborted`].
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.opened = false;
    }

    /// Blocking [`close`](Self::close).
    pub fn close_blocking(&mut self) {
        let handle = self.handle.clone();
        handle.block_on(self.close());
    }

    /// Reset buffers and response state so the stream can be reused for
    /// a new URL. Does not touch the transport or the request options.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_response_state();
    }

    fn reset_response_state(&mut self) {
        self.buffer.clear();
        self.response_opts.clear();
        self.decoder = BodyDecoder::new();
        self.location = None;
        self.content_length = None;
        self.content_type = None;
        self.keep_alive = false;
        self.expect_continue = false;
    }

    /// Dial, negotiate, send the request head, and parse the response
    /// head. Returns the final status code.
    async fn connect_and_send(&mut self, target: &HttpUrl) -> Result<u16> {
        self.reset_response_state();
        let transport = self.dial(target).await?;
        self.transport = Some(transport);
        self.opened = true;
        self.url = Some(target.clone());
        self.send_request_head(target).await?;
        self.receive_head().await
    }

    /// Establish the transport: direct, or through the configured
    /// proxy, plus the TLS handshake for https targets.
    async fn dial(&mut self, target: &HttpUrl) -> Result<MaybeTlsStream> {
        let tcp = match self.proxy.kind {
            ProxyKind::None => Connector::connect_tcp(target.host(), target.port()).await?,
            ProxyKind::HttpPassThrough => {
                Connector::connect_tcp(&self.proxy.hostname, self.proxy.port).await?
            }
            ProxyKind::HttpsTunnel => {
                let mut tcp =
                    Connector::connect_tcp(&self.proxy.hostname, self.proxy.port).await?;
                proxy::http_connect_tunnel(&mut tcp, target.host(), target.port()).await?;
                tcp
            }
            ProxyKind::Socks4 => {
                let mut tcp =
                    Connector::connect_tcp(&self.proxy.hostname, self.proxy.port).await?;
                let v4 = Connector::resolve(target.host(), target.port())
                    .await?
                    .into_iter()
                    .find_map(|addr| match addr {
                        SocketAddr::V4(v4) => Some(*v4.ip()),
                        SocketAddr::V6(_) => None,
                    })
                    .ok_or_else(|| {
                        Error::HostNotFound(format!("no IPv4 address for {}", target.host()))
                    })?;
                proxy::socks4_handshake(
                    &mut tcp,
                    self.proxy.username.as_deref(),
                    Socks4Target::Ip(v4, target.port()),
                )
                .await?;
                tcp
            }
            ProxyKind::Socks4a => {
                let mut tcp =
                    Connector::connect_tcp(&self.proxy.hostname, self.proxy.port).await?;
                proxy::socks4_handshake(
                    &mut tcp,
                    self.proxy.username.as_deref(),
                    Socks4Target::Domain(target.host(), target.port()),
                )
                .await?;
                tcp
            }
            ProxyKind::Socks5 => {
                let mut tcp =
                    Connector::connect_tcp(&self.proxy.hostname, self.proxy.port).await?;
                proxy::socks5_handshake(
                    &mut tcp,
                    self.proxy.username.as_deref(),
                    self.proxy.password.as_deref(),
                    target.host(),
                    target.port(),
                )
                .await?;
                tcp
            }
        };

        if target.is_tls() {
            let tls = self.connector.handshake(tcp, target.host()).await?;
            Ok(MaybeTlsStream::Tls(tls))
        } else {
            Ok(MaybeTlsStream::Plain(tcp))
        }
    }

    /// Format and write the request head, plus the inline body unless
    /// an `Expect: 100-continue` withholds it.
    async fn send_request_head(&mut self, target: &HttpUrl) -> Result<()> {
        let (request, expect) = self.build_request(target);
        self.expect_continue = expect;
        let transport = self.transport.as_mut().ok_or(Error::OperationAborted)?;
        transport.write_all(&request).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Build the request bytes from the options.
    ///
    /// Layout: request line, `Host`, `Accept`, user headers in
    /// insertion order, `Connection` last, blank line, inline body.
    fn build_request(&self, target: &HttpUrl) -> (Vec<u8>, bool) {
        let opts = &self.request_opts;
        let expect = opts.expects_continue();
        let mut head = String::with_capacity(512);

        head.push_str(opts.method());
        head.push(' ');
        match opts.find(keys::URL) {
            Some(explicit) => head.push_str(explicit),
            None if self.proxy.kind == ProxyKind::HttpPassThrough => {
                // Absolute-form target when talking through an HTTP
                // proxy without a tunnel.
                head.push_str(target.as_str());
            }
            None => head.push_str(&target.path_and_query()),
        }
        head.push(' ');
        head.push_str(opts.http_version());
        head.push_str("\r\n");

        head.push_str("Host: ");
        match opts.find("Host") {
            Some(host) => head.push_str(host),
            None => head.push_str(&target.host_header()),
        }
        head.push_str("\r\n");

        head.push_str("Accept: ");
        head.push_str(opts.find("Accept").unwrap_or("*/*"));
        head.push_str("\r\n");

        for (name, value) in opts.as_map().iter() {
            if name.starts_with('_')
                || name.eq_ignore_ascii_case("Host")
                || name.eq_ignore_ascii_case("Accept")
                || name.eq_ignore_ascii_case("Connection")
            {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        if let Some(body) = opts.body() {
            if opts.find("Content-Length").is_none() && opts.find("Transfer-Encoding").is_none() {
                head.push_str("Content-Length: ");
                head.push_str(&body.len().to_string());
                head.push_str("\r\n");
            }
        }

        head.push_str("Connection: ");
        head.push_str(opts.find("Connection").unwrap_or("close"));
        head.push_str("\r\n\r\n");

        let mut request = head.into_bytes();
        if !expect {
            if let Some(body) = opts.body() {
                request.extend_from_slice(body);
            }
        }
        (request, expect)
    }

    /// Read and parse a response head; configures the body decoder and
    /// returns the status code.
    async fn receive_head(&mut self) -> Result<u16> {
        // Status line first; any parse failure returns before the
        // header block is touched.
        let line_end = self.read_until_crlf().await?;
        let status = parser::parse_status_line(&self.buffer[..line_end])?;
        self.buffer.advance(line_end + 2);
        self.response_opts
            .replace(keys::STATUS_CODE, status.status.to_string());

        if status.status == 100 {
            // Consume the interim head; its headers carry nothing we
            // act on.
            let end = self.read_header_block_end().await?;
            self.buffer.advance(end);
            return if self.expect_continue {
                self.expect_continue = false;
                Err(Error::ContinueRequest)
            } else {
                Err(Error::MalformedResponseHeaders)
            };
        }

        let end = self.read_header_block_end().await?;
        let fields = parser::parse_header_block(
            &self.buffer[..end - 2],
            status.version_minor,
            &mut self.response_opts,
        )?;
        self.buffer.advance(end);

        // Transfer-Encoding overrides Content-Length.
        self.content_length = if fields.chunked {
            None
        } else {
            fields.content_length
        };
        self.content_type = fields.content_type.clone();
        self.location = fields.location.clone();
        self.keep_alive = fields.keep_alive;

        let bodyless = self.request_opts.method().eq_ignore_ascii_case("HEAD")
            || matches!(status.status, 100..=199 | 204 | 304);
        if bodyless {
            self.decoder = BodyDecoder::new();
        } else {
            self.decoder.configure(&fields);
        }

        Ok(status.status)
    }

    /// Grow the buffer until it holds a CRLF; returns its offset.
    async fn read_until_crlf(&mut self) -> Result<usize> {
        loop {
            if let Some(pos) = parser::find_crlf(&self.buffer) {
                return Ok(pos);
            }
            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::MalformedStatusLine);
            }
            if self.fill().await? == 0 {
                return Err(Error::Eof);
            }
        }
    }

    /// Grow the buffer until it holds a complete header block; returns
    /// the offset one past the terminating blank line.
    async fn read_header_block_end(&mut self) -> Result<usize> {
        loop {
            // An immediate blank line means an empty block; checked
            // first so a terminator inside early body bytes cannot be
            // mistaken for the end of the head.
            if self.buffer.len() >= 2 && &self.buffer[..2] == b"\r\n" {
                return Ok(2);
            }
            if let Some(end) = parser::find_header_end(&self.buffer) {
                return Ok(end);
            }
            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::MalformedResponseHeaders);
            }
            if self.fill().await? == 0 {
                return Err(Error::MalformedResponseHeaders);
            }
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let transport = self.transport.as_mut().ok_or(Error::OperationAborted)?;
        let n = transport.read_buf(&mut self.buffer).await?;
        Ok(n)
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}
