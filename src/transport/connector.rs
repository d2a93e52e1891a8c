//! BoringSSL TLS connector and the plain/TLS variant stream.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use boring::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio_boring::SslStream;

use crate::error::{Error, Result};

/// Stream variant over plain TCP or TLS-wrapped TCP.
///
/// A tagged variant rather than a trait object: the stream exclusively
/// owns its transport and read/write dispatch stays static.
pub enum MaybeTlsStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS-wrapped TCP.
    Tls(SslStream<TcpStream>),
}

impl MaybeTlsStream {
    /// Whether the transport carries a TLS session.
    pub fn is_tls(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }

    /// Shut the transport down, flushing TLS close-notify where
    /// applicable. Errors from an already-gone peer are ignored.
    pub async fn shutdown(&mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = AsyncWriteExt::shutdown(self).await;
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Dials TCP endpoints and performs TLS handshakes with programmatic
/// certificate-verification control.
#[derive(Debug, Clone)]
pub struct Connector {
    verify_certificate: bool,
    ca_file: Option<PathBuf>,
    ca_paths: Vec<PathBuf>,
}

impl Connector {
    /// Create a connector that verifies server certificates against the
    /// default trust roots.
    pub fn new() -> Self {
        Self {
            verify_certificate: true,
            ca_file: None,
            ca_paths: Vec::new(),
        }
    }

    /// Enable or disable server certificate verification.
    pub fn set_verify_certificate(&mut self, verify: bool) {
        self.verify_certificate = verify;
    }

    /// Load trusted certificates from a PEM file at handshake time.
    pub fn set_ca_file(&mut self, file: impl Into<PathBuf>) {
        self.ca_file = Some(file.into());
    }

    /// Add a directory whose PEM certificates are trusted.
    pub fn add_ca_path(&mut self, path: impl Into<PathBuf>) {
        self.ca_paths.push(path.into());
    }

    /// Resolve a host and port to socket addresses.
    pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|_| Error::HostNotFound(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::HostNotFound(host.to_string()));
        }
        Ok(addrs)
    }

    /// Resolve and connect a plain TCP stream.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
        let addrs = Self::resolve(host, port).await?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tracing::debug!(%addr, "connected");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(Error::Io)
            .unwrap_or_else(|| Error::HostNotFound(host.to_string())))
    }

    /// Perform a client TLS handshake over an established transport.
    ///
    /// `server_name` drives SNI and, when verification is on, hostname
    /// checking.
    pub async fn handshake(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<SslStream<TcpStream>> {
        let connector = self.configure_ssl()?;
        let mut config = connector
            .configure()
            .map_err(|e| Error::tls(format!("failed to configure SSL: {}", e)))?;
        if !self.verify_certificate {
            config.set_verify_hostname(false);
        }

        tracing::debug!(server_name, "starting TLS handshake");
        tokio_boring::connect(config, server_name, stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake failed: {}", e)))
    }

    fn configure_ssl(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {}", e)))?;

        if self.verify_certificate {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        if let Some(file) = &self.ca_file {
            builder
                .set_ca_file(file)
                .map_err(|e| Error::tls(format!("failed to load CA file: {}", e)))?;
        }
        for path in &self.ca_paths {
            for cert in load_pem_dir(path)? {
                builder
                    .cert_store_mut()
                    .add_cert(cert)
                    .map_err(|e| Error::tls(format!("failed to add CA certificate: {}", e)))?;
            }
        }

        Ok(builder.build())
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse every PEM certificate file in a directory.
fn load_pem_dir(path: &Path) -> Result<Vec<X509>> {
    let mut certs = Vec::new();
    let entries = std::fs::read_dir(path)
        .map_err(|e| Error::tls(format!("failed to read CA path {}: {}", path.display(), e)))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| Error::tls(format!("failed to read CA path {}: {}", path.display(), e)))?;
        let file = entry.path();
        let is_pem = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "pem" | "crt" | "cer"));
        if !is_pem {
            continue;
        }
        let data = std::fs::read(&file)
            .map_err(|e| Error::tls(format!("failed to read {}: {}", file.display(), e)))?;
        let cert = X509::from_pem(&data)
            .map_err(|e| Error::tls(format!("bad certificate {}: {}", file.display(), e)))?;
        certs.push(cert);
    }
    Ok(certs)
}
