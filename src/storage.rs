//! Storage sinks for download helpers.
//!
//! A [`Storage`] persists fetched bytes at caller-chosen offsets;
//! [`FileStorage`] is the file-backed default. [`download`] drives an
//! [`HttpStream`] read loop into a sink.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::error::{Error, Result};
use crate::stream::HttpStream;

/// A random-access sink for fetched bytes.
pub trait Storage {
    /// Prepare the sink at the given path, creating it if needed.
    fn open(&mut self, path: &Path) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write `buf` at `offset`, returning the bytes written.
    fn write(
        &mut self,
        buf: &[u8],
        offset: u64,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Read into `buf` from `offset`, returning the bytes read.
    fn read(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Flush and release the sink.
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Whether the sink is ready for IO.
    fn is_open(&self) -> bool;
}

/// File-backed [`Storage`].
#[derive(Debug, Default)]
pub struct FileStorage {
    file: Option<File>,
}

impl FileStorage {
    /// Create a storage with no file attached yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for FileStorage {
    async fn open(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;
        self.file = Some(file);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::OperationAborted)?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::OperationAborted)?;
        file.seek(SeekFrom::Start(offset)).await?;
        let n = file.read(buf).await?;
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Fetch `url` through `stream` and persist the decoded body into
/// `storage` at `path`. Returns the number of bytes written.
pub async fn download<S: Storage>(
    stream: &mut HttpStream,
    url: &str,
    storage: &mut S,
    path: &Path,
) -> Result<u64> {
    stream.open(url).await?;
    storage.open(path).await?;

    let mut buf = [0u8; 8 * 1024];
    let mut offset = 0u64;
    loop {
        let n = match stream.read_some(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(Error::Eof) if stream.content_length().is_none() => break,
            Err(e) => {
                storage.close().await?;
                return Err(e);
            }
        };
        storage.write(&buf[..n], offset).await?;
        offset += n as u64;
    }
    storage.close().await?;
    tracing::debug!(url, bytes = offset, "download complete");
    Ok(offset)
}
