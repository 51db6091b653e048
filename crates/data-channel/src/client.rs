//! Upload client.
//!
//! Connects to a receiving server, sends the header, then streams the file
//! in fixed-size chunks until it is exhausted.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::TransferError;
use crate::status::{TransferStatus, UploadState};
use crate::wire::{FileHeader, write_header};
use crate::{CHUNK_SIZE, TCP_CONNECT_TIMEOUT};

/// Tunables for an [`Uploader`].
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Size of each file read / socket write.
    pub chunk_size: usize,
    /// Maximum time to establish the connection.
    pub connect_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            connect_timeout: TCP_CONNECT_TIMEOUT,
        }
    }
}

/// Uploads one file over one connection.
///
/// Built with [`open`](Self::open), consumed by [`run`](Self::run) or by
/// [`connect`](Self::connect) followed by [`ConnectedUpload::send`]. A failed
/// uploader cannot be retried; open a new one instead.
pub struct Uploader {
    target: String,
    addrs: Vec<SocketAddr>,
    source_path: PathBuf,
    file: tokio::fs::File,
    header: FileHeader,
    status: TransferStatus,
    config: UploaderConfig,
}

impl Uploader {
    /// Resolves `target` (`host:port`), opens `source_path` and prepares the
    /// header. Nothing is sent until [`run`](Self::run).
    pub async fn open(
        target: &str,
        source_path: impl AsRef<Path>,
        config: UploaderConfig,
    ) -> Result<Self, TransferError> {
        let source_path = source_path.as_ref().to_path_buf();

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target)
            .await
            .map_err(|source| TransferError::Connect {
                target: target.to_string(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TransferError::Connect {
                target: target.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            });
        }

        let file = tokio::fs::File::open(&source_path)
            .await
            .map_err(|source| TransferError::FileOpen {
                path: source_path.clone(),
                source,
            })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|source| TransferError::FileStat {
                path: source_path.clone(),
                source,
            })?
            .len();

        let file_name = base_name(&source_path)?;
        let header = FileHeader::new(file_name, file_size);
        trace!(header_len = header.encode().len(), "header prepared");

        Ok(Self {
            target: target.to_string(),
            addrs,
            source_path,
            file,
            header,
            status: TransferStatus::new(file_size),
            config,
        })
    }

    /// Returns a handle onto this upload's running totals.
    pub fn status(&self) -> TransferStatus {
        self.status.clone()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Connects, sends the header and streams the file.
    ///
    /// Returns the number of body bytes sent. Any failure leaves the status
    /// in [`UploadState::Failed`].
    pub async fn run(self, cancel: CancellationToken) -> Result<u64, TransferError> {
        let connected = self.connect(&cancel).await?;
        connected.send(&cancel).await
    }

    /// Establishes the connection without sending anything.
    ///
    /// An unreachable peer, a refused connection and a connect timeout all
    /// surface as [`TransferError::Connect`].
    pub async fn connect(
        self,
        cancel: &CancellationToken,
    ) -> Result<ConnectedUpload, TransferError> {
        self.status.set_state(UploadState::Connecting);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = connect_within(
                &self.target,
                self.config.connect_timeout,
                TcpStream::connect(&self.addrs[..]),
            ) => result,
        };

        match result {
            Ok(stream) => {
                info!(target = %self.target, "connected");
                Ok(ConnectedUpload {
                    uploader: self,
                    stream,
                })
            }
            Err(e) => {
                self.status.set_state(UploadState::Failed);
                Err(e)
            }
        }
    }
}

/// An [`Uploader`] whose connection is established.
pub struct ConnectedUpload {
    uploader: Uploader,
    stream: TcpStream,
}

impl ConnectedUpload {
    /// Returns a handle onto this upload's running totals.
    pub fn status(&self) -> TransferStatus {
        self.uploader.status.clone()
    }

    /// Sends the header and streams the file, then closes the write side.
    ///
    /// Returns the number of body bytes sent.
    pub async fn send(mut self, cancel: &CancellationToken) -> Result<u64, TransferError> {
        let status = self.status();
        match self.transfer(cancel).await {
            Ok(sent) => {
                status.set_state(UploadState::Closed);
                info!(file = %self.uploader.header.file_name, sent, "upload complete");
                Ok(sent)
            }
            Err(e) => {
                status.set_state(UploadState::Failed);
                Err(e)
            }
        }
    }

    async fn transfer(&mut self, cancel: &CancellationToken) -> Result<u64, TransferError> {
        let Self { uploader, stream } = self;

        uploader.status.set_state(UploadState::SendingHeader);
        write_header(stream, &uploader.header).await?;

        uploader.status.set_state(UploadState::StreamingBody);
        let total = uploader.header.file_size;
        let mut sent = 0u64;
        let mut buf = vec![0u8; uploader.config.chunk_size.max(1)];

        while sent < total {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            // Never send past the size announced in the header.
            let owed = usize::try_from(total - sent).unwrap_or(usize::MAX);
            let to_read = owed.min(buf.len());
            let n = uploader
                .file
                .read(&mut buf[..to_read])
                .await
                .map_err(TransferError::Read)?;
            if n == 0 {
                warn!(
                    path = %uploader.source_path.display(),
                    sent,
                    total,
                    "source file shrank; ending upload early"
                );
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                result = stream.write_all(&buf[..n]) => result.map_err(TransferError::Write)?,
            }
            sent = uploader.status.add_sent(n as u64);
            trace!(chunk = n, sent, total, "chunk sent");
        }

        if let Err(e) = stream.shutdown().await {
            debug!("shutdown after upload failed: {e}");
        }
        Ok(sent)
    }
}

/// Awaits `connecting` for at most `limit`; elapsing is a connect failure.
async fn connect_within<T, F>(
    target: &str,
    limit: Duration,
    connecting: F,
) -> Result<T, TransferError>
where
    F: Future<Output = io::Result<T>>,
{
    let source = match tokio::time::timeout(limit, connecting).await {
        Ok(Ok(stream)) => return Ok(stream),
        Ok(Err(e)) => e,
        Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
    };
    Err(TransferError::Connect {
        target: target.to_string(),
        source,
    })
}

/// Extracts the UTF-8 base name of `path` for the header.
fn base_name(path: &Path) -> Result<String, TransferError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;

    // The receiver splits header fields on whitespace.
    if name.chars().any(|c| c.is_ascii_whitespace()) {
        return Err(TransferError::InvalidFileName(format!(
            "whitespace not allowed: {name:?}"
        )));
    }
    Ok(name.to_string())
}
