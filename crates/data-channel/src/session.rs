//! Receiving session (server side).
//!
//! One session owns one accepted connection: it reads the header, creates
//! the destination through a [`Storage`], then streams the body to it until
//! the declared size is reached.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::TransferError;
use crate::storage::Storage;
use crate::wire::read_header;
use crate::{CHUNK_SIZE, MAX_HEADER_LEN, TCP_IDLE_TIMEOUT};

/// Tunables for receiving sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of each socket read.
    pub chunk_size: usize,
    /// Maximum wait for any single read (`None` waits forever).
    pub idle_timeout: Option<Duration>,
    /// Maximum header bytes buffered before the terminator must appear.
    pub max_header_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            idle_timeout: Some(TCP_IDLE_TIMEOUT),
            max_header_len: MAX_HEADER_LEN,
        }
    }
}

/// Phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeader,
    HeaderParsed,
    CreatingFile,
    ReceivingBody,
    Complete,
    Failed,
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_name: String,
    pub bytes: u64,
}

/// Server-side state for one connection and one file.
pub struct Session<S, St> {
    stream: S,
    peer: SocketAddr,
    storage: Arc<St>,
    config: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
}

impl<S, St> Session<S, St>
where
    S: AsyncRead + Unpin + Send,
    St: Storage,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        storage: Arc<St>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer,
            storage,
            config,
            cancel,
            state: SessionState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session to `Complete` or `Failed`.
    ///
    /// Failures are logged with the phase they occurred in. A partially
    /// written destination is left on disk as is.
    pub async fn start(&mut self) -> Result<ReceivedFile, TransferError> {
        match self.receive().await {
            Ok(received) => {
                self.transition(SessionState::Complete);
                info!(
                    peer = %self.peer,
                    file = %received.file_name,
                    bytes = received.bytes,
                    "file received"
                );
                Ok(received)
            }
            Err(e) => {
                let phase = self.state;
                self.transition(SessionState::Failed);
                error!(
                    peer = %self.peer,
                    ?phase,
                    kind = ?e.io_kind(),
                    "session abandoned: {e}"
                );
                Err(e)
            }
        }
    }

    async fn receive(&mut self) -> Result<ReceivedFile, TransferError> {
        let idle = self.config.idle_timeout;

        let (header, leftover) = {
            let stream = &mut self.stream;
            let max_len = self.config.max_header_len;
            guarded(&self.cancel, idle, read_header(stream, max_len)).await?
        };
        self.transition(SessionState::HeaderParsed);
        debug!(
            peer = %self.peer,
            file = %header.file_name,
            size = header.file_size,
            buffered = leftover.len(),
            "header parsed"
        );

        self.transition(SessionState::CreatingFile);
        let mut file = self
            .storage
            .create(&header.file_name)
            .await
            .map_err(|source| TransferError::FileCreate {
                name: header.file_name.clone(),
                source,
            })?;

        self.transition(SessionState::ReceivingBody);
        let body = self
            .receive_body(&mut file, header.file_size, &leftover)
            .await;
        // Flush either way so a partial file is fully on disk.
        let flushed = file.flush().await.map_err(TransferError::Write);
        let received = body?;
        flushed?;

        Ok(ReceivedFile {
            file_name: header.file_name,
            bytes: received,
        })
    }

    async fn receive_body<W: AsyncWrite + Unpin>(
        &mut self,
        file: &mut W,
        expected: u64,
        leftover: &[u8],
    ) -> Result<u64, TransferError> {
        let idle = self.config.idle_timeout;
        let mut received = write_clamped(file, leftover, expected, self.peer).await?;

        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        while received < expected {
            let n = {
                let stream = &mut self.stream;
                let buf = &mut buf;
                guarded(&self.cancel, idle, async move {
                    stream.read(buf).await.map_err(TransferError::Read)
                })
                .await?
            };
            if n == 0 {
                return Err(TransferError::Truncated { received, expected });
            }

            received += write_clamped(file, &buf[..n], expected - received, self.peer).await?;
            trace!(peer = %self.peer, received, expected, "chunk written");
        }

        Ok(received)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(peer = %self.peer, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

/// Writes at most `remaining` bytes of `data`; the rest is dropped.
async fn write_clamped<W: AsyncWrite + Unpin>(
    file: &mut W,
    data: &[u8],
    remaining: u64,
    peer: SocketAddr,
) -> Result<u64, TransferError> {
    let take = data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
    if take > 0 {
        file.write_all(&data[..take])
            .await
            .map_err(TransferError::Write)?;
    }
    if take < data.len() {
        warn!(
            %peer,
            discarded = data.len() - take,
            "discarding bytes past declared size"
        );
    }
    Ok(take as u64)
}

/// Runs `fut` under the session's cancellation token and idle timeout.
async fn guarded<T, F>(
    cancel: &CancellationToken,
    idle: Option<Duration>,
    fut: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    let bounded = async {
        match idle {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(TransferError::Timeout),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = bounded => result,
    }
}
