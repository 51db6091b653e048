//! Upload listener (server side).
//!
//! Accepts connections and spawns one independent [`Session`] per
//! connection. Sessions never share state; the listener keeps accepting
//! while they run.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::error::TransferError;
use crate::session::{Session, SessionConfig};
use crate::storage::Storage;

/// Outcome of a session, reported to the listener's owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Completed {
        peer: SocketAddr,
        file_name: String,
        bytes: u64,
    },
    Failed {
        peer: SocketAddr,
        error: String,
    },
}

/// Accepts upload connections and writes them into a [`Storage`].
pub struct Listener<St> {
    listener: TcpListener,
    local_addr: SocketAddr,
    storage: Arc<St>,
    config: SessionConfig,
}

impl<St: Storage> Listener<St> {
    /// Binds the listening socket. A bind failure is returned to the caller.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        storage: St,
        config: SessionConfig,
    ) -> Result<Self, TransferError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "upload listener bound");

        Ok(Self {
            listener,
            local_addr,
            storage: Arc::new(storage),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// Each connection gets its own task and a child cancellation token.
    /// Accept errors are logged and accepting continues. Session outcomes
    /// are reported on `events` without blocking.
    pub async fn listen(
        self,
        cancel: CancellationToken,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<(), TransferError> {
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("upload listener shutting down");
                    break Ok(());
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            next_id += 1;
                            info!(%peer, session = next_id, "connection accepted");

                            let mut session = Session::new(
                                stream,
                                peer,
                                Arc::clone(&self.storage),
                                self.config.clone(),
                                cancel.child_token(),
                            );
                            let events = events.clone();
                            let span = info_span!("session", id = next_id, %peer);

                            tokio::spawn(
                                async move {
                                    let event = match session.start().await {
                                        Ok(received) => SessionEvent::Completed {
                                            peer,
                                            file_name: received.file_name,
                                            bytes: received.bytes,
                                        },
                                        Err(e) => SessionEvent::Failed {
                                            peer,
                                            error: e.to_string(),
                                        },
                                    };
                                    // Report progress (non-blocking).
                                    let _ = events.try_send(event);
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WorkDir;
    use tokio::io::AsyncWriteExt;

    async fn spawn_listener(
        dir: &std::path::Path,
    ) -> (SocketAddr, mpsc::Receiver<SessionEvent>, CancellationToken) {
        let listener = Listener::bind("127.0.0.1:0", WorkDir::new(dir), SessionConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let c = cancel.clone();
        tokio::spawn(async move { listener.listen(c, tx).await });
        (addr, rx, cancel)
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let first = Listener::bind(
            "127.0.0.1:0",
            WorkDir::new(dir.path()),
            SessionConfig::default(),
        )
        .await
        .unwrap();

        let second = Listener::bind(
            first.local_addr(),
            WorkDir::new(dir.path()),
            SessionConfig::default(),
        )
        .await;
        assert!(matches!(second, Err(TransferError::Io(_))));
    }

    #[tokio::test]
    async fn sessions_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, mut events, cancel) = spawn_listener(dir.path()).await;

        // The first connection stalls mid-body while the second completes.
        let mut stalled = tokio::net::TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"slow.bin\n100\n\nabc").await.unwrap();

        let mut quick = tokio::net::TcpStream::connect(addr).await.unwrap();
        quick.write_all(b"quick.bin\n4\n\ndone").await.unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Completed {
                file_name, bytes, ..
            } => {
                assert_eq!(file_name, "quick.bin");
                assert_eq!(bytes, 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(std::fs::read(dir.path().join("quick.bin")).unwrap(), b"done");

        // Dropping the stalled peer ends its session with a failure.
        drop(stalled);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Failed { .. }
        ));

        cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_header_keeps_listener_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, mut events, cancel) = spawn_listener(dir.path()).await;

        let mut bad = tokio::net::TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"bad.bin\nNaN\n\n").await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Failed { .. }
        ));
        assert!(!dir.path().join("bad.bin").exists());

        let mut good = tokio::net::TcpStream::connect(addr).await.unwrap();
        good.write_all(b"good.bin\n2\n\nok").await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Completed { .. }
        ));

        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_listener() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::bind(
            "127.0.0.1:0",
            WorkDir::new(dir.path()),
            SessionConfig::default(),
        )
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);

        cancel.cancel();
        assert!(listener.listen(cancel, tx).await.is_ok());
    }
}
