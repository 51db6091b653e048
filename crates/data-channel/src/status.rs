//! Shared progress handle for an upload.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

/// Phase of an [`Uploader`](crate::Uploader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UploadState {
    Idle = 0,
    Connecting,
    SendingHeader,
    StreamingBody,
    Closed,
    Failed,
}

impl UploadState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::SendingHeader,
            3 => Self::StreamingBody,
            4 => Self::Closed,
            5 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Running totals of an upload, readable at any time (thread-safe).
///
/// Cloning yields another handle onto the same counters.
#[derive(Clone)]
pub struct TransferStatus {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    total: u64,
    sent: AtomicU64,
    state: AtomicU8,
}

impl TransferStatus {
    pub fn new(total: u64) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                total,
                sent: AtomicU64::new(0),
                state: AtomicU8::new(UploadState::Idle as u8),
            }),
        }
    }

    /// Bytes of file body written to the socket so far.
    pub fn sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Acquire)
    }

    /// Declared size of the file.
    pub fn total(&self) -> u64 {
        self.inner.total
    }

    pub fn state(&self) -> UploadState {
        UploadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: UploadState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Adds `n` sent bytes and returns the new total.
    pub(crate) fn add_sent(&self, n: u64) -> u64 {
        let sent = self.inner.sent.fetch_add(n, Ordering::AcqRel) + n;
        debug_assert!(sent <= self.inner.total);
        sent
    }
}

impl fmt::Debug for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferStatus")
            .field("sent", &self.sent())
            .field("total", &self.total())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sent: {}/{} bytes", self.sent(), self.total())
    }
}
