//! Error types for the data channel.

use std::io;
use std::path::PathBuf;

/// Errors produced by uploads and receiving sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat {}: {source}", path.display())]
    FileStat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("failed to create {name}: {source}")]
    FileCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("write error: {0}")]
    Write(#[source] io::Error),

    #[error("peer closed after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Returns the underlying I/O error kind, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Connect { source, .. }
            | Self::FileOpen { source, .. }
            | Self::FileStat { source, .. }
            | Self::FileCreate { source, .. } => Some(source.kind()),
            Self::Read(e) | Self::Write(e) | Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}
