//! TCP data channel for single-file uploads.
//!
//! A client opens one connection per file, sends a short text header naming
//! the file and its size, then streams the raw bytes. The receiving side runs
//! one [`Session`] per accepted connection and writes the body into a
//! [`Storage`] (normally a [`WorkDir`]).
//!
//! # Wire format
//!
//! See [`wire`] module for the header layout.

pub mod client;
pub mod error;
pub mod server;
pub mod session;
pub mod status;
pub mod storage;
pub mod wire;

pub use client::{ConnectedUpload, Uploader, UploaderConfig};
pub use error::TransferError;
pub use server::{Listener, SessionEvent};
pub use session::{ReceivedFile, Session, SessionConfig, SessionState};
pub use status::{TransferStatus, UploadState};
pub use storage::{Storage, StorageFuture, WorkDir, validate_file_name};
pub use wire::FileHeader;

use std::time::Duration;

/// Chunk size for file and socket transfers (4 KiB).
pub const CHUNK_SIZE: usize = 4096;

/// Upper bound on buffered header bytes before the terminator must appear.
pub const MAX_HEADER_LEN: usize = 4096;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout for a single socket read on the receiving side.
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
