//! Destination storage for received files.
//!
//! Sessions never touch the filesystem directly; they ask a [`Storage`] for
//! a writer. [`WorkDir`] is the disk-backed implementation rooted at an
//! explicit base path.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWrite;
use tracing::debug;

/// A boxed future returned by storage methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Creates destination writers for incoming files.
pub trait Storage: Send + Sync + 'static {
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Creates (or truncates) the destination for `file_name`.
    fn create<'a>(&'a self, file_name: &'a str) -> StorageFuture<'a, Self::Writer>;
}

/// Writes received files into a fixed directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    base_path: PathBuf,
}

impl WorkDir {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl Storage for WorkDir {
    type Writer = tokio::fs::File;

    fn create<'a>(&'a self, file_name: &'a str) -> StorageFuture<'a, Self::Writer> {
        Box::pin(async move {
            validate_file_name(file_name)
                .map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;

            let path = self.base_path.join(file_name);
            debug!(path = %path.display(), "creating destination file");
            tokio::fs::File::create(&path).await
        })
    }
}

/// Checks that `name` is a bare file name (no directories, no traversal).
pub fn validate_file_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty file name".into());
    }

    if name.contains(['/', '\\']) {
        return Err(format!("path separators not allowed: {name}"));
    }

    // `C:name` is drive-relative on Windows; elsewhere `:` is an ordinary byte.
    if cfg!(windows) && name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(format!("drive prefix not allowed: {name}"));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("not a plain file name: {name}")),
    }
}
