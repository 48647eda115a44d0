//! Error types for tabsync-fs

use std::path::PathBuf;

/// Result type for tabsync-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tabsync-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Blocking task failed for {}: {message}", path.display())]
    TaskFailed { path: PathBuf, message: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
