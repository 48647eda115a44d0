//! The [`FileTree`] collaborator trait and its local-disk implementation.
//!
//! The sync engine never touches `std::fs` directly; everything goes through
//! this trait so tests can point the engine at a temporary tree and the
//! orchestrator can treat file I/O as a suspension point.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::error::{Error, Result};

/// Metadata snapshot for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Last modification time, normalized to UTC.
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub is_file: bool,
}

/// Read/write/stat operations the sync engine needs from a file tree.
#[async_trait]
pub trait FileTree: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<String>;

    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Set the last-modified time of an existing file.
    async fn set_modified(&self, path: &Path, instant: DateTime<Utc>) -> Result<()>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// List the names (not paths) of a directory's entries, sorted.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// [`FileTree`] backed by the local filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTree;

impl LocalTree {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileTree for LocalTree {
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        trace!(path = %path.display(), bytes = content.len(), "write");
        tokio::fs::write(path, content)
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn set_modified(&self, path: &Path, instant: DateTime<Utc>) -> Result<()> {
        // tokio::fs has no utimes equivalent; go through std on a blocking
        // thread. File::set_modified requires a writable handle.
        let target: SystemTime = instant.into();
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .open(&owned)
                .map_err(|e| Error::io(&owned, e))?;
            file.set_modified(target).map_err(|e| Error::io(&owned, e))
        })
        .await
        .map_err(|e| Error::TaskFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let modified = meta.modified().map_err(|e| Error::io(path, e))?;
        Ok(FileStat {
            modified: DateTime::<Utc>::from(modified),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        })
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| Error::io(path, e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| Error::io(path, e))
    }
}

/// Convenience used by callers that track files relative to a root.
pub fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
