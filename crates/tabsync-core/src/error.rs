//! Error types for tabsync-core
//!
//! Every failure kind the engine can surface carries enough structured data
//! (table, field, identifier, file name) to render a precise message.
//! Record-level and table-level failures are isolated by the orchestrator;
//! nothing here aborts sibling work on its own.

use std::path::PathBuf;

/// Result type for tabsync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tabsync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("field `{field}` value {value:?} contains a path separator")]
    InvalidFieldValue { field: String, value: String },

    #[error("template placeholder `{field}` has no value in the record")]
    MissingField { field: String },

    #[error("file name {file_name:?} does not match template {template:?}")]
    TemplateMismatch { file_name: String, template: String },

    #[error("table `{table}` has no format with content field `{content_field}`")]
    ConfigNotFound {
        table: String,
        content_field: String,
    },

    #[error("table `{table}` is not configured")]
    TableNotConfigured { table: String },

    #[error("no local files found for table `{table}`")]
    NoLocalFiles { table: String },

    #[error("remote records for table `{table}` do not exist")]
    RemoteRecordNotFound { table: String },

    #[error("remote update failed for {table}/{sys_id}: {message}")]
    RemoteUpdateFailed {
        table: String,
        sys_id: String,
        message: String,
    },

    #[error("no ledger entry matches {table}/{file_name}")]
    WatchBindingNotFound { table: String, file_name: String },

    #[error("path {} is outside the watched tree", path.display())]
    UnwatchedPath { path: PathBuf },

    #[error("invalid remote timestamp {value:?}")]
    InvalidTimestamp { value: String },

    #[error("failed to load {}: {message}", path.display())]
    StoreLoad { path: PathBuf, message: String },

    #[error("failed to save {}: {message}", path.display())]
    StoreSave { path: PathBuf, message: String },

    #[error("remote transport error: {message}")]
    Remote { message: String },

    #[error("background task failed: {message}")]
    TaskFailed { message: String },

    #[error(transparent)]
    Fs(#[from] tabsync_fs::Error),
}
