//! Persistence for the two configuration documents.
//!
//! The sync document holds the [`Ledger`] (table formats, root path,
//! tracked entries); the auth document holds the remote endpoint and
//! credential material. They are loaded independently, and absence of
//! either is a recoverable condition, not a failure.
//!
//! Saves are atomic: serialize, write to a temp file next to the target,
//! rename over it while holding an exclusive advisory lock.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::Ledger;

/// Default sync document name.
pub const SYNC_FILE_NAME: &str = ".tabsync.yml";

/// Default auth document name.
pub const AUTH_FILE_NAME: &str = ".tabsync-auth.yml";

/// Remote endpoint and credential material, kept out of the sync document
/// so the latter can be committed to version control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Remote instance base URL.
    pub url: String,
    /// Authentication scheme, e.g. `Basic`.
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Credential material for the scheme.
    pub key: String,
}

impl AuthConfig {
    /// Basic-auth config from a username/password pair.
    pub fn basic(
        url: impl Into<String>,
        username: &str,
        password: &str,
    ) -> Self {
        Self {
            url: url.into(),
            auth_type: "Basic".to_string(),
            key: BASE64.encode(format!("{username}:{password}")),
        }
    }
}

/// Loads and saves the sync and auth documents as YAML.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    sync_path: PathBuf,
    auth_path: PathBuf,
}

impl LedgerStore {
    /// Store rooted in a directory, using the default document names.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            sync_path: dir.join(SYNC_FILE_NAME),
            auth_path: dir.join(AUTH_FILE_NAME),
        }
    }

    pub fn with_paths(sync_path: impl Into<PathBuf>, auth_path: impl Into<PathBuf>) -> Self {
        Self {
            sync_path: sync_path.into(),
            auth_path: auth_path.into(),
        }
    }

    pub fn sync_path(&self) -> &Path {
        &self.sync_path
    }

    pub fn auth_path(&self) -> &Path {
        &self.auth_path
    }

    /// Load the sync document. `Ok(None)` when it does not exist.
    pub fn load(&self) -> Result<Option<Ledger>> {
        load_doc(&self.sync_path)
    }

    /// Save the sync document.
    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        save_doc(&self.sync_path, ledger)
    }

    /// Load the auth document. `Ok(None)` when it does not exist.
    pub fn load_auth(&self) -> Result<Option<AuthConfig>> {
        load_doc(&self.auth_path)
    }

    /// Save the auth document.
    pub fn save_auth(&self, auth: &AuthConfig) -> Result<()> {
        save_doc(&self.auth_path, auth)
    }
}

fn load_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::StoreLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|e| Error::StoreLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn save_doc<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_yaml::to_string(value).map_err(|e| Error::StoreSave {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let store_save = |e: std::io::Error| Error::StoreSave {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    // Lock the target, write a sibling temp file, rename over it.
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(store_save)?;
    lock_file.lock_exclusive().map_err(store_save)?;

    let temp_path = path.with_extension("yml.tmp");
    fs::write(&temp_path, &content).map_err(store_save)?;
    fs::rename(&temp_path, path).map_err(store_save)?;

    debug!(path = %path.display(), "saved document");
    // Lock released when lock_file is dropped
    Ok(())
}
