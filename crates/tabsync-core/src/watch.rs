//! Bridges filesystem watch events onto the remote store.
//!
//! The watcher itself lives outside this crate; whatever produces events
//! translates them into [`WatchEvent`] values and sends them through a
//! `tokio::sync::mpsc` channel. The bridge resolves each path against the
//! ledger: a change pushes that file's single content field, an unlink
//! drops the ledger entry and persists. Failures are reported per event;
//! the loop never stops on them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use tabsync_fs::FileTree;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::naming::Template;
use crate::remote::{FIELD_SYS_ID, RemoteStore};
use crate::store::LedgerStore;

/// A filesystem observation, already classified by the watcher side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watcher finished its initial scan.
    Ready,
    /// A file appeared (initial scan or later).
    Add {
        path: PathBuf,
        modified: DateTime<Utc>,
    },
    /// A tracked file's content changed.
    Change {
        path: PathBuf,
        modified: DateTime<Utc>,
    },
    /// A file disappeared.
    Unlink { path: PathBuf },
}

/// What one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Initial scan complete.
    Ready,
    /// Baseline mtime recorded for a file.
    BaselineRecorded { path: PathBuf },
    /// A single content field was pushed to its record.
    Pushed {
        table: String,
        file_name: String,
        content_field: String,
    },
    /// A ledger entry was removed and the ledger persisted.
    EntryRemoved { table: String, file_name: String },
    /// The event matched nothing tracked; no state changed.
    Unchanged { path: PathBuf },
}

/// Applies watch events to the ledger and the remote store.
pub struct WatchBridge {
    remote: Arc<dyn RemoteStore>,
    tree: Arc<dyn FileTree>,
    ledger: Arc<Mutex<Ledger>>,
    store: LedgerStore,
    baselines: BTreeMap<PathBuf, DateTime<Utc>>,
}

impl WatchBridge {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        tree: Arc<dyn FileTree>,
        ledger: Arc<Mutex<Ledger>>,
        store: LedgerStore,
    ) -> Self {
        Self {
            remote,
            tree,
            ledger,
            store,
            baselines: BTreeMap::new(),
        }
    }

    /// Last pushed/observed mtime for a path, if one was recorded.
    pub fn baseline(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.baselines.get(path).copied()
    }

    /// Consume events until the sender side is dropped. Event failures are
    /// logged and the loop continues; in-flight updates are never rolled
    /// back.
    pub async fn run(&mut self, mut events: mpsc::Receiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            match self.handle_event(event).await {
                Ok(WatchOutcome::Pushed {
                    table,
                    file_name,
                    content_field,
                }) => info!(table, file_name, content_field, "pushed changed file"),
                Ok(WatchOutcome::EntryRemoved { table, file_name }) => {
                    info!(table, file_name, "removed entry for deleted file")
                }
                Ok(outcome) => debug!(?outcome, "watch event handled"),
                Err(err) => warn!(%err, "watch event failed"),
            }
        }
        debug!("watch channel closed");
    }

    /// Apply one event.
    pub async fn handle_event(&mut self, event: WatchEvent) -> Result<WatchOutcome> {
        match event {
            WatchEvent::Ready => Ok(WatchOutcome::Ready),
            WatchEvent::Add { path, modified } => {
                self.baselines.insert(path.clone(), modified);
                Ok(WatchOutcome::BaselineRecorded { path })
            }
            WatchEvent::Change { path, modified } => self.handle_change(path, modified).await,
            WatchEvent::Unlink { path } => self.handle_unlink(path).await,
        }
    }

    async fn handle_change(
        &mut self,
        path: PathBuf,
        modified: DateTime<Utc>,
    ) -> Result<WatchOutcome> {
        let (table, file_name, sys_id, content_field) = {
            let ledger = self.ledger.lock().await;
            let (table, file_name) = split_path(&ledger, &path)?;

            let entry = ledger
                .entries(&table)
                .iter()
                .find(|entry| entry.file_name == file_name)
                .ok_or_else(|| Error::WatchBindingNotFound {
                    table: table.clone(),
                    file_name: file_name.clone(),
                })?;

            let config = ledger.require_table_config(&table)?;
            let format = config.format_for(&table, &entry.content_field)?;
            let values = Template::parse(&format.file_name).field_values(&file_name)?;
            let sys_id = values
                .get(FIELD_SYS_ID)
                .cloned()
                .ok_or_else(|| Error::MissingField {
                    field: FIELD_SYS_ID.to_string(),
                })?;
            (table, file_name, sys_id, entry.content_field.clone())
        };

        let content = self.tree.read_to_string(&path).await?;
        let fields = BTreeMap::from([(content_field.clone(), content)]);
        let outcome = self.remote.update_record(&table, &sys_id, &fields).await?;
        if let Some(message) = outcome.error_message() {
            return Err(Error::RemoteUpdateFailed {
                table,
                sys_id,
                message,
            });
        }

        self.baselines.insert(path, modified);
        Ok(WatchOutcome::Pushed {
            table,
            file_name,
            content_field,
        })
    }

    async fn handle_unlink(&mut self, path: PathBuf) -> Result<WatchOutcome> {
        self.baselines.remove(&path);

        let ledger = &mut *self.ledger.lock().await;
        let (table, file_name) = split_path(ledger, &path)?;
        if ledger.remove_entry(&table, &file_name).is_none() {
            return Ok(WatchOutcome::Unchanged { path });
        }
        self.store.save(ledger)?;
        Ok(WatchOutcome::EntryRemoved { table, file_name })
    }
}

/// Resolve an absolute path to its `(table, file name)` pair under the
/// ledger root. Paths outside the root, or not of the `<root>/<table>/<file>`
/// shape, are `UnwatchedPath`.
fn split_path(ledger: &Ledger, path: &Path) -> Result<(String, String)> {
    let unwatched = || Error::UnwatchedPath {
        path: path.to_path_buf(),
    };

    let relative = path.strip_prefix(ledger.root()).map_err(|_| unwatched())?;
    let mut components = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned());

    let table = components.next().ok_or_else(unwatched)?;
    let file_name = components.next().ok_or_else(unwatched)?;
    if components.next().is_some() {
        return Err(unwatched());
    }
    Ok((table, file_name))
}
