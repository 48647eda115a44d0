//! Per-record reconciliation.
//!
//! For one remote record and its locally bound files, [`Reconciler`]
//! computes a [`SyncPlan`] — which fields to push, which files to pull,
//! which files do not exist yet — and applies it. The decision per field:
//!
//! - file content equals the remote value: nothing to do;
//! - file modified at or after the remote update instant: the local file
//!   wins and the field is pushed (a timestamp tie favors the local copy);
//! - otherwise the remote wins and the file is rewritten;
//! - no file bound to the field: a file is created from the table's format.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tabsync_fs::FileTree;

use crate::error::{Error, Result};
use crate::ledger::{Ledger, LedgerEntry, TableConfig};
use crate::naming::Template;
use crate::remote::{FIELD_SYS_ID, FIELD_UPDATED_ON, RemoteRecord, RemoteStore};

/// A local file already bound to one field of the record being reconciled.
#[derive(Debug, Clone)]
pub struct Binding {
    pub content_field: String,
    pub modified: DateTime<Utc>,
}

/// Actions required to bring one record and its files into agreement.
/// Computed fresh per reconciliation pass and discarded after apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Fields whose local file content must be pushed to the remote.
    pub update_remote_fields: BTreeMap<String, String>,
    /// Local files that must be rewritten with the remote value.
    pub update_local_files: BTreeMap<PathBuf, String>,
    /// Fields with no local file yet.
    pub missing_file_fields: BTreeMap<String, String>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.update_remote_fields.is_empty()
            && self.update_local_files.is_empty()
            && self.missing_file_fields.is_empty()
    }
}

/// What happened to one record during a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub sys_id: String,
    /// Created files, relative to the ledger root.
    pub created_files: Vec<PathBuf>,
    /// Rewritten files, relative to the ledger root.
    pub updated_files: Vec<PathBuf>,
    /// Fields pushed to the remote.
    pub updated_remote_fields: Vec<String>,
}

impl RecordSummary {
    pub fn is_noop(&self) -> bool {
        self.created_files.is_empty()
            && self.updated_files.is_empty()
            && self.updated_remote_fields.is_empty()
    }
}

/// Computes and applies sync plans for single records.
#[derive(Clone)]
pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    tree: Arc<dyn FileTree>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        tree: Arc<dyn FileTree>,
        ledger: Arc<Mutex<Ledger>>,
    ) -> Self {
        Self {
            remote,
            tree,
            ledger,
        }
    }

    /// Decide push/pull/create per data field of `record`.
    ///
    /// `bound` maps existing local file paths to the field and mtime of the
    /// file, for files already bound to this record. Data fields are the
    /// record's fields minus naming fields, `sys_id` and `sys_updated_on`.
    pub async fn compute_sync_plan(
        &self,
        table: &str,
        record: &RemoteRecord,
        bound: &BTreeMap<PathBuf, Binding>,
    ) -> Result<SyncPlan> {
        let (_, config) = self.table_context(table).await?;
        let updated_on = record.updated_on()?;
        let skip = non_data_fields(&config);

        let mut plan = SyncPlan::default();
        for (field, value) in &record.fields {
            if skip.contains(field.as_str()) {
                continue;
            }

            let binding = bound
                .iter()
                .find(|(_, binding)| binding.content_field == *field);
            let Some((path, binding)) = binding else {
                plan.missing_file_fields
                    .insert(field.clone(), value.clone());
                continue;
            };

            let content = self.tree.read_to_string(path).await?;
            if &content == value {
                continue;
            }
            if binding.modified >= updated_on {
                plan.update_remote_fields.insert(field.clone(), content);
            } else {
                plan.update_local_files.insert(path.clone(), value.clone());
            }
        }

        Ok(plan)
    }

    /// Apply a plan: pull file rewrites, one batched remote update, and
    /// file creation (with ledger append) for fields with no file yet.
    pub async fn apply_sync_plan(
        &self,
        table: &str,
        record: &RemoteRecord,
        plan: SyncPlan,
    ) -> Result<RecordSummary> {
        let sys_id = record.require_sys_id()?;
        let (root, _) = self.table_context(table).await?;
        let mut summary = RecordSummary {
            sys_id: sys_id.to_string(),
            ..Default::default()
        };

        for (path, content) in &plan.update_local_files {
            self.tree
                .write(path, &normalize_newlines(content))
                .await?;
            summary
                .updated_files
                .push(tabsync_fs::relative_to(&root, path));
            debug!(table, sys_id, path = %path.display(), "updated local file");
        }

        if !plan.update_remote_fields.is_empty() {
            let mut fields = plan.update_remote_fields.clone();
            fields.remove(FIELD_SYS_ID);

            let outcome = self.remote.update_record(table, sys_id, &fields).await?;
            if let Some(message) = outcome.error_message() {
                return Err(Error::RemoteUpdateFailed {
                    table: table.to_string(),
                    sys_id: sys_id.to_string(),
                    message,
                });
            }
            summary.updated_remote_fields = fields.keys().cloned().collect();
            info!(
                table,
                sys_id,
                fields = ?summary.updated_remote_fields,
                "updated remote record"
            );
        }

        if !plan.missing_file_fields.is_empty() {
            let wanted: BTreeSet<String> = plan.missing_file_fields.keys().cloned().collect();
            summary.created_files = self
                .write_files_for_record(table, record, Some(&wanted))
                .await?;
        }

        Ok(summary)
    }

    /// Compute and apply in one step.
    pub async fn sync_record(
        &self,
        table: &str,
        record: &RemoteRecord,
        bound: &BTreeMap<PathBuf, Binding>,
    ) -> Result<RecordSummary> {
        let plan = self.compute_sync_plan(table, record, bound).await?;
        self.apply_sync_plan(table, record, plan).await
    }

    /// Write the record's files from its table formats, stamping each with
    /// the remote update instant and binding it in the ledger (existing
    /// bindings are left alone). `only_fields` restricts which formats are
    /// materialized; `None` writes every format the record has data for.
    ///
    /// Returns created paths relative to the ledger root. The caller owns
    /// persisting the ledger.
    pub(crate) async fn write_files_for_record(
        &self,
        table: &str,
        record: &RemoteRecord,
        only_fields: Option<&BTreeSet<String>>,
    ) -> Result<Vec<PathBuf>> {
        let (root, config) = self.table_context(table).await?;
        let updated_on = record.updated_on()?;
        let dir = root.join(table);
        self.tree.create_dir_all(&dir).await?;

        let mut created = Vec::new();
        let mut new_entries = Vec::new();

        for format in &config.formats {
            if let Some(wanted) = only_fields {
                if !wanted.contains(&format.content_field) {
                    continue;
                }
            }
            let Some(content) = record.get(&format.content_field) else {
                continue;
            };

            let template = Template::parse(&format.file_name);
            let file_name = template.compile(&record.fields)?;
            let path = dir.join(&file_name);

            self.tree.write(&path, &normalize_newlines(content)).await?;
            self.tree.set_modified(&path, updated_on).await?;
            debug!(table, file_name, "created local file");

            created.push(PathBuf::from(table).join(&file_name));
            new_entries.push(LedgerEntry {
                content_field: format.content_field.clone(),
                file_name,
            });
        }

        let mut ledger = self.ledger.lock().await;
        for entry in new_entries {
            if !ledger.has_entry(table, &entry.file_name) {
                ledger.append_entry(table, entry);
            }
        }

        Ok(created)
    }

    async fn table_context(&self, table: &str) -> Result<(PathBuf, TableConfig)> {
        let ledger = self.ledger.lock().await;
        let config = ledger.require_table_config(table)?.clone();
        Ok((ledger.file_path.clone(), config))
    }
}

/// Fields that never count as data: the table's naming fields plus the
/// identifier and update-timestamp columns.
fn non_data_fields(config: &TableConfig) -> BTreeSet<String> {
    let mut skip: BTreeSet<String> = config.naming_fields().into_iter().collect();
    skip.insert(FIELD_SYS_ID.to_string());
    skip.insert(FIELD_UPDATED_ON.to_string());
    skip
}

/// Collapse CRLF sequences before anything hits disk.
pub(crate) fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n")
}
