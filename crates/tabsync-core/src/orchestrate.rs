//! Fans reconciliation out across every tracked table.
//!
//! Per table: stat every bound file, recover record identifiers from file
//! names, fetch the matching remote records in one batched call, reconcile
//! each record, then persist the ledger as one locked step. Tables and
//! records fan out under fixed concurrency caps; results are keyed by table
//! and identifier, never by completion order. One table or record failing
//! must not stop its siblings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use tabsync_fs::FileTree;

use crate::error::{Error, Result};
use crate::ledger::{Ledger, LedgerEntry, TableConfig};
use crate::naming::Template;
use crate::reconcile::{Binding, Reconciler, RecordSummary};
use crate::remote::{FIELD_SYS_ID, FIELD_UPDATED_ON, RemoteStore};
use crate::store::LedgerStore;

/// Concurrent table syncs, independent of table count.
pub const DEFAULT_TABLE_LIMIT: usize = 4;

/// Concurrent per-record reconciliations within a table.
pub const DEFAULT_RECORD_LIMIT: usize = 8;

/// A record that failed without aborting its siblings.
#[derive(Debug)]
pub struct RecordFailure {
    pub sys_id: String,
    pub error: Error,
}

/// Outcome of one table's pass: per-record summaries plus isolated
/// per-record failures.
#[derive(Debug, Default)]
pub struct TableSummary {
    pub records: Vec<RecordSummary>,
    pub failures: Vec<RecordFailure>,
}

impl TableSummary {
    pub fn is_noop(&self) -> bool {
        self.failures.is_empty() && self.records.iter().all(RecordSummary::is_noop)
    }
}

/// Aggregated result of a whole pass, keyed by table.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub tables: BTreeMap<String, Result<TableSummary>>,
}

impl SyncReport {
    /// True when every table completed and no record failed.
    pub fn is_success(&self) -> bool {
        self.tables
            .values()
            .all(|result| matches!(result, Ok(summary) if summary.failures.is_empty()))
    }

    /// True when the pass changed nothing anywhere.
    pub fn is_noop(&self) -> bool {
        self.tables
            .values()
            .all(|result| matches!(result, Ok(summary) if summary.is_noop()))
    }
}

/// Drives sync/pull/push passes over all tracked tables.
#[derive(Clone)]
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    tree: Arc<dyn FileTree>,
    ledger: Arc<Mutex<Ledger>>,
    store: LedgerStore,
    table_limit: usize,
    record_limit: usize,
}

/// Bound files and file-less fields for one table, keyed by identifier.
#[derive(Debug, Default)]
struct LocalBindings {
    bound: BTreeMap<String, BTreeMap<PathBuf, Binding>>,
    /// Content fields whose file is gone, per identifier. These records
    /// still sync so the missing files get recreated.
    missing: BTreeMap<String, Vec<String>>,
}

impl LocalBindings {
    fn sys_ids(&self) -> Vec<String> {
        self.bound
            .keys()
            .chain(self.missing.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl SyncOrchestrator {
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
            table_limit: DEFAULT_TABLE_LIMIT,
            record_limit: DEFAULT_RECORD_LIMIT,
        }
    }

    /// Override the concurrency caps.
    pub fn with_limits(mut self, table_limit: usize, record_limit: usize) -> Self {
        self.table_limit = table_limit.max(1);
        self.record_limit = record_limit.max(1);
        self
    }

    /// Reconcile every tracked record of every non-empty table.
    pub async fn sync_all(&self) -> SyncReport {
        self.run_pass("sync", |this, table| async move {
            this.sync_table(&table).await
        })
        .await
    }

    /// Re-fetch every tracked record and rewrite all of its files.
    pub async fn pull_all(&self) -> SyncReport {
        self.run_pass("pull", |this, table| async move {
            this.pull_table(&table).await
        })
        .await
    }

    /// Push every bound file's content to its record, one update per record.
    pub async fn push_all(&self) -> SyncReport {
        self.run_pass("push", |this, table| async move {
            this.push_table(&table).await
        })
        .await
    }

    async fn run_pass<F, Fut>(&self, pass: &'static str, table_op: F) -> SyncReport
    where
        F: Fn(Self, String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<TableSummary>> + Send + 'static,
    {
        let tables = { self.ledger.lock().await.tables_with_entries() };
        let semaphore = Arc::new(Semaphore::new(self.table_limit));

        let mut handles = Vec::with_capacity(tables.len());
        for table in tables {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let table_op = table_op.clone();
            let name = table.clone();
            handles.push((
                table,
                tokio::spawn(async move {
                    let _permit =
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| Error::TaskFailed {
                                message: e.to_string(),
                            })?;
                    table_op(this, name).await
                }),
            ));
        }

        let mut report = SyncReport::default();
        for (table, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::TaskFailed {
                    message: e.to_string(),
                }),
            };
            match &result {
                Ok(summary) => info!(
                    pass,
                    table,
                    records = summary.records.len(),
                    failures = summary.failures.len(),
                    "table pass finished"
                ),
                Err(err) => warn!(pass, table, %err, "table pass failed"),
            }
            report.tables.insert(table, result);
        }
        report
    }

    async fn sync_table(&self, table: &str) -> Result<TableSummary> {
        let (root, config, entries) = self.table_state(table).await?;
        let bindings = self.bind_local_files(table, &root, &config, &entries).await?;

        let sys_ids = bindings.sys_ids();
        if sys_ids.is_empty() {
            return Err(Error::NoLocalFiles {
                table: table.to_string(),
            });
        }

        let fields = fetch_fields(&config);
        let records = self.remote.fetch_records(table, &sys_ids, &fields).await?;
        if records.is_empty() {
            return Err(Error::RemoteRecordNotFound {
                table: table.to_string(),
            });
        }

        let reconciler = Reconciler::new(
            self.remote.clone(),
            self.tree.clone(),
            self.ledger.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(self.record_limit));
        let mut bound_by_id = bindings.bound;

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let sys_id = record.require_sys_id()?.to_string();
            let bound = bound_by_id.remove(&sys_id).unwrap_or_default();
            let reconciler = reconciler.clone();
            let semaphore = semaphore.clone();
            let table = table.to_string();
            handles.push((
                sys_id,
                tokio::spawn(async move {
                    let _permit =
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| Error::TaskFailed {
                                message: e.to_string(),
                            })?;
                    reconciler.sync_record(&table, &record, &bound).await
                }),
            ));
        }

        let mut summary = TableSummary::default();
        for (sys_id, handle) in handles {
            match handle.await {
                Ok(Ok(record_summary)) => summary.records.push(record_summary),
                Ok(Err(error)) => summary.failures.push(RecordFailure { sys_id, error }),
                Err(e) => summary.failures.push(RecordFailure {
                    sys_id,
                    error: Error::TaskFailed {
                        message: e.to_string(),
                    },
                }),
            }
        }

        self.persist_ledger().await?;
        Ok(summary)
    }

    async fn pull_table(&self, table: &str) -> Result<TableSummary> {
        let (_, config, entries) = self.table_state(table).await?;

        let mut sys_ids = BTreeSet::new();
        for entry in &entries {
            let format = config.format_for(table, &entry.content_field)?;
            let template = Template::parse(&format.file_name);
            let values = template.field_values(&entry.file_name)?;
            if let Some(sys_id) = values.get(FIELD_SYS_ID) {
                sys_ids.insert(sys_id.clone());
            }
        }
        if sys_ids.is_empty() {
            return Err(Error::NoLocalFiles {
                table: table.to_string(),
            });
        }

        let fields = fetch_fields(&config);
        let reconciler = Reconciler::new(
            self.remote.clone(),
            self.tree.clone(),
            self.ledger.clone(),
        );

        let mut summary = TableSummary::default();
        for sys_id in sys_ids {
            let pulled = match self.remote.fetch_record(table, &sys_id, &fields).await {
                Ok(record) => reconciler.write_files_for_record(table, &record, None).await,
                Err(error) => Err(error),
            };
            match pulled {
                Ok(created_files) => summary.records.push(RecordSummary {
                    sys_id,
                    created_files,
                    ..Default::default()
                }),
                Err(error) => summary.failures.push(RecordFailure { sys_id, error }),
            }
        }

        self.persist_ledger().await?;
        Ok(summary)
    }

    async fn push_table(&self, table: &str) -> Result<TableSummary> {
        let (root, config, entries) = self.table_state(table).await?;
        let bindings = self.bind_local_files(table, &root, &config, &entries).await?;

        let mut summary = TableSummary::default();
        for (sys_id, files) in bindings.bound {
            match self.push_record(table, &sys_id, &files).await {
                Ok(updated_remote_fields) => summary.records.push(RecordSummary {
                    sys_id,
                    updated_remote_fields,
                    ..Default::default()
                }),
                Err(error) => summary.failures.push(RecordFailure { sys_id, error }),
            }
        }
        Ok(summary)
    }

    async fn push_record(
        &self,
        table: &str,
        sys_id: &str,
        files: &BTreeMap<PathBuf, Binding>,
    ) -> Result<Vec<String>> {
        let mut fields = BTreeMap::new();
        for (path, binding) in files {
            let content = self.tree.read_to_string(path).await?;
            fields.insert(binding.content_field.clone(), content);
        }

        let outcome = self.remote.update_record(table, sys_id, &fields).await?;
        if let Some(message) = outcome.error_message() {
            return Err(Error::RemoteUpdateFailed {
                table: table.to_string(),
                sys_id: sys_id.to_string(),
                message,
            });
        }
        Ok(fields.keys().cloned().collect())
    }

    /// Stat every bound file of a table, partitioning records by whether
    /// their files exist. Records whose files are all gone still appear, so
    /// the fetch can recreate them.
    async fn bind_local_files(
        &self,
        table: &str,
        root: &std::path::Path,
        config: &TableConfig,
        entries: &[LedgerEntry],
    ) -> Result<LocalBindings> {
        let mut bindings = LocalBindings::default();
        for entry in entries {
            let format = config.format_for(table, &entry.content_field)?;
            let template = Template::parse(&format.file_name);
            let values = template.field_values(&entry.file_name)?;
            let sys_id = values
                .get(FIELD_SYS_ID)
                .cloned()
                .ok_or_else(|| Error::MissingField {
                    field: FIELD_SYS_ID.to_string(),
                })?;

            let path = root.join(table).join(&entry.file_name);
            match self.tree.stat(&path).await {
                Ok(stat) if stat.is_file => {
                    bindings.bound.entry(sys_id).or_default().insert(
                        path,
                        Binding {
                            content_field: entry.content_field.clone(),
                            modified: stat.modified,
                        },
                    );
                }
                _ => bindings
                    .missing
                    .entry(sys_id)
                    .or_default()
                    .push(entry.content_field.clone()),
            }
        }
        Ok(bindings)
    }

    async fn table_state(
        &self,
        table: &str,
    ) -> Result<(PathBuf, TableConfig, Vec<LedgerEntry>)> {
        let ledger = self.ledger.lock().await;
        let config = ledger.require_table_config(table)?.clone();
        Ok((
            ledger.file_path.clone(),
            config,
            ledger.entries(table).to_vec(),
        ))
    }

    /// Read-modify-persist happens as one locked step per table batch.
    async fn persist_ledger(&self) -> Result<()> {
        let ledger = self.ledger.lock().await;
        self.store.save(&ledger)
    }
}

/// Field list for a table's batched fetch: naming fields, content fields
/// and the update timestamp, deduplicated.
fn fetch_fields(config: &TableConfig) -> Vec<String> {
    let mut fields = config.naming_fields();
    let extra: Vec<String> = config
        .content_fields()
        .map(str::to_string)
        .chain(std::iter::once(FIELD_UPDATED_ON.to_string()))
        .collect();
    for field in extra {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}
