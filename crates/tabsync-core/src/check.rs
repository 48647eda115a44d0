//! Integrity checks between the ledger and the file tree.
//!
//! Two families of problems:
//! - duplicate bindings: more than one ledger entry resolving to the same
//!   `(content field, identifier)` pair for a table;
//! - tree drift: entries whose files are gone, files no entry tracks,
//!   and directories the config or records map does not know about.
//!
//! Duplicate removal is split into a pure plan and a separate apply step so
//! the mutation is testable and free of index-shifting surprises.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use tabsync_fs::FileTree;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::naming::Template;
use crate::remote::FIELD_SYS_ID;
use crate::store::LedgerStore;

/// A problem found while validating the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// A ledger entry references a content field absent from its table's
    /// formats. Reported, never fatal.
    FileConfigNotFound {
        table: String,
        content_field: String,
        file_name: String,
    },
    /// Multiple entries resolve to the same `(content field, identifier)`.
    /// File names are listed in ledger order.
    DuplicateFiles {
        table: String,
        content_field: String,
        sys_id: String,
        file_names: Vec<String>,
    },
}

/// One planned removal: drop `copies` occurrences of a file name from a
/// table, always taking the last match first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub table: String,
    pub file_name: String,
    pub copies: usize,
}

/// Discrepancies between ledger entries and the actual file tree.
/// Paths are relative to the ledger root (`table/file`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingReport {
    /// Tracked entries whose file is gone or not a regular file.
    pub missing_files: Vec<PathBuf>,
    /// Files on disk with no tracking entry.
    pub missing_ledger_entries: Vec<PathBuf>,
    /// Table directories with no table config.
    pub missing_table_configs: Vec<PathBuf>,
    /// Table directories with no records key.
    pub missing_ledger_tables: Vec<PathBuf>,
}

impl MissingReport {
    pub fn is_empty(&self) -> bool {
        self.missing_files.is_empty()
            && self.missing_ledger_entries.is_empty()
            && self.missing_table_configs.is_empty()
            && self.missing_ledger_tables.is_empty()
    }
}

/// Combined result of [`run_check`].
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub problems: Vec<Problem>,
    /// Removed duplicate file names per table.
    pub removed: BTreeMap<String, Vec<String>>,
    pub missing: MissingReport,
}

/// Scan every table with more than one entry for duplicate bindings.
///
/// Each entry's file name is decoded with its format's template to recover
/// the record identifier; entries sharing `(content field, identifier)` are
/// reported together. Entries whose content field has no format are
/// reported as `FileConfigNotFound` and excluded from grouping.
pub fn detect_duplicates(ledger: &Ledger) -> Result<Vec<Problem>> {
    let mut problems = Vec::new();

    for (table, entries) in &ledger.records {
        if entries.len() < 2 {
            continue;
        }
        let Some(config) = ledger.table_config(table) else {
            // no config means no format can match any entry
            for entry in entries {
                problems.push(Problem::FileConfigNotFound {
                    table: table.clone(),
                    content_field: entry.content_field.clone(),
                    file_name: entry.file_name.clone(),
                });
            }
            continue;
        };

        // (content_field, sys_id) -> file names, insertion-ordered
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        let mut group_order: Vec<(String, String)> = Vec::new();

        for entry in entries {
            let Ok(format) = config.format_for(table, &entry.content_field) else {
                problems.push(Problem::FileConfigNotFound {
                    table: table.clone(),
                    content_field: entry.content_field.clone(),
                    file_name: entry.file_name.clone(),
                });
                continue;
            };
            let template = Template::parse(&format.file_name);
            let values = template.field_values(&entry.file_name)?;
            let sys_id = values.get(FIELD_SYS_ID).cloned().unwrap_or_default();

            let key = (entry.content_field.clone(), sys_id);
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(entry.file_name.clone());
        }

        for key in group_order {
            let file_names = &groups[&key];
            if file_names.len() > 1 {
                problems.push(Problem::DuplicateFiles {
                    table: table.clone(),
                    content_field: key.0.clone(),
                    sys_id: key.1.clone(),
                    file_names: file_names.clone(),
                });
            }
        }
    }

    Ok(problems)
}

/// Compute which entries to drop for a set of duplicate problems.
///
/// Only file names occurring more than once within a colliding set are
/// trimmed; a collision between two distinct names (say, after a rename)
/// is reported but left for the operator.
pub fn duplicate_removal_plan(problems: &[Problem]) -> Vec<Removal> {
    let mut removals = Vec::new();

    for problem in problems {
        let Problem::DuplicateFiles {
            table, file_names, ..
        } = problem
        else {
            continue;
        };

        let mut counts: Vec<(&str, usize)> = Vec::new();
        for name in file_names {
            match counts.iter_mut().find(|(seen, _)| seen == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name, 1)),
            }
        }

        for (name, count) in counts {
            if count > 1 {
                removals.push(Removal {
                    table: table.clone(),
                    file_name: name.to_string(),
                    copies: count - 1,
                });
            }
        }
    }

    removals
}

/// Apply a removal plan, dropping the last matching entry first so the
/// earliest-added binding survives. Returns the removed file names per
/// table, deduplicated. Callers must persist the ledger afterward.
pub fn apply_removal_plan(ledger: &mut Ledger, plan: &[Removal]) -> BTreeMap<String, Vec<String>> {
    let mut removed: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for removal in plan {
        let Some(entries) = ledger.records.get_mut(&removal.table) else {
            continue;
        };
        for _ in 0..removal.copies {
            let Some(index) = entries
                .iter()
                .rposition(|entry| entry.file_name == removal.file_name)
            else {
                break;
            };
            entries.remove(index);
            debug!(
                table = %removal.table,
                file_name = %removal.file_name,
                "removed duplicate ledger entry"
            );
        }
        let names = removed.entry(removal.table.clone()).or_default();
        if !names.contains(&removal.file_name) {
            names.push(removal.file_name.clone());
        }
    }

    removed
}

/// Plan and apply duplicate removal in one step.
pub fn remove_duplicates(
    ledger: &mut Ledger,
    problems: &[Problem],
) -> BTreeMap<String, Vec<String>> {
    let plan = duplicate_removal_plan(problems);
    apply_removal_plan(ledger, &plan)
}

/// Compare the ledger against the file tree under its root.
pub async fn detect_missing_files(
    ledger: &Ledger,
    tree: &dyn FileTree,
) -> Result<MissingReport> {
    let mut report = MissingReport::default();
    let root = ledger.root();

    for name in tree.list_dir(root).await? {
        let dir = root.join(&name);
        let Ok(stat) = tree.stat(&dir).await else {
            continue;
        };
        if !stat.is_dir {
            continue;
        }

        let relative = PathBuf::from(&name);
        if ledger.table_config(&name).is_none() {
            report.missing_table_configs.push(relative.clone());
        }
        if !ledger.records.contains_key(&name) {
            report.missing_ledger_tables.push(relative);
            continue;
        }

        let entries = ledger.entries(&name);
        for file in tree.list_dir(&dir).await? {
            if !entries.iter().any(|entry| entry.file_name == file) {
                report.missing_ledger_entries.push(relative.join(file));
            }
        }
        for entry in entries {
            let path = dir.join(&entry.file_name);
            let missing = match tree.stat(&path).await {
                Ok(stat) => !stat.is_file,
                Err(_) => true,
            };
            if missing {
                report.missing_files.push(relative.join(&entry.file_name));
            }
        }
    }

    Ok(report)
}

/// Run the whole check suite: detect duplicates, auto-remove the removable
/// ones, scan for tree drift, persist the (possibly mutated) ledger.
pub async fn run_check(
    ledger: &mut Ledger,
    tree: &dyn FileTree,
    store: &LedgerStore,
) -> Result<CheckOutcome> {
    let problems = detect_duplicates(ledger)?;
    let removed = remove_duplicates(ledger, &problems);
    let missing = detect_missing_files(ledger, tree).await?;

    if !removed.is_empty() {
        warn!(tables = removed.len(), "removed duplicate ledger entries");
    }
    store.save(ledger)?;

    Ok(CheckOutcome {
        problems,
        removed,
        missing,
    })
}
