//! Ledger data shapes.
//!
//! The ledger is the persisted map of "this file name is field X of record
//! Y": per-table format definitions (`config`), the root of the mirrored
//! file tree (`file_path`), and per-table tracked-record entries
//! (`records`). It is a passive holder — invariants are enforced by the
//! checker and the reconciler, not here.
//!
//! Serialized field names keep the camelCase document layout
//! (`nameField`, `fileName`, `contentField`, `filePath`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::naming::Template;

/// A per-content-field file-naming rule for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    /// File-name template, e.g. `:name-script-:sys_id.js`.
    pub file_name: String,
    /// Record field whose value becomes the file's content.
    pub content_field: String,
}

/// Configuration for one record type.
///
/// `content_field` values across `formats` are expected to be unique;
/// callers enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    /// Fields forming the human-readable identity of a record. A single
    /// string in the document is accepted and widened to a one-element list.
    #[serde(deserialize_with = "one_or_many")]
    pub name_field: Vec<String>,
    pub formats: Vec<Format>,
}

impl TableConfig {
    /// Find the format owning a content field.
    pub fn format_for(&self, table: &str, content_field: &str) -> Result<&Format> {
        self.formats
            .iter()
            .find(|format| format.content_field == content_field)
            .ok_or_else(|| Error::ConfigNotFound {
                table: table.to_string(),
                content_field: content_field.to_string(),
            })
    }

    /// Union of the table's name fields and every placeholder appearing in
    /// its templates. Name fields come first; order is stable; duplicates
    /// are dropped.
    pub fn naming_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for name in &self.name_field {
            push_unique(&mut fields, name);
        }
        for format in &self.formats {
            let template = Template::parse(&format.file_name);
            for name in template.placeholder_names() {
                push_unique(&mut fields, name);
            }
        }
        fields
    }

    /// Content fields in format order.
    pub fn content_fields(&self) -> impl Iterator<Item = &str> {
        self.formats.iter().map(|f| f.content_field.as_str())
    }
}

/// One tracked binding between a local file and a record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub content_field: String,
    pub file_name: String,
}

/// The whole persisted sync document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    /// Per-table format definitions.
    pub config: BTreeMap<String, TableConfig>,
    /// Root of the mirrored file tree.
    pub file_path: PathBuf,
    /// Per-table tracked-record entries, in insertion order.
    pub records: BTreeMap<String, Vec<LedgerEntry>>,
}

impl Ledger {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            config: BTreeMap::new(),
            file_path: file_path.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.file_path
    }

    /// Directory holding a table's mirrored files.
    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.file_path.join(table)
    }

    pub fn table_config(&self, table: &str) -> Option<&TableConfig> {
        self.config.get(table)
    }

    /// Table config, or `TableNotConfigured`.
    pub fn require_table_config(&self, table: &str) -> Result<&TableConfig> {
        self.table_config(table)
            .ok_or_else(|| Error::TableNotConfigured {
                table: table.to_string(),
            })
    }

    pub fn set_table_config(&mut self, table: impl Into<String>, config: TableConfig) {
        let table = table.into();
        self.config.insert(table.clone(), config);
        self.records.entry(table).or_default();
    }

    /// Tracked entries for a table; empty slice when the table is unknown.
    pub fn entries(&self, table: &str) -> &[LedgerEntry] {
        self.records.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a file name is already bound for a table.
    pub fn has_entry(&self, table: &str, file_name: &str) -> bool {
        self.entries(table)
            .iter()
            .any(|entry| entry.file_name == file_name)
    }

    pub fn append_entry(&mut self, table: impl Into<String>, entry: LedgerEntry) {
        self.records.entry(table.into()).or_default().push(entry);
    }

    /// Remove the first entry bound to a file name, returning it.
    pub fn remove_entry(&mut self, table: &str, file_name: &str) -> Option<LedgerEntry> {
        let entries = self.records.get_mut(table)?;
        let index = entries
            .iter()
            .position(|entry| entry.file_name == file_name)?;
        Some(entries.remove(index))
    }

    /// All configured table names.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Tables with at least one tracked entry.
    pub fn tables_with_entries(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(table, _)| table.clone())
            .collect()
    }
}

fn push_unique(fields: &mut Vec<String>, name: &str) {
    if !fields.iter().any(|existing| existing == name) {
        fields.push(name.to_string());
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}
