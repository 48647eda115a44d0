//! In-memory remote store for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tabsync_core::error::{Error, Result};
use tabsync_core::remote::{FIELD_SYS_ID, RemoteRecord, RemoteStore, UpdateOutcome};

/// One `update_record` call as the store observed it.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub table: String,
    pub sys_id: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    /// table -> sys_id -> fields
    tables: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    updates: Vec<RecordUpdate>,
    fail_message: Option<String>,
}

/// A [`RemoteStore`] over in-memory tables, with an update log and a
/// scriptable application-level failure for update calls.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one record. `sys_id` is stored as a field as well.
    pub fn insert_record(&self, table: &str, sys_id: &str, fields: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let record = state
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(sys_id.to_string())
            .or_default();
        record.insert(FIELD_SYS_ID.to_string(), sys_id.to_string());
        for (name, value) in fields {
            record.insert(name.to_string(), value.to_string());
        }
    }

    /// Make every subsequent update return an application-level error
    /// payload with this message.
    pub fn fail_updates_with(&self, message: &str) {
        self.state.lock().unwrap().fail_message = Some(message.to_string());
    }

    /// Every update call seen so far, in order.
    pub fn updates(&self) -> Vec<RecordUpdate> {
        self.state.lock().unwrap().updates.clone()
    }

    /// Current field value of a seeded record, if any.
    pub fn field(&self, table: &str, sys_id: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .and_then(|records| records.get(sys_id))
            .and_then(|record| record.get(name))
            .cloned()
    }
}

fn project(record: &BTreeMap<String, String>, fields: &[String]) -> RemoteRecord {
    record
        .iter()
        .filter(|(name, _)| *name == FIELD_SYS_ID || fields.iter().any(|f| f == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_record(
        &self,
        table: &str,
        sys_id: &str,
        fields: &[String],
    ) -> Result<RemoteRecord> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .and_then(|records| records.get(sys_id))
            .map(|record| project(record, fields))
            .ok_or_else(|| Error::RemoteRecordNotFound {
                table: table.to_string(),
            })
    }

    async fn fetch_records(
        &self,
        table: &str,
        sys_ids: &[String],
        fields: &[String],
    ) -> Result<Vec<RemoteRecord>> {
        let state = self.state.lock().unwrap();
        let Some(records) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        // unknown identifiers are silently absent, like a query API
        Ok(sys_ids
            .iter()
            .filter_map(|sys_id| records.get(sys_id))
            .map(|record| project(record, fields))
            .collect())
    }

    async fn update_record(
        &self,
        table: &str,
        sys_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<UpdateOutcome> {
        let mut state = self.state.lock().unwrap();
        state.updates.push(RecordUpdate {
            table: table.to_string(),
            sys_id: sys_id.to_string(),
            fields: fields.clone(),
        });

        if let Some(message) = state.fail_message.clone() {
            return Ok(UpdateOutcome {
                updated_fields: Vec::new(),
                response: serde_json::json!({ "error": { "message": message } }),
            });
        }

        if let Some(record) = state
            .tables
            .get_mut(table)
            .and_then(|records| records.get_mut(sys_id))
        {
            for (name, value) in fields {
                if name != FIELD_SYS_ID {
                    record.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(UpdateOutcome {
            updated_fields: fields.keys().cloned().collect(),
            response: serde_json::json!({ "result": { "sys_id": sys_id } }),
        })
    }
}
