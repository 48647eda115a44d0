//! Remote record store contract.
//!
//! The engine only knows the remote as a fetch/update interface over flat
//! field maps. Transport, URLs and auth headers live behind implementations
//! of [`RemoteStore`]; application-level failures arrive as a status/error
//! marker inside the response payload rather than a transport error.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Field carrying the record's unique identifier.
pub const FIELD_SYS_ID: &str = "sys_id";

/// Field carrying the record's last-update timestamp.
pub const FIELD_UPDATED_ON: &str = "sys_updated_on";

/// Timestamp layout used by the remote store, timezone-less, read as UTC.
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a remote timestamp string (`2020-01-01 00:00:00`) as a UTC instant.
pub fn parse_remote_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), REMOTE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Format a UTC instant in the remote's timestamp layout.
pub fn format_remote_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(REMOTE_TIMESTAMP_FORMAT).to_string()
}

/// One record of a table: a flat field-name to string-value map, always
/// including `sys_id` and `sys_updated_on` when fetched by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord {
    pub fields: BTreeMap<String, String>,
}

impl RemoteRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn sys_id(&self) -> Option<&str> {
        self.get(FIELD_SYS_ID)
    }

    /// `sys_id`, or `MissingField` for records the remote returned bare.
    pub fn require_sys_id(&self) -> Result<&str> {
        self.sys_id().ok_or_else(|| Error::MissingField {
            field: FIELD_SYS_ID.to_string(),
        })
    }

    /// The record's update instant, parsed from `sys_updated_on`.
    pub fn updated_on(&self) -> Result<DateTime<Utc>> {
        let raw = self.get(FIELD_UPDATED_ON).ok_or_else(|| Error::MissingField {
            field: FIELD_UPDATED_ON.to_string(),
        })?;
        parse_remote_timestamp(raw)
    }
}

impl FromIterator<(String, String)> for RemoteRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Result of an update call: which fields were sent, plus the raw response
/// payload for error inspection.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub updated_fields: Vec<String>,
    pub response: Value,
}

impl UpdateOutcome {
    /// Application-level failure marker, if the payload carries one.
    /// Recognizes the `{"error": {"message": ...}}` envelope and a
    /// `"status": "failure"` field.
    pub fn error_message(&self) -> Option<String> {
        if let Some(error) = self.response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("remote rejected the update");
            return Some(message.to_string());
        }
        if self.response.get("status").and_then(Value::as_str) == Some("failure") {
            return Some("remote rejected the update".to_string());
        }
        None
    }
}

/// Fetch/update interface to the remote tabular store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one record by identifier, restricted to `fields`
    /// (`sys_id` is always included).
    async fn fetch_record(&self, table: &str, sys_id: &str, fields: &[String])
    -> Result<RemoteRecord>;

    /// Fetch a batch of records by identifier. Unknown identifiers are
    /// silently absent from the result, mirroring a query-style API.
    async fn fetch_records(
        &self,
        table: &str,
        sys_ids: &[String],
        fields: &[String],
    ) -> Result<Vec<RemoteRecord>>;

    /// Update a record's fields. Implementations must never send `sys_id`
    /// as an updatable field.
    async fn update_record(
        &self,
        table: &str,
        sys_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<UpdateOutcome>;
}
