//! Record model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Collection;
use crate::error::{Error, Result};

/// One row in a named collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection this record belongs to
    pub collection: Collection,
    /// Stable identifier, unique within the collection
    pub id: String,
    /// Collection-specific body
    pub payload: Value,
    /// True iff no outbox entry references this record
    pub synced: bool,
    /// Last local modification (Unix ms)
    pub last_modified_locally: i64,
    /// Opaque version marker from the server
    pub last_server_version: Option<String>,
}

impl Record {
    /// Create a locally-modified record that still has to reach the server.
    pub fn local(collection: Collection, id: impl Into<String>, payload: Value) -> Self {
        Self {
            collection,
            id: id.into(),
            payload,
            synced: false,
            last_modified_locally: chrono::Utc::now().timestamp_millis(),
            last_server_version: None,
        }
    }

    /// Build a record from a server entity.
    ///
    /// The id comes from the payload's `id` field; the server version from
    /// `updatedAt` (falling back to `date`).
    pub fn from_server(collection: Collection, payload: Value) -> Result<Self> {
        let id = payload_id(&payload).ok_or_else(|| {
            Error::InvalidInput(format!("{collection} entity is missing an id"))
        })?;
        let version = payload
            .get("updatedAt")
            .or_else(|| payload.get("date"))
            .map(version_marker);

        Ok(Self {
            collection,
            id,
            payload,
            synced: true,
            last_modified_locally: chrono::Utc::now().timestamp_millis(),
            last_server_version: version,
        })
    }

    /// Payload field as string, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Payload field as bool, if present.
    pub fn field_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}

/// Extract the `id` of a payload; numeric ids are stringified.
pub fn payload_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn version_marker(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Read-only view over a notification record.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord<'a> {
    record: &'a Record,
}

impl<'a> NotificationRecord<'a> {
    /// Wrap a record from the notifications collection.
    pub fn new(record: &'a Record) -> Result<Self> {
        if record.collection != Collection::Notifications {
            return Err(Error::InvalidInput(format!(
                "record {} belongs to {}, not notifications",
                record.id, record.collection
            )));
        }
        Ok(Self { record })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn read(&self) -> bool {
        self.record.field_bool("read").unwrap_or(false)
    }

    pub fn read_at(&self) -> Option<i64> {
        self.record.payload.get("readAt").and_then(Value::as_i64)
    }

    pub const fn synced(&self) -> bool {
        self.record.synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_server_reads_id_and_version() {
        let record = Record::from_server(
            Collection::Transactions,
            json!({"id": 7, "amount": 42, "updatedAt": "2026-01-02T00:00:00Z"}),
        )
        .unwrap();
        assert_eq!(record.id, "7");
        assert!(record.synced);
        assert_eq!(
            record.last_server_version.as_deref(),
            Some("2026-01-02T00:00:00Z")
        );
    }

    #[test]
    fn from_server_requires_id() {
        let error = Record::from_server(Collection::Stores, json!({"name": "Cafe"})).unwrap_err();
        assert!(error.to_string().contains("missing an id"));
    }

    #[test]
    fn notification_view_exposes_read_state() {
        let record = Record::local(
            Collection::Notifications,
            "n1",
            json!({"id": "n1", "read": true, "readAt": 1_700_000_000}),
        );
        let view = NotificationRecord::new(&record).unwrap();
        assert!(view.read());
        assert_eq!(view.read_at(), Some(1_700_000_000));
        assert!(!view.synced());
    }

    #[test]
    fn notification_view_rejects_other_collections() {
        let record = Record::local(Collection::Stores, "s1", json!({"id": "s1"}));
        assert!(NotificationRecord::new(&record).is_err());
    }
}
