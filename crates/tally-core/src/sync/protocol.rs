//! Wire types of the `POST /v1/sync` reconciliation endpoint.
//!
//! Requests are tagged by `action`; responses are wrapped in an [`Envelope`].
//! Field names are camelCase on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{Balances, Collection, OutboxEntry, OutboxOperation, Record};
use crate::util::unix_timestamp_now;

/// One call to the reconciliation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncRequest {
    FullSync,
    IncrementalSync {
        #[serde(rename = "lastSync")]
        last_sync: i64,
    },
    UploadPending {
        #[serde(rename = "pendingData")]
        pending_data: Vec<UploadItem>,
    },
    DownloadUpdates {
        #[serde(rename = "clientVersion")]
        client_version: String,
    },
    GetSyncStatus,
    ResolveConflicts {
        conflicts: Vec<ConflictInput>,
    },
}

impl SyncRequest {
    /// Wire name of the action.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::FullSync => "full_sync",
            Self::IncrementalSync { .. } => "incremental_sync",
            Self::UploadPending { .. } => "upload_pending",
            Self::DownloadUpdates { .. } => "download_updates",
            Self::GetSyncStatus => "get_sync_status",
            Self::ResolveConflicts { .. } => "resolve_conflicts",
        }
    }

    /// Whether the action writes server state.
    pub const fn is_push(&self) -> bool {
        matches!(
            self,
            Self::UploadPending { .. } | Self::ResolveConflicts { .. }
        )
    }
}

/// Response wrapper shared by every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: true,
            data: Some(data),
            message: None,
            timestamp: unix_timestamp_now(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: false,
            data: None,
            message: Some(message.into()),
            timestamp: unix_timestamp_now(),
        }
    }

    /// Unwrap `data`, turning `status: false` into [`Error::Server`].
    pub fn into_result(self) -> Result<T> {
        if !self.status {
            return Err(Error::Server(
                self.message
                    .unwrap_or_else(|| "request failed without a message".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| Error::Server("response envelope has no data".to_string()))
    }
}

/// Decode the `data` of a successful response.
pub fn decode<T: DeserializeOwned>(action: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|error| Error::Server(format!("malformed {action} response: {error}")))
}

/// `full_sync` response data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncData {
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub stores: Vec<Value>,
    #[serde(default)]
    pub balances: Balances,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub notifications: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub total_records: u64,
}

impl FullSyncData {
    /// Records per replaced collection.
    ///
    /// Every collection in the result is replaced wholesale; `config` comes
    /// from the `settings` map as `{id: key, value}` records.
    pub fn into_collections(self) -> Result<Vec<(Collection, Vec<Record>)>> {
        let profile = match self.user {
            Value::Null => Vec::new(),
            user => vec![Record::from_server(Collection::Profile, user)?],
        };
        let config = self
            .settings
            .into_iter()
            .map(|(key, value)| setting_record(key, value))
            .collect();

        Ok(vec![
            (Collection::Profile, profile),
            (
                Collection::Transactions,
                server_records(Collection::Transactions, self.transactions)?,
            ),
            (
                Collection::Stores,
                server_records(Collection::Stores, self.stores)?,
            ),
            (
                Collection::Notifications,
                server_records(Collection::Notifications, self.notifications)?,
            ),
            (Collection::Config, config),
        ])
    }
}

fn setting_record(key: String, value: Value) -> Record {
    let payload = serde_json::json!({ "id": key, "value": value });
    Record {
        collection: Collection::Config,
        id: key,
        payload,
        synced: true,
        last_modified_locally: chrono::Utc::now().timestamp_millis(),
        last_server_version: None,
    }
}

/// Convert server entities into synced records.
pub fn server_records(collection: Collection, entities: Vec<Value>) -> Result<Vec<Record>> {
    entities
        .into_iter()
        .map(|entity| Record::from_server(collection, entity))
        .collect()
}

/// Ids removed on the server since the last pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedIds {
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub stores: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
}

impl DeletedIds {
    pub fn by_collection(&self) -> [(Collection, &[String]); 3] {
        [
            (Collection::Transactions, self.transactions.as_slice()),
            (Collection::Stores, self.stores.as_slice()),
            (Collection::Notifications, self.notifications.as_slice()),
        ]
    }
}

/// `incremental_sync` response data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSyncData {
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub stores: Vec<Value>,
    #[serde(default)]
    pub notifications: Vec<Value>,
    #[serde(default)]
    pub balances: Balances,
    #[serde(default)]
    pub deleted: DeletedIds,
    #[serde(default)]
    pub changes_count: u64,
}

/// Kind of an uploaded change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadItemKind {
    TransactionView,
    NotificationRead,
    UserSettings,
    AnalyticsEvent,
    RecordMutation,
}

/// One pending change sent with `upload_pending`.
///
/// `id` is the outbox entry id and serves as the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: UploadItemKind,
    pub data: Value,
}

/// Map an outbox entry to its upload item.
pub fn upload_item_for(entry: &OutboxEntry) -> UploadItem {
    let id = entry.id.as_str();
    let flag = |key: &str| entry.payload.get(key).and_then(Value::as_bool) == Some(true);

    let (kind, data) = match (entry.collection, entry.operation) {
        (Collection::Notifications, OutboxOperation::Update) if flag("read") => (
            UploadItemKind::NotificationRead,
            serde_json::json!({ "notificationId": entry.record_id }),
        ),
        (Collection::Transactions, OutboxOperation::Update) if flag("viewed") => (
            UploadItemKind::TransactionView,
            serde_json::json!({ "transactionId": entry.record_id }),
        ),
        (Collection::Config, OutboxOperation::Insert) if entry.record_id.is_none() => (
            UploadItemKind::AnalyticsEvent,
            serde_json::json!({
                "event": entry.payload.get("event").cloned().unwrap_or(Value::Null),
                "data": entry.payload.get("data").cloned().unwrap_or(Value::Null),
            }),
        ),
        (Collection::Config, OutboxOperation::Insert | OutboxOperation::Update) => {
            (UploadItemKind::UserSettings, settings_delta(entry))
        }
        _ => (
            UploadItemKind::RecordMutation,
            serde_json::json!({
                "collection": entry.collection,
                "operation": entry.operation,
                "payload": entry.payload,
            }),
        ),
    };

    UploadItem { id, kind, data }
}

fn settings_delta(entry: &OutboxEntry) -> Value {
    let mut fields = entry.payload.as_object().cloned().unwrap_or_default();
    let key = fields.remove("id").and_then(|id| id.as_str().map(str::to_string));
    match (key, fields.remove("value")) {
        (Some(key), Some(value)) if fields.is_empty() => {
            let mut delta = Map::new();
            delta.insert(key, value);
            Value::Object(delta)
        }
        (_, value) => {
            if let Some(value) = value {
                fields.insert("value".to_string(), value);
            }
            Value::Object(fields)
        }
    }
}

/// Per-item rejection reported by `upload_pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadError {
    pub item_id: String,
    pub error: String,
}

/// `upload_pending` response data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(default)]
    pub processed_items: Vec<String>,
    #[serde(default)]
    pub errors: Vec<UploadError>,
    #[serde(default)]
    pub processed_count: usize,
    #[serde(default)]
    pub error_count: usize,
}

/// Configuration pushed by `download_updates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUpdates {
    #[serde(default)]
    pub app_config: Value,
    #[serde(default)]
    pub store_updates: Vec<Value>,
    #[serde(default)]
    pub promotion_updates: Vec<Value>,
}

/// `download_updates` response data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUpdatesData {
    pub client_version: String,
    pub server_version: String,
    #[serde(default)]
    pub updates: AppUpdates,
    #[serde(default)]
    pub requires_restart: bool,
}

/// `get_sync_status` response data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusData {
    pub last_sync: Option<i64>,
    #[serde(default)]
    pub sync_count: u64,
    pub last_full_sync: Option<i64>,
    pub server_time: i64,
    #[serde(default)]
    pub needs_full_sync: bool,
}

/// A conflict submitted to `resolve_conflicts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInput {
    pub id: String,
    pub server_data: Value,
}

/// One server decision for a submitted conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub resolution: String,
    pub resolved_data: Value,
}

/// `resolve_conflicts` response data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictsData {
    #[serde(default)]
    pub resolutions: Vec<ConflictResolution>,
    #[serde(default)]
    pub resolved_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboxEntryId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(collection: Collection, operation: OutboxOperation, payload: Value) -> OutboxEntry {
        OutboxEntry {
            id: OutboxEntryId::new(),
            seq: 1,
            collection,
            record_id: crate::models::payload_id(&payload),
            operation,
            payload,
            enqueued_at: 0,
            retry_count: 0,
        }
    }

    #[test]
    fn requests_are_tagged_by_action() {
        let request = SyncRequest::IncrementalSync {
            last_sync: 1_700_000_000,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"action": "incremental_sync", "lastSync": 1_700_000_000})
        );

        let parsed: SyncRequest = serde_json::from_value(json!({"action": "full_sync"})).unwrap();
        assert_eq!(parsed, SyncRequest::FullSync);
        assert!(serde_json::from_value::<SyncRequest>(json!({"action": "drop_tables"})).is_err());
    }

    #[test]
    fn failed_envelope_becomes_server_error() {
        let envelope: Envelope<Value> = serde_json::from_value(json!({
            "status": false,
            "message": "Acción no válida",
            "timestamp": 1,
        }))
        .unwrap();
        let error = envelope.into_result().unwrap_err();
        assert!(matches!(error, Error::Server(message) if message == "Acción no válida"));
    }

    #[test]
    fn notification_read_maps_to_its_item_type() {
        let entry = entry(
            Collection::Notifications,
            OutboxOperation::Update,
            json!({"id": "n9", "read": true, "readAt": 5}),
        );
        let item = upload_item_for(&entry);
        assert_eq!(item.id, entry.id.as_str());
        assert_eq!(item.kind, UploadItemKind::NotificationRead);
        assert_eq!(item.data, json!({"notificationId": "n9"}));
    }

    #[test]
    fn transaction_view_and_settings_items() {
        let view = upload_item_for(&entry(
            Collection::Transactions,
            OutboxOperation::Update,
            json!({"id": "t1", "viewed": true}),
        ));
        assert_eq!(view.kind, UploadItemKind::TransactionView);
        assert_eq!(view.data, json!({"transactionId": "t1"}));

        let setting = upload_item_for(&entry(
            Collection::Config,
            OutboxOperation::Update,
            json!({"id": "theme", "value": "dark"}),
        ));
        assert_eq!(setting.kind, UploadItemKind::UserSettings);
        assert_eq!(setting.data, json!({"theme": "dark"}));
    }

    #[test]
    fn analytics_and_generic_mutations() {
        let event = upload_item_for(&entry(
            Collection::Config,
            OutboxOperation::Insert,
            json!({"event": "opened_wallet", "data": {"screen": "home"}}),
        ));
        assert_eq!(event.kind, UploadItemKind::AnalyticsEvent);
        assert_eq!(
            event.data,
            json!({"event": "opened_wallet", "data": {"screen": "home"}})
        );

        let insert = upload_item_for(&entry(
            Collection::Transactions,
            OutboxOperation::Insert,
            json!({"id": "t1", "points": 10}),
        ));
        assert_eq!(insert.kind, UploadItemKind::RecordMutation);
        assert_eq!(
            insert.data,
            json!({
                "collection": "transactions",
                "operation": "INSERT",
                "payload": {"id": "t1", "points": 10},
            })
        );
    }

    #[test]
    fn full_sync_data_splits_into_collections() {
        let data: FullSyncData = serde_json::from_value(json!({
            "user": {"id": "u1", "name": "Ana"},
            "transactions": [{"id": "t1", "points": 5}],
            "stores": [{"id": 3, "categoria": "food"}],
            "balances": {"totalPoints": 5, "earnedPoints": 5, "redeemedPoints": 0, "byStore": {}},
            "settings": {"theme": "dark"},
            "notifications": [],
            "checksum": "sha256:00",
            "totalRecords": 2,
        }))
        .unwrap();

        let collections = data.into_collections().unwrap();
        let ids: Vec<(Collection, Vec<String>)> = collections
            .iter()
            .map(|(collection, records)| {
                (*collection, records.iter().map(|r| r.id.clone()).collect())
            })
            .collect();
        assert_eq!(
            ids,
            vec![
                (Collection::Profile, vec!["u1".to_string()]),
                (Collection::Transactions, vec!["t1".to_string()]),
                (Collection::Stores, vec!["3".to_string()]),
                (Collection::Notifications, vec![]),
                (Collection::Config, vec!["theme".to_string()]),
            ]
        );
        assert!(collections.iter().flat_map(|(_, r)| r).all(|r| r.synced));
    }
}
