//! In-memory server of record behind the sync endpoint.
//!
//! Holds the shared store catalog and, per user, versioned records,
//! settings, the analytics log, processed upload ids and sync status.
//! Every entity carries an `updatedAt` (epoch seconds) that drives
//! incremental pulls; deletions leave tombstones with the same clock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tally_core::models::{
    is_full_sync_stale, payload_id, Balances, Collection, OutboxOperation, FULL_SYNC_HORIZON_SECS,
};
use tally_core::sync::integrity::full_sync_digest;
use tally_core::sync::protocol::{
    AppUpdates, ConflictInput, ConflictResolution, DeletedIds, DownloadUpdatesData, FullSyncData,
    IncrementalSyncData, ResolveConflictsData, SyncStatusData, UploadError, UploadResult,
};
use tally_core::sync::{SyncRequest, UploadItem, UploadItemKind};
use tally_core::util::{requires_restart, unix_timestamp_now};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::AppError;

const FULL_SYNC_TRANSACTION_LIMIT: usize = 100;

/// Collections a user may look up by id when resolving conflicts.
const USER_COLLECTIONS: [Collection; 4] = [
    Collection::Transactions,
    Collection::Notifications,
    Collection::RewardHistory,
    Collection::Profile,
];

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid seed entity: {0}")]
    Invalid(String),
}

/// Initial server contents, usually read from `TALLY_API_SEED_PATH`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub stores: Vec<Value>,
    #[serde(default)]
    pub app_config: Value,
    #[serde(default)]
    pub promotions: Vec<Value>,
    #[serde(default)]
    pub users: BTreeMap<String, UserSeed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserSeed {
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub notifications: Vec<Value>,
    #[serde(default)]
    pub reward_history: Vec<Value>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    data: Value,
    updated_at: i64,
}

impl StoredEntity {
    fn new(data: Value, updated_at: i64) -> Self {
        let mut entity = Self { data, updated_at };
        entity.stamp(updated_at);
        entity
    }

    fn stamp(&mut self, now: i64) {
        self.updated_at = now;
        if let Some(fields) = self.data.as_object_mut() {
            fields.insert("updatedAt".to_string(), json!(now));
        }
    }
}

type Entities = BTreeMap<String, StoredEntity>;

#[derive(Debug, Default)]
struct UserLedger {
    records: HashMap<Collection, Entities>,
    settings: Map<String, Value>,
    analytics: Vec<Value>,
    processed: HashSet<String>,
    tombstones: HashMap<Collection, BTreeMap<String, i64>>,
    last_sync: Option<i64>,
    last_full_sync: Option<i64>,
    sync_count: u64,
}

#[derive(Debug, Deserialize)]
struct RecordMutation {
    collection: Collection,
    operation: OutboxOperation,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Default)]
struct LedgerState {
    catalog: Entities,
    app_config: Value,
    promotions: Vec<Value>,
    users: HashMap<String, UserLedger>,
}

pub struct Ledger {
    server_version: String,
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new(server_version: impl Into<String>) -> Self {
        Self {
            server_version: server_version.into(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn load(path: &Path, server_version: impl Into<String>) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: Seed = serde_json::from_str(&raw)?;
        Self::from_seed(seed, server_version, unix_timestamp_now())
    }

    /// Build a ledger from seed data; entities without `updatedAt` get `now`.
    pub fn from_seed(
        seed: Seed,
        server_version: impl Into<String>,
        now: i64,
    ) -> Result<Self, SeedError> {
        let mut state = LedgerState {
            catalog: seed_entities(Collection::Stores, seed.stores, now)?,
            app_config: seed.app_config,
            promotions: seed.promotions,
            users: HashMap::new(),
        };

        for (user_id, user) in seed.users {
            let mut ledger = UserLedger {
                settings: user.settings,
                ..UserLedger::default()
            };
            let collections = [
                (Collection::Profile, user.profile.into_iter().collect()),
                (Collection::Transactions, user.transactions),
                (Collection::Notifications, user.notifications),
                (Collection::RewardHistory, user.reward_history),
            ];
            for (collection, entities) in collections {
                ledger
                    .records
                    .insert(collection, seed_entities(collection, entities, now)?);
            }
            state.users.insert(user_id, ledger);
        }

        tracing::info!(
            stores = state.catalog.len(),
            users = state.users.len(),
            "Ledger seeded"
        );
        Ok(Self {
            server_version: server_version.into(),
            state: Mutex::new(state),
        })
    }

    pub async fn handle(&self, user_id: &str, request: SyncRequest) -> Result<Value, AppError> {
        self.handle_at(user_id, request, unix_timestamp_now()).await
    }

    /// Execute one action for `user_id` as of `now` (epoch seconds).
    pub async fn handle_at(
        &self,
        user_id: &str,
        request: SyncRequest,
        now: i64,
    ) -> Result<Value, AppError> {
        let mut state = self.state.lock().await;
        match request {
            SyncRequest::FullSync => state.full_sync(user_id, now),
            SyncRequest::IncrementalSync { last_sync } => {
                if last_sync < 0 {
                    return Err(AppError::bad_request("lastSync must not be negative"));
                }
                to_data(&state.incremental_sync(user_id, last_sync, now))
            }
            SyncRequest::UploadPending { pending_data } => {
                to_data(&state.upload_pending(user_id, pending_data, now))
            }
            SyncRequest::DownloadUpdates { client_version } => {
                if client_version.trim().is_empty() {
                    return Err(AppError::bad_request("clientVersion is required"));
                }
                to_data(&state.download_updates(client_version, &self.server_version))
            }
            SyncRequest::GetSyncStatus => to_data(&state.sync_status(user_id, now)),
            SyncRequest::ResolveConflicts { conflicts } => {
                to_data(&state.resolve_conflicts(user_id, conflicts))
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn analytics_len(&self, user_id: &str) -> usize {
        let state = self.state.lock().await;
        state.users.get(user_id).map_or(0, |user| user.analytics.len())
    }

    #[cfg(test)]
    pub(crate) async fn setting(&self, user_id: &str, key: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .users
            .get(user_id)
            .and_then(|user| user.settings.get(key).cloned())
    }
}

impl LedgerState {
    fn user_mut(&mut self, user_id: &str) -> &mut UserLedger {
        self.users.entry(user_id.to_string()).or_default()
    }

    fn active_stores(&self) -> Vec<Value> {
        self.catalog
            .values()
            .filter(|store| store.data.get("active").and_then(Value::as_bool) != Some(false))
            .map(|store| store.data.clone())
            .collect()
    }

    fn full_sync(&mut self, user_id: &str, now: i64) -> Result<Value, AppError> {
        let stores = self.active_stores();
        let user = self.user_mut(user_id);

        let profile = user
            .entities(Collection::Profile)
            .next()
            .map_or_else(|| json!({ "id": user_id }), |profile| profile.data.clone());

        let mut transactions: Vec<&StoredEntity> = user.entities(Collection::Transactions).collect();
        let balances = Balances::from_transactions(transactions.iter().map(|entity| &entity.data));
        transactions.sort_by_key(|entity| std::cmp::Reverse(recency(entity)));
        let transactions: Vec<Value> = transactions
            .into_iter()
            .take(FULL_SYNC_TRANSACTION_LIMIT)
            .map(|entity| entity.data.clone())
            .collect();

        let mut notifications: Vec<&StoredEntity> =
            user.entities(Collection::Notifications).collect();
        notifications.sort_by_key(|entity| std::cmp::Reverse(entity.updated_at));
        let notifications: Vec<Value> = notifications
            .into_iter()
            .map(|entity| entity.data.clone())
            .collect();

        let total_records = transactions.len() + stores.len() + notifications.len();
        let data = FullSyncData {
            user: profile,
            transactions,
            stores,
            balances,
            settings: user.settings.clone(),
            notifications,
            checksum: None,
            total_records: u64::try_from(total_records).unwrap_or(u64::MAX),
        };

        let mut payload = to_data(&data)?;
        let checksum = full_sync_digest(&payload);
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("checksum".to_string(), Value::String(checksum));
        }

        user.last_sync = Some(now);
        user.last_full_sync = Some(now);
        user.sync_count += 1;
        tracing::debug!(total_records, "Full sync assembled");
        Ok(payload)
    }

    fn incremental_sync(&mut self, user_id: &str, since: i64, now: i64) -> IncrementalSyncData {
        let stores: Vec<Value> = self
            .catalog
            .values()
            .filter(|store| store.updated_at >= since)
            .map(|store| store.data.clone())
            .collect();
        let user = self.user_mut(user_id);

        let transactions = user.changed_since(Collection::Transactions, since);
        let notifications = user.changed_since(Collection::Notifications, since);
        let deleted = DeletedIds {
            transactions: user.deleted_since(Collection::Transactions, since),
            stores: Vec::new(),
            notifications: user.deleted_since(Collection::Notifications, since),
        };
        let changes = transactions.len()
            + stores.len()
            + notifications.len()
            + deleted.transactions.len()
            + deleted.notifications.len();
        let balances = Balances::from_transactions(
            user.entities(Collection::Transactions)
                .map(|entity| &entity.data),
        );

        user.last_sync = Some(now);
        user.sync_count += 1;

        IncrementalSyncData {
            transactions,
            stores,
            notifications,
            balances,
            deleted,
            changes_count: u64::try_from(changes).unwrap_or(u64::MAX),
        }
    }

    fn upload_pending(&mut self, user_id: &str, items: Vec<UploadItem>, now: i64) -> UploadResult {
        let user = self.user_mut(user_id);
        let mut result = UploadResult::default();

        for item in items {
            if item.id.trim().is_empty() {
                result.errors.push(UploadError {
                    item_id: item.id,
                    error: "Item id is required".to_string(),
                });
                continue;
            }
            if user.processed.contains(&item.id) {
                tracing::debug!(item = %item.id, "Replayed upload item already applied");
                result.processed_items.push(item.id);
                continue;
            }

            match user.apply(&item, now) {
                Ok(()) => {
                    user.processed.insert(item.id.clone());
                    result.processed_items.push(item.id);
                }
                Err(reason) => {
                    tracing::debug!(item = %item.id, kind = ?item.kind, "Upload item rejected: {reason}");
                    result.errors.push(UploadError {
                        item_id: item.id,
                        error: reason,
                    });
                }
            }
        }

        result.processed_count = result.processed_items.len();
        result.error_count = result.errors.len();
        result
    }

    fn download_updates(&self, client_version: String, server_version: &str) -> DownloadUpdatesData {
        let requires_restart = requires_restart(&client_version, server_version);
        DownloadUpdatesData {
            client_version,
            server_version: server_version.to_string(),
            updates: AppUpdates {
                app_config: self.app_config.clone(),
                store_updates: self.active_stores(),
                promotion_updates: self.promotions.clone(),
            },
            requires_restart,
        }
    }

    fn sync_status(&self, user_id: &str, now: i64) -> SyncStatusData {
        let (last_sync, last_full_sync, sync_count) = self
            .users
            .get(user_id)
            .map_or((None, None, 0), |user| {
                (user.last_sync, user.last_full_sync, user.sync_count)
            });
        SyncStatusData {
            last_sync,
            sync_count,
            last_full_sync,
            server_time: now,
            needs_full_sync: is_full_sync_stale(last_full_sync, now, FULL_SYNC_HORIZON_SECS),
        }
    }

    fn resolve_conflicts(&self, user_id: &str, conflicts: Vec<ConflictInput>) -> ResolveConflictsData {
        let user = self.users.get(user_id);
        let resolutions: Vec<ConflictResolution> = conflicts
            .into_iter()
            .map(|conflict| {
                let stored = user
                    .and_then(|user| user.find(&conflict.id))
                    .or_else(|| self.catalog.get(&conflict.id))
                    .map(|entity| entity.data.clone());
                ConflictResolution {
                    conflict_id: conflict.id,
                    resolution: "server_wins".to_string(),
                    resolved_data: stored.unwrap_or(conflict.server_data),
                }
            })
            .collect();

        ResolveConflictsData {
            resolved_count: resolutions.len(),
            resolutions,
        }
    }
}

impl UserLedger {
    fn entities(&self, collection: Collection) -> impl Iterator<Item = &StoredEntity> {
        self.records
            .get(&collection)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    fn changed_since(&self, collection: Collection, since: i64) -> Vec<Value> {
        self.entities(collection)
            .filter(|entity| entity.updated_at >= since)
            .map(|entity| entity.data.clone())
            .collect()
    }

    fn deleted_since(&self, collection: Collection, since: i64) -> Vec<String> {
        self.tombstones
            .get(&collection)
            .map(|tombstones| {
                tombstones
                    .iter()
                    .filter(|(_, deleted_at)| **deleted_at >= since)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find(&self, id: &str) -> Option<&StoredEntity> {
        USER_COLLECTIONS
            .iter()
            .find_map(|collection| self.records.get(collection)?.get(id))
    }

    fn apply(&mut self, item: &UploadItem, now: i64) -> Result<(), String> {
        match item.kind {
            UploadItemKind::TransactionView => {
                let id = required_str(&item.data, "transactionId")?;
                self.touch(Collection::Transactions, id, now, |fields| {
                    fields.insert("viewed".to_string(), Value::Bool(true));
                    fields.insert("viewedAt".to_string(), json!(now.saturating_mul(1_000)));
                })
            }
            UploadItemKind::NotificationRead => {
                let id = required_str(&item.data, "notificationId")?;
                self.touch(Collection::Notifications, id, now, |fields| {
                    fields.insert("read".to_string(), Value::Bool(true));
                    fields.insert("readAt".to_string(), json!(now.saturating_mul(1_000)));
                })
            }
            UploadItemKind::UserSettings => {
                let settings = item
                    .data
                    .as_object()
                    .filter(|settings| !settings.is_empty())
                    .ok_or_else(|| "Settings payload must be a non-empty object".to_string())?;
                for (key, value) in settings {
                    self.settings.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            UploadItemKind::AnalyticsEvent => {
                let event = required_str(&item.data, "event")?;
                self.analytics.push(json!({
                    "event": event,
                    "data": item.data.get("data").cloned().unwrap_or(Value::Null),
                    "receivedAt": now,
                }));
                Ok(())
            }
            UploadItemKind::RecordMutation => self.apply_mutation(&item.data, now),
        }
    }

    fn touch(
        &mut self,
        collection: Collection,
        id: &str,
        now: i64,
        update: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<(), String> {
        let entity = self
            .records
            .get_mut(&collection)
            .and_then(|entities| entities.get_mut(id))
            .ok_or_else(|| format!("{collection} {id} not found"))?;
        if let Some(fields) = entity.data.as_object_mut() {
            update(fields);
        }
        entity.stamp(now);
        Ok(())
    }

    fn apply_mutation(&mut self, data: &Value, now: i64) -> Result<(), String> {
        let mutation: RecordMutation = serde_json::from_value(data.clone())
            .map_err(|error| format!("Invalid record mutation: {error}"))?;

        let collection = match mutation.collection {
            Collection::Stores => return Err("Stores are read-only".to_string()),
            Collection::Config => return self.apply_setting(mutation.operation, mutation.payload),
            collection => collection,
        };
        let id = payload_id(&mutation.payload)
            .ok_or_else(|| format!("{collection} payload is missing an id"))?;

        match mutation.operation {
            OutboxOperation::Insert => {
                if let Some(tombstones) = self.tombstones.get_mut(&collection) {
                    tombstones.remove(&id);
                }
                self.records
                    .entry(collection)
                    .or_default()
                    .insert(id, StoredEntity::new(mutation.payload, now));
            }
            OutboxOperation::Update => {
                let Value::Object(changes) = mutation.payload else {
                    return Err(format!("{collection} payload must be an object"));
                };
                self.touch(collection, &id, now, |fields| fields.extend(changes))?;
            }
            OutboxOperation::Delete => {
                if let Some(entities) = self.records.get_mut(&collection) {
                    entities.remove(&id);
                }
                self.tombstones
                    .entry(collection)
                    .or_default()
                    .insert(id, now);
            }
        }
        Ok(())
    }

    fn apply_setting(&mut self, operation: OutboxOperation, payload: Value) -> Result<(), String> {
        let key = payload_id(&payload).ok_or_else(|| "config payload is missing an id".to_string())?;
        match operation {
            OutboxOperation::Insert | OutboxOperation::Update => {
                let value = payload.get("value").cloned().unwrap_or(Value::Null);
                self.settings.insert(key, value);
            }
            OutboxOperation::Delete => {
                self.settings.remove(&key);
            }
        }
        Ok(())
    }
}

fn seed_entities(
    collection: Collection,
    entities: Vec<Value>,
    now: i64,
) -> Result<Entities, SeedError> {
    entities
        .into_iter()
        .map(|data| {
            let id = payload_id(&data)
                .ok_or_else(|| SeedError::Invalid(format!("{collection} entity without an id")))?;
            let updated_at = data.get("updatedAt").and_then(Value::as_i64).unwrap_or(now);
            Ok((id, StoredEntity::new(data, updated_at)))
        })
        .collect()
}

fn required_str<'a>(data: &'a Value, key: &str) -> Result<&'a str, String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("`{key}` is required"))
}

/// Sort key for "most recent" transactions: `date` when parseable, else `updatedAt`.
fn recency(entity: &StoredEntity) -> i64 {
    match entity.data.get("date") {
        Some(Value::Number(date)) => date.as_i64().unwrap_or(entity.updated_at),
        Some(Value::String(date)) => chrono::DateTime::parse_from_rfc3339(date)
            .map_or(entity.updated_at, |parsed| parsed.timestamp()),
        _ => entity.updated_at,
    }
}

fn to_data<T: Serialize>(data: &T) -> Result<Value, AppError> {
    serde_json::to_value(data)
        .map_err(|error| AppError::internal(format!("failed to encode response: {error}")))
}
