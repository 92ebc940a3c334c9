//! Async local store shared by the orchestrator and every client surface.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::db::{
    Database, OutboxRepository, RecordRepository, Requeue, SqliteOutboxRepository,
    SqliteRecordRepository, SqliteSyncStatusRepository, SyncStatusRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    payload_id, Balances, Collection, OutboxEntry, OutboxEntryId, OutboxOperation, Record,
    SyncStatus,
};
use crate::sync::ConflictResolver;
use crate::util::unix_millis_now;

/// Counts from writing a batch of server records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records written
    pub written: usize,
    /// Written records that still carry pending local changes
    pub pending: usize,
    /// Synced records dropped because the server no longer lists them
    pub dropped: usize,
}

impl MergeSummary {
    fn absorb(&mut self, other: Self) {
        self.written += other.written;
        self.pending += other.pending;
        self.dropped += other.dropped;
    }
}

/// Thread-safe service over the local database.
///
/// Every mutation that must reach the server is written together with its
/// outbox entry in one transaction.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    exhausted: Arc<AtomicBool>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Database file backing this store, if any.
    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    /// Cap the database size in pages; writes past it fail with
    /// [`Error::StorageExhausted`].
    pub async fn set_storage_quota(&self, max_pages: u32) -> Result<()> {
        let db = self.db.lock().await;
        db.set_max_page_count(max_pages)
    }

    /// Pages currently used by the database.
    pub async fn page_count(&self) -> Result<u32> {
        let db = self.db.lock().await;
        db.page_count()
    }

    /// Whether writes are blocked until retention cleanup runs.
    pub fn is_storage_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_storage_exhausted() {
            return Err(Error::StorageExhausted);
        }
        Ok(())
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::StorageExhausted)) {
            if !self.exhausted.swap(true, Ordering::AcqRel) {
                tracing::warn!("Local storage exhausted; writes blocked until retention cleanup");
            }
        }
        result
    }

    /// Store a record as-is, without touching the outbox.
    pub async fn put(&self, record: &Record) -> Result<()> {
        self.ensure_writable()?;
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        self.observe(repo.put(record))
    }

    /// Fetch one record.
    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.get(collection, id)
    }

    /// All records of a collection, newest first.
    pub async fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.get_all(collection)
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.count(collection)
    }

    /// Apply a local mutation and append it to the outbox atomically.
    ///
    /// INSERT payloads without an `id` get a generated one; UPDATE and
    /// DELETE require it. The written record is unsynced until the server
    /// acknowledges every entry that targets it.
    pub async fn record_change(
        &self,
        collection: Collection,
        operation: OutboxOperation,
        payload: Value,
    ) -> Result<OutboxEntryId> {
        self.ensure_writable()?;
        let Value::Object(mut fields) = payload else {
            return Err(Error::InvalidInput(
                "record payload must be a JSON object".to_string(),
            ));
        };

        let mut id = payload_id(&Value::Object(fields.clone()));
        if id.is_none() && operation == OutboxOperation::Insert {
            let generated = uuid::Uuid::now_v7().to_string();
            fields.insert("id".to_string(), Value::String(generated.clone()));
            id = Some(generated);
        }
        let id = id.ok_or_else(|| {
            Error::InvalidInput(format!("{operation} on {collection} requires an id"))
        })?;
        let payload = Value::Object(fields);

        let db = self.db.lock().await;
        let result = (|| -> Result<OutboxEntryId> {
            let tx = db.connection().unchecked_transaction()?;
            let records = SqliteRecordRepository::new(&tx);
            match operation {
                OutboxOperation::Delete => {
                    records.delete(collection, &id)?;
                }
                OutboxOperation::Insert | OutboxOperation::Update => {
                    records.put(&Record::local(collection, id.clone(), payload.clone()))?;
                }
            }
            let entry_id = SqliteOutboxRepository::new(&tx).enqueue(collection, operation, &payload)?;
            tx.commit()?;
            Ok(entry_id)
        })();
        let entry_id = self.observe(result)?;

        tracing::debug!(%collection, id = %id, %operation, entry = %entry_id, "Recorded local change");
        Ok(entry_id)
    }

    /// Mark a notification read locally and queue the change.
    pub async fn mark_notification_read(&self, id: &str) -> Result<OutboxEntryId> {
        self.flag_record(Collection::Notifications, id, |payload| {
            payload.insert("read".to_string(), Value::Bool(true));
            payload.insert("readAt".to_string(), json!(unix_millis_now()));
        })
        .await
    }

    /// Record that a transaction was viewed.
    pub async fn record_transaction_view(&self, id: &str) -> Result<OutboxEntryId> {
        self.flag_record(Collection::Transactions, id, |payload| {
            payload.insert("viewed".to_string(), Value::Bool(true));
        })
        .await
    }

    async fn flag_record(
        &self,
        collection: Collection,
        id: &str,
        apply: impl FnOnce(&mut serde_json::Map<String, Value>),
    ) -> Result<OutboxEntryId> {
        let record = self
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{collection} record {id}")))?;
        let mut payload = record.payload.as_object().cloned().unwrap_or_default();
        payload.insert("id".to_string(), Value::String(record.id));
        apply(&mut payload);
        self.record_change(collection, OutboxOperation::Update, Value::Object(payload))
            .await
    }

    /// Set one user setting (a `config` record `{id: key, value}`).
    pub async fn update_setting(&self, key: &str, value: Value) -> Result<OutboxEntryId> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("setting key must not be empty".to_string()));
        }
        let operation = if self.get(Collection::Config, key).await?.is_some() {
            OutboxOperation::Update
        } else {
            OutboxOperation::Insert
        };
        self.record_change(Collection::Config, operation, json!({ "id": key, "value": value }))
            .await
    }

    /// Queue an analytics event; nothing is stored locally.
    pub async fn track_event(&self, event: &str, data: Value) -> Result<OutboxEntryId> {
        self.ensure_writable()?;
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        self.observe(repo.enqueue(
            Collection::Config,
            OutboxOperation::Insert,
            &json!({ "event": event, "data": data }),
        ))
    }

    /// Pending outbox entries with `seq > after_seq`, oldest first.
    pub async fn outbox_batch(&self, after_seq: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.batch_after(after_seq, limit)
    }

    /// Every pending entry as FIFO batches of at most `batch_size`.
    pub async fn outbox_batches(&self, batch_size: usize) -> Result<Vec<Vec<OutboxEntry>>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        let batches = repo.drain(batch_size).collect();
        batches
    }

    /// The oldest `limit` pending entries.
    pub async fn outbox_list(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.list(limit)
    }

    pub async fn outbox_len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.len()
    }

    /// Pending entries targeting one record.
    pub async fn pending_for(&self, collection: Collection, id: &str) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.pending_for(collection, id)
    }

    /// Drop an acknowledged entry.
    pub async fn acknowledge(&self, id: &OutboxEntryId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.acknowledge(id)
    }

    /// Count a failed delivery attempt.
    pub async fn requeue(&self, id: &OutboxEntryId, ceiling: u32) -> Result<Requeue> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.requeue(id, ceiling)
    }

    /// Drop an entry that was rejected or abandoned.
    pub async fn remove_entry(&self, id: &OutboxEntryId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.remove(id)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let db = self.db.lock().await;
        SqliteSyncStatusRepository::new(db.connection()).load()
    }

    pub async fn save_sync_status(&self, status: &SyncStatus) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStatusRepository::new(db.connection()).save(status)
    }

    /// Add `count` to the abandoned-items counter.
    pub async fn note_abandoned(&self, count: u64) -> Result<SyncStatus> {
        let db = self.db.lock().await;
        let repo = SqliteSyncStatusRepository::new(db.connection());
        let mut status = repo.load()?;
        status.abandoned_since_full_sync += count;
        repo.save(&status)?;
        Ok(status)
    }

    /// Merge server records through `resolver`.
    ///
    /// A merged record stays unsynced while outbox entries target it.
    pub async fn merge_server_records(
        &self,
        resolver: &dyn ConflictResolver,
        records: Vec<Record>,
    ) -> Result<MergeSummary> {
        self.ensure_writable()?;
        let db = self.db.lock().await;
        let result = (|| -> Result<MergeSummary> {
            let tx = db.connection().unchecked_transaction()?;
            let repo = SqliteRecordRepository::new(&tx);
            let resolved = resolve_all(&repo, resolver, records)?;
            let mut summary = MergeSummary::default();
            for record in &resolved {
                repo.put(record)?;
                summary.written += 1;
                summary.pending += usize::from(!record.synced);
            }
            tx.commit()?;
            Ok(summary)
        })();
        self.observe(result)
    }

    /// Replace the synced contents of each listed collection.
    ///
    /// All collections are replaced in one transaction; a failure leaves
    /// every collection untouched.
    pub async fn apply_full_snapshot(
        &self,
        resolver: &dyn ConflictResolver,
        collections: Vec<(Collection, Vec<Record>)>,
    ) -> Result<MergeSummary> {
        self.ensure_writable()?;
        let db = self.db.lock().await;
        let result = (|| -> Result<MergeSummary> {
            let tx = db.connection().unchecked_transaction()?;
            let repo = SqliteRecordRepository::new(&tx);
            let mut summary = MergeSummary::default();
            for (collection, records) in collections {
                let resolved = resolve_all(&repo, resolver, records)?;
                let pending = resolved.iter().filter(|record| !record.synced).count();
                let dropped = repo.replace_rows(collection, &resolved)?;
                tracing::debug!(%collection, written = resolved.len(), dropped, "Replaced collection");
                summary.absorb(MergeSummary {
                    written: resolved.len(),
                    pending,
                    dropped,
                });
            }
            tx.commit()?;
            Ok(summary)
        })();
        self.observe(result)
    }

    /// Delete records the server reported as removed.
    ///
    /// Records with pending outbox entries are kept.
    pub async fn purge_deleted(&self, collection: Collection, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_writable()?;
        let unique: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let result = (|| -> Result<usize> {
            let mut purged = 0;
            for id in unique {
                if repo.has_pending(collection, id)? {
                    tracing::debug!(%collection, id, "Kept deleted record with pending changes");
                    continue;
                }
                purged += usize::from(repo.delete(collection, id)?);
            }
            Ok(purged)
        })();
        self.observe(result)
    }

    /// Drop synced records older than `horizon_ms` and lift the
    /// storage-exhaustion latch.
    pub async fn cleanup_retention(&self, horizon_ms: i64) -> Result<usize> {
        self.cleanup_before(unix_millis_now().saturating_sub(horizon_ms))
            .await
    }

    /// Drop synced records last modified before `cutoff_ms`.
    pub async fn cleanup_before(&self, cutoff_ms: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let removed = repo.purge_synced_older_than(cutoff_ms)?;
        if self.exhausted.swap(false, Ordering::AcqRel) {
            tracing::info!(removed, "Retention cleanup lifted storage exhaustion");
        } else {
            tracing::info!(removed, "Retention cleanup finished");
        }
        Ok(removed)
    }

    /// Point balances derived from the stored transactions.
    pub async fn balances(&self) -> Result<Balances> {
        let transactions = self.get_all(Collection::Transactions).await?;
        Ok(Balances::from_transactions(
            transactions.iter().map(|record| &record.payload),
        ))
    }
}

fn resolve_all(
    repo: &SqliteRecordRepository<'_>,
    resolver: &dyn ConflictResolver,
    records: Vec<Record>,
) -> Result<Vec<Record>> {
    records
        .into_iter()
        .map(|server| -> Result<Record> {
            let local = repo.get(server.collection, &server.id)?;
            let mut resolved = resolver.resolve(local.as_ref(), server);
            if repo.has_pending(resolved.collection, &resolved.id)? {
                resolved.synced = false;
            }
            Ok(resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ServerWins;
    use pretty_assertions::assert_eq;

    async fn store() -> LocalStore {
        LocalStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn record_change_writes_record_and_entry_together() {
        let store = store().await;
        let entry_id = store
            .record_change(
                Collection::Transactions,
                OutboxOperation::Insert,
                json!({"id": "t1", "points": 10}),
            )
            .await
            .unwrap();

        let record = store.get(Collection::Transactions, "t1").await.unwrap().unwrap();
        assert!(!record.synced);
        let pending = store.pending_for(Collection::Transactions, "t1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, entry_id);

        store.acknowledge(&entry_id).await.unwrap();
        let record = store.get(Collection::Transactions, "t1").await.unwrap().unwrap();
        assert!(record.synced);
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_without_id_gets_generated_one() {
        let store = store().await;
        store
            .record_change(Collection::RewardHistory, OutboxOperation::Insert, json!({"reward": "cafe"}))
            .await
            .unwrap();
        let records = store.get_all(Collection::RewardHistory).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field_str("id"), Some(records[0].id.as_str()));
    }

    #[tokio::test]
    async fn update_requires_id_and_object_payload() {
        let store = store().await;
        let error = store
            .record_change(Collection::Stores, OutboxOperation::Update, json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));

        let error = store
            .record_change(Collection::Stores, OutboxOperation::Insert, json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(store.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_local_record_and_queues_entry() {
        let store = store().await;
        store
            .put(&Record::from_server(Collection::Stores, json!({"id": "s1"})).unwrap())
            .await
            .unwrap();
        store
            .record_change(Collection::Stores, OutboxOperation::Delete, json!({"id": "s1"}))
            .await
            .unwrap();
        assert!(store.get(Collection::Stores, "s1").await.unwrap().is_none());
        assert_eq!(store.outbox_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_notification_read_updates_view() {
        let store = store().await;
        store
            .put(
                &Record::from_server(Collection::Notifications, json!({"id": "n1", "read": false}))
                    .unwrap(),
            )
            .await
            .unwrap();

        store.mark_notification_read("n1").await.unwrap();
        let record = store.get(Collection::Notifications, "n1").await.unwrap().unwrap();
        let view = crate::models::NotificationRecord::new(&record).unwrap();
        assert!(view.read());
        assert!(view.read_at().is_some());
        assert!(!view.synced());

        let error = store.mark_notification_read("missing").await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn track_event_is_outbox_only() {
        let store = store().await;
        store.track_event("opened", json!({"screen": "home"})).await.unwrap();
        assert_eq!(store.count(Collection::Config).await.unwrap(), 0);
        let entries = store.outbox_list(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record_id, None);
    }

    #[tokio::test]
    async fn update_setting_inserts_then_updates() {
        let store = store().await;
        store.update_setting("theme", json!("dark")).await.unwrap();
        store.update_setting("theme", json!("light")).await.unwrap();
        let entries = store.outbox_list(10).await.unwrap();
        let operations: Vec<OutboxOperation> = entries.iter().map(|e| e.operation).collect();
        assert_eq!(
            operations,
            vec![OutboxOperation::Insert, OutboxOperation::Update]
        );
        let record = store.get(Collection::Config, "theme").await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"id": "theme", "value": "light"}));
    }

    #[tokio::test]
    async fn merge_keeps_pending_records_unsynced() {
        let store = store().await;
        store
            .record_change(
                Collection::Notifications,
                OutboxOperation::Insert,
                json!({"id": "n1", "read": true}),
            )
            .await
            .unwrap();

        let server = vec![
            Record::from_server(Collection::Notifications, json!({"id": "n1", "read": false}))
                .unwrap(),
            Record::from_server(Collection::Notifications, json!({"id": "n2"})).unwrap(),
        ];
        let summary = store.merge_server_records(&ServerWins, server).await.unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.pending, 1);

        let n1 = store.get(Collection::Notifications, "n1").await.unwrap().unwrap();
        assert_eq!(n1.payload, json!({"id": "n1", "read": false}));
        assert!(!n1.synced);
        let n2 = store.get(Collection::Notifications, "n2").await.unwrap().unwrap();
        assert!(n2.synced);
    }

    #[tokio::test]
    async fn full_snapshot_drops_stale_synced_records_only() {
        let store = store().await;
        store
            .put(&Record::from_server(Collection::Stores, json!({"id": "old"})).unwrap())
            .await
            .unwrap();
        store
            .record_change(Collection::Stores, OutboxOperation::Insert, json!({"id": "mine"}))
            .await
            .unwrap();

        let snapshot = vec![(
            Collection::Stores,
            vec![Record::from_server(Collection::Stores, json!({"id": "new"})).unwrap()],
        )];
        let summary = store.apply_full_snapshot(&ServerWins, snapshot).await.unwrap();
        assert_eq!(summary.dropped, 1);

        let ids: Vec<String> = store
            .get_all(Collection::Stores)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        assert_eq!(ids, vec!["mine".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn purge_deleted_skips_pending_records() {
        let store = store().await;
        store
            .put(&Record::from_server(Collection::Transactions, json!({"id": "t1"})).unwrap())
            .await
            .unwrap();
        store
            .record_change(Collection::Transactions, OutboxOperation::Insert, json!({"id": "t2"}))
            .await
            .unwrap();

        let purged = store
            .purge_deleted(
                Collection::Transactions,
                &["t1".to_string(), "t2".to_string(), "t1".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(Collection::Transactions, "t1").await.unwrap().is_none());
        assert!(store.get(Collection::Transactions, "t2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn balances_follow_stored_transactions() {
        let store = store().await;
        for payload in [
            json!({"id": "t1", "points": 100, "type": "earn", "storeId": "s1"}),
            json!({"id": "t2", "points": 30, "type": "redeem", "storeId": "s1"}),
        ] {
            store
                .put(&Record::from_server(Collection::Transactions, payload).unwrap())
                .await
                .unwrap();
        }
        let balances = store.balances().await.unwrap();
        assert_eq!(balances.total_points, 70);
        assert_eq!(balances.by_store.get("s1"), Some(&70));
    }

    #[tokio::test]
    async fn storage_exhaustion_blocks_writes_until_cleanup() {
        let store = store().await;
        let used = store.page_count().await.unwrap();
        store.set_storage_quota(used + 4).await.unwrap();

        let filler = "x".repeat(8 * 1024);
        let mut exhausted = false;
        for index in 0..64 {
            let mut record = Record::from_server(
                Collection::Stores,
                json!({"id": format!("s{index}"), "blob": filler}),
            )
            .unwrap();
            record.last_modified_locally = 0;
            match store.put(&record).await {
                Ok(()) => {}
                Err(Error::StorageExhausted) => {
                    exhausted = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(exhausted);
        assert!(store.is_storage_exhausted());

        let small = Record::local(Collection::Config, "k", json!({"id": "k"}));
        assert!(matches!(store.put(&small).await, Err(Error::StorageExhausted)));
        let pulled = || {
            vec![Record::from_server(Collection::Notifications, json!({"id": "n1"})).unwrap()]
        };
        assert!(matches!(
            store.merge_server_records(&ServerWins, pulled()).await,
            Err(Error::StorageExhausted)
        ));
        assert!(matches!(
            store
                .apply_full_snapshot(&ServerWins, vec![(Collection::Notifications, pulled())])
                .await,
            Err(Error::StorageExhausted)
        ));
        assert!(matches!(
            store
                .purge_deleted(Collection::Stores, &["s0".to_string()])
                .await,
            Err(Error::StorageExhausted)
        ));
        assert!(store.get(Collection::Notifications, "n1").await.unwrap().is_none());

        let removed = store.cleanup_before(1).await.unwrap();
        assert!(removed > 0);
        assert!(!store.is_storage_exhausted());
        store.put(&small).await.unwrap();
        let summary = store
            .merge_server_records(&ServerWins, pulled())
            .await
            .unwrap();
        assert_eq!(summary.written, 1);
    }

    #[tokio::test]
    async fn failed_full_snapshot_leaves_every_collection_untouched() {
        let store = store().await;
        store
            .put(&Record::from_server(Collection::Stores, json!({"id": "old"})).unwrap())
            .await
            .unwrap();
        let used = store.page_count().await.unwrap();
        store.set_storage_quota(used + 4).await.unwrap();

        let filler = "x".repeat(8 * 1024);
        let transactions = (0..64)
            .map(|index| {
                Record::from_server(
                    Collection::Transactions,
                    json!({"id": format!("t{index}"), "blob": filler}),
                )
                .unwrap()
            })
            .collect();
        let snapshot = vec![
            (
                Collection::Stores,
                vec![Record::from_server(Collection::Stores, json!({"id": "new"})).unwrap()],
            ),
            (Collection::Transactions, transactions),
        ];

        let result = store.apply_full_snapshot(&ServerWins, snapshot).await;
        assert!(matches!(result, Err(Error::StorageExhausted)));
        assert!(store.get(Collection::Stores, "old").await.unwrap().is_some());
        assert!(store.get(Collection::Stores, "new").await.unwrap().is_none());
        assert_eq!(store.count(Collection::Transactions).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tally.db");

        let store = LocalStore::open_path(&path).await.unwrap();
        store
            .record_change(Collection::Transactions, OutboxOperation::Insert, json!({"id": "t1"}))
            .await
            .unwrap();
        drop(store);

        let reopened = LocalStore::open_path(&path).await.unwrap();
        assert_eq!(reopened.db_path(), Some(path.as_path()));
        assert_eq!(reopened.outbox_len().await.unwrap(), 1);
        assert!(reopened.get(Collection::Transactions, "t1").await.unwrap().is_some());
    }
}
