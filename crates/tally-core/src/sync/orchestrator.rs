//! Sync cycle: push the outbox, pull server changes, merge, update status.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::conflict::{ConflictResolver, ServerWins};
use super::events::{CycleReport, PullKind, SyncEvent, SyncTrigger};
use super::integrity;
use super::protocol::{
    decode, server_records, ConflictInput, DownloadUpdatesData, FullSyncData, SyncStatusData,
    UploadResult,
};
use super::transport::SyncTransport;
use crate::config::SyncSettings;
use crate::db::Requeue;
use crate::error::{Error, Result};
use crate::models::{Collection, OutboxEntry, Record, SyncStatus};
use crate::services::{LocalStore, MergeSummary};
use crate::state::{SyncNotice, SyncState};
use crate::util::unix_timestamp_now;

const EVENT_CAPACITY: usize = 256;

/// Result of asking the orchestrator to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle finished; the orchestrator is `Idle`
    Completed(CycleReport),
    /// A transient failure interrupted the cycle; the orchestrator is in `Backoff`
    Backoff { report: CycleReport, error: String },
    /// Another cycle was already running
    Skipped,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives sync cycles for one local store.
///
/// At most one cycle runs at a time; triggers that arrive while a cycle is
/// running return [`SyncOutcome::Skipped`].
pub struct SyncOrchestrator {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    resolver: Arc<dyn ConflictResolver>,
    settings: SyncSettings,
    busy: AtomicBool,
    state: watch::Sender<SyncState>,
    notice: watch::Sender<SyncNotice>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            transport,
            resolver: Arc::new(ServerWins),
            settings,
            busy: AtomicBool::new(false),
            state: watch::Sender::new(SyncState::Idle),
            notice: watch::Sender::new(SyncNotice::None),
            events,
        }
    }

    /// Replace the default server-wins policy.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn notice(&self) -> SyncNotice {
        *self.notice.borrow()
    }

    pub fn subscribe_notice(&self) -> watch::Receiver<SyncNotice> {
        self.notice.subscribe()
    }

    /// Diagnostics stream; lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Load the persisted abandoned-items notice, e.g. after a restart.
    pub async fn refresh_notice(&self) -> Result<SyncNotice> {
        let status = self.store.sync_status().await?;
        let notice = notice_for(status.abandoned_since_full_sync, false);
        self.notice.send_replace(notice);
        Ok(notice)
    }

    /// Force the next pull to be a full sync.
    pub async fn request_full_sync(&self) -> Result<()> {
        let mut status = self.store.sync_status().await?;
        status.needs_full_sync = true;
        self.store.save_sync_status(&status).await
    }

    /// Leave `Backoff` once the recovery budget is spent.
    pub fn give_up_recovery(&self) {
        if self.state() == SyncState::Backoff {
            self.set_state(SyncState::Idle);
        }
    }

    /// Run one sync cycle unless another is in progress.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!(%trigger, "Sync already running; trigger skipped");
            return Ok(SyncOutcome::Skipped);
        };

        self.set_state(SyncState::Syncing);
        self.emit(SyncEvent::CycleStarted { trigger });
        tracing::info!(%trigger, "Sync cycle started");

        let mut report = CycleReport {
            trigger: Some(trigger),
            ..CycleReport::default()
        };
        let result = self.run_cycle(trigger, &mut report).await;
        let abandoned = match self.store.sync_status().await {
            Ok(status) => status.abandoned_since_full_sync,
            Err(error) => {
                tracing::warn!("Failed to read sync status: {error}");
                0
            }
        };

        match result {
            Ok(()) => {
                self.notice.send_replace(notice_for(abandoned, false));
                self.set_state(SyncState::Idle);
                tracing::info!(
                    acknowledged = report.acknowledged,
                    rejected = report.rejected,
                    abandoned = report.abandoned,
                    merged = report.merged,
                    pull = ?report.pull,
                    "Sync cycle completed"
                );
                self.emit(SyncEvent::CycleCompleted { report });
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) if error.is_transient() => {
                self.notice.send_replace(notice_for(abandoned, true));
                self.set_state(SyncState::Backoff);
                tracing::warn!(%trigger, "Sync cycle interrupted, backing off: {error}");
                self.emit(SyncEvent::CycleFailed {
                    error: error.to_string(),
                    will_retry: true,
                });
                Ok(SyncOutcome::Backoff {
                    report,
                    error: error.to_string(),
                })
            }
            Err(error) => {
                self.notice.send_replace(notice_for(abandoned, false));
                self.set_state(SyncState::Idle);
                tracing::error!(%trigger, "Sync cycle failed: {error}");
                self.emit(SyncEvent::CycleFailed {
                    error: error.to_string(),
                    will_retry: false,
                });
                Err(error)
            }
        }
    }

    async fn run_cycle(&self, trigger: SyncTrigger, report: &mut CycleReport) -> Result<()> {
        self.push(report).await?;
        if trigger.pulls() {
            self.pull(report).await?;
        }
        Ok(())
    }

    async fn push(&self, report: &mut CycleReport) -> Result<()> {
        let batches = self.store.outbox_batches(self.settings.batch_size).await?;
        for batch in batches {
            let items = batch.iter().map(super::protocol::upload_item_for).collect();
            match self.transport.upload_pending(items).await {
                Ok(result) => {
                    if !self.settle_batch(&batch, &result, report).await? {
                        // Later entries may target the same records as the requeued ones.
                        tracing::debug!("Stopping push until requeued items are delivered");
                        return Ok(());
                    }
                }
                Err(error) => {
                    self.requeue_all(&batch, report).await?;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Acknowledge, drop or requeue every entry of an uploaded batch.
    ///
    /// Returns `false` when some entry was left unanswered and requeued.
    async fn settle_batch(
        &self,
        batch: &[OutboxEntry],
        result: &UploadResult,
        report: &mut CycleReport,
    ) -> Result<bool> {
        let processed: HashSet<&str> = result.processed_items.iter().map(String::as_str).collect();
        let rejected: HashMap<&str, &str> = result
            .errors
            .iter()
            .map(|error| (error.item_id.as_str(), error.error.as_str()))
            .collect();

        let mut unsettled = Vec::new();
        for entry in batch {
            let key = entry.id.as_str();
            if let Some(reason) = rejected.get(key.as_str()) {
                if self.store.remove_entry(&entry.id).await? {
                    report.rejected += 1;
                    tracing::warn!(
                        entry = %entry.id,
                        collection = %entry.collection,
                        record = ?entry.record_id,
                        "Server rejected outbox item: {reason}"
                    );
                    self.emit(SyncEvent::ItemRejected {
                        entry_id: entry.id,
                        collection: entry.collection,
                        record_id: entry.record_id.clone(),
                        reason: (*reason).to_string(),
                    });
                }
            } else if processed.contains(key.as_str()) {
                if self.store.acknowledge(&entry.id).await? {
                    report.acknowledged += 1;
                }
            } else {
                unsettled.push(entry.clone());
            }
        }

        if !unsettled.is_empty() {
            tracing::warn!(
                count = unsettled.len(),
                "Server neither processed nor rejected some items; requeueing"
            );
            self.requeue_all(&unsettled, report).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn requeue_all(&self, batch: &[OutboxEntry], report: &mut CycleReport) -> Result<()> {
        let ceiling = self.settings.max_retries;
        let mut abandoned = 0_u64;
        for entry in batch {
            let attempts = match self.store.requeue(&entry.id, ceiling).await {
                Ok(Requeue::Requeued(attempts)) if attempts < ceiling => {
                    report.requeued += 1;
                    continue;
                }
                Ok(Requeue::Requeued(attempts) | Requeue::CeilingReached(attempts)) => attempts,
                Err(Error::NotFound(_)) => continue,
                Err(error) => return Err(error),
            };

            if self.store.remove_entry(&entry.id).await? {
                abandoned += 1;
                report.abandoned += 1;
                tracing::warn!(
                    entry = %entry.id,
                    collection = %entry.collection,
                    record = ?entry.record_id,
                    attempts,
                    "Abandoned outbox item after repeated failures"
                );
                self.emit(SyncEvent::ItemAbandoned {
                    entry_id: entry.id,
                    collection: entry.collection,
                    record_id: entry.record_id.clone(),
                    attempts,
                });
            }
        }

        if abandoned > 0 {
            self.store.note_abandoned(abandoned).await?;
        }
        Ok(())
    }

    async fn pull(&self, report: &mut CycleReport) -> Result<()> {
        let now = unix_timestamp_now();
        let mut status = self.store.sync_status().await?;
        if status.requires_full_sync(now, self.settings.full_sync_horizon_secs) {
            self.full_sync(&mut status, now, report).await
        } else {
            self.incremental_sync(&mut status, now, report).await
        }
    }

    async fn full_sync(
        &self,
        status: &mut SyncStatus,
        now: i64,
        report: &mut CycleReport,
    ) -> Result<()> {
        let raw = self.transport.full_sync().await?;
        let verified = match integrity::verify_full_sync(&raw) {
            Ok(verified) => verified,
            Err(Error::IntegrityMismatch { expected, actual }) => {
                status.needs_full_sync = true;
                self.store.save_sync_status(status).await?;
                tracing::error!(%expected, %actual, "Full sync payload failed verification");
                self.emit(SyncEvent::IntegrityMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
                return Err(Error::IntegrityMismatch { expected, actual });
            }
            Err(error) => return Err(error),
        };

        let data: FullSyncData = decode("full_sync", raw)?;
        let total_records = data.total_records;
        let summary = self
            .store
            .apply_full_snapshot(self.resolver.as_ref(), data.into_collections()?)
            .await?;

        report.pull = PullKind::Full;
        report.merged = summary.written;
        report.removed = summary.dropped;

        status.last_sync = Some(now);
        status.last_full_sync = Some(now);
        status.sync_count += 1;
        status.needs_full_sync = false;
        status.abandoned_since_full_sync = 0;
        status.snapshot_digest = Some(verified.digest);
        status.snapshot_records = total_records;
        self.store.save_sync_status(status).await?;

        tracing::info!(
            records = total_records,
            checked = verified.server_checked,
            "Full sync applied"
        );
        Ok(())
    }

    async fn incremental_sync(
        &self,
        status: &mut SyncStatus,
        now: i64,
        report: &mut CycleReport,
    ) -> Result<()> {
        let since = status.last_sync.unwrap_or(0);
        let delta = self.transport.incremental_sync(since).await?;

        let mut records = server_records(Collection::Transactions, delta.transactions)?;
        records.extend(server_records(Collection::Stores, delta.stores)?);
        records.extend(server_records(Collection::Notifications, delta.notifications)?);
        let summary = self
            .store
            .merge_server_records(self.resolver.as_ref(), records)
            .await?;

        let mut removed = 0;
        for (collection, ids) in delta.deleted.by_collection() {
            removed += self.store.purge_deleted(collection, ids).await?;
        }

        report.pull = PullKind::Incremental;
        report.merged = summary.written;
        report.removed = removed;

        status.last_sync = Some(now);
        self.store.save_sync_status(status).await?;
        tracing::debug!(since, merged = summary.written, removed, "Incremental sync applied");
        Ok(())
    }

    /// Server-side view of this user's sync status.
    pub async fn server_status(&self) -> Result<SyncStatusData> {
        self.transport.get_sync_status().await
    }

    /// Fetch app configuration updates and store `appConfig` locally.
    pub async fn check_updates(&self) -> Result<DownloadUpdatesData> {
        let updates = self
            .transport
            .download_updates(&self.settings.client_version)
            .await?;
        if updates.updates.app_config.is_object() {
            let mut payload = updates.updates.app_config.clone();
            payload["id"] = serde_json::Value::String("app_config".to_string());
            let record = Record::from_server(Collection::Config, payload)?;
            self.store
                .merge_server_records(self.resolver.as_ref(), vec![record])
                .await?;
        }
        if updates.requires_restart {
            tracing::warn!(
                client = %updates.client_version,
                server = %updates.server_version,
                "Server requires a client restart"
            );
        }
        Ok(updates)
    }

    /// Ask the server to arbitrate conflicting records, then merge its answers.
    pub async fn resolve_conflicts(&self, conflicted: Vec<Record>) -> Result<MergeSummary> {
        if conflicted.is_empty() {
            return Ok(MergeSummary::default());
        }
        let inputs = conflicted
            .iter()
            .map(|record| ConflictInput {
                id: record.id.clone(),
                server_data: record.payload.clone(),
            })
            .collect();
        let response = self.transport.resolve_conflicts(inputs).await?;

        let by_id: HashMap<&str, &Record> = conflicted
            .iter()
            .map(|record| (record.id.as_str(), record))
            .collect();
        let resolved = response
            .resolutions
            .into_iter()
            .filter_map(|resolution| {
                by_id.get(resolution.conflict_id.as_str()).map(|record| Record {
                    payload: resolution.resolved_data,
                    synced: true,
                    ..(*record).clone()
                })
            })
            .collect();
        self.store
            .merge_server_records(self.resolver.as_ref(), resolved)
            .await
    }

    fn set_state(&self, to: SyncState) {
        let from = self.state.send_replace(to);
        if from != to {
            tracing::debug!(?from, ?to, "Sync state changed");
            self.emit(SyncEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

const fn notice_for(abandoned: u64, retrying: bool) -> SyncNotice {
    if abandoned > 0 {
        SyncNotice::ItemsAbandoned(abandoned)
    } else if retrying {
        SyncNotice::WillRetry
    } else {
        SyncNotice::None
    }
}
