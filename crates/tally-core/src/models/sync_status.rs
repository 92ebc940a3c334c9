//! Sync metadata model

use serde::{Deserialize, Serialize};

/// Seconds after which a full sync is considered stale.
pub const FULL_SYNC_HORIZON_SECS: i64 = 7 * 24 * 60 * 60;

/// Per-user sync bookkeeping, mutated only by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last successful pull (Unix seconds)
    pub last_sync: Option<i64>,
    /// Last successful full sync (Unix seconds)
    pub last_full_sync: Option<i64>,
    /// Number of completed full syncs
    pub sync_count: u64,
    /// Set when a full-sync payload failed verification
    pub needs_full_sync: bool,
    /// Outbox items abandoned since the last successful full sync
    pub abandoned_since_full_sync: u64,
    /// Digest of the last verified full-sync payload
    pub snapshot_digest: Option<String>,
    /// Entity count of the last verified full-sync payload
    pub snapshot_records: u64,
}

impl SyncStatus {
    /// Whether the next pull must be a full sync.
    pub fn requires_full_sync(&self, now: i64, horizon_secs: i64) -> bool {
        self.needs_full_sync || is_full_sync_stale(self.last_full_sync, now, horizon_secs)
    }
}

/// `true` when no full sync happened or the last one is older than the horizon.
pub fn is_full_sync_stale(last_full_sync: Option<i64>, now: i64, horizon_secs: i64) -> bool {
    last_full_sync.is_none_or(|at| now.saturating_sub(at) > horizon_secs)
}
