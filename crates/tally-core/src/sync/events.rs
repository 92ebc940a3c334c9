//! Diagnostics emitted by the sync engine.

use crate::models::{Collection, OutboxEntryId};
use crate::state::SyncState;

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Network came back after being offline
    ConnectivityRestored,
    /// Periodic timer
    Periodic,
    /// Explicit user request
    Manual,
    /// Retry after a backoff delay
    Retry,
    /// Client shutting down; push only
    Teardown,
}

impl SyncTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
            Self::Retry => "retry",
            Self::Teardown => "teardown",
        }
    }

    /// Whether the cycle pulls server changes after pushing.
    pub const fn pulls(self) -> bool {
        !matches!(self, Self::Teardown)
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of pull performed by a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullKind {
    #[default]
    None,
    Full,
    Incremental,
}

/// Counters for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: Option<SyncTrigger>,
    pub acknowledged: usize,
    pub rejected: usize,
    pub requeued: usize,
    pub abandoned: usize,
    pub pull: PullKind,
    pub merged: usize,
    pub removed: usize,
}

/// Event broadcast to diagnostics subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    CycleStarted {
        trigger: SyncTrigger,
    },
    CycleCompleted {
        report: CycleReport,
    },
    CycleFailed {
        error: String,
        will_retry: bool,
    },
    /// The server refused an item; it was dropped from the outbox
    ItemRejected {
        entry_id: OutboxEntryId,
        collection: Collection,
        record_id: Option<String>,
        reason: String,
    },
    /// An item hit the retry ceiling and was dropped
    ItemAbandoned {
        entry_id: OutboxEntryId,
        collection: Collection,
        record_id: Option<String>,
        attempts: u32,
    },
    IntegrityMismatch {
        expected: String,
        actual: String,
    },
    StateChanged {
        from: SyncState,
        to: SyncState,
    },
}
