//! Orchestrator state shared by every client surface.

use serde::Serialize;

/// Sync orchestrator state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Backoff,
}

/// Notice shown to the user about background sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum SyncNotice {
    #[default]
    None,
    /// The last attempt failed transiently; another one is scheduled
    WillRetry,
    /// Changes were dropped after the retry ceiling; cleared by a full sync
    ItemsAbandoned(u64),
}

impl SyncNotice {
    pub const fn message(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::WillRetry => Some("Sync failed; will retry"),
            Self::ItemsAbandoned(_) => {
                Some("Some changes could not be delivered and were discarded")
            }
        }
    }
}
