//! Data models for Tally

mod balance;
mod collection;
mod outbox;
mod record;
mod sync_status;

pub use balance::Balances;
pub use collection::Collection;
pub use outbox::{OutboxEntry, OutboxEntryId, OutboxOperation};
pub use record::{payload_id, NotificationRecord, Record};
pub use sync_status::{is_full_sync_stale, SyncStatus, FULL_SYNC_HORIZON_SECS};
