//! Sync engine: wire protocol, transport, conflict policy, integrity checks,
//! and the orchestrator that ties them to the local store.

pub mod conflict;
pub mod driver;
pub mod events;
pub mod integrity;
pub mod orchestrator;
pub mod protocol;
pub mod transport;

pub use conflict::{ConflictResolver, ServerWins};
pub use driver::{spawn as spawn_driver, SyncHandle};
pub use events::{CycleReport, PullKind, SyncEvent, SyncTrigger};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use protocol::{upload_item_for, Envelope, SyncRequest, UploadItem, UploadItemKind};
pub use transport::{HttpSyncTransport, SyncTransport};
