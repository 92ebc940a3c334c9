//! Database layer for Tally

mod connection;
mod migrations;
mod outbox_repository;
mod record_repository;
mod status_repository;

pub use connection::Database;
pub use outbox_repository::{OutboxDrain, OutboxRepository, Requeue, SqliteOutboxRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use status_repository::{SqliteSyncStatusRepository, SyncStatusRepository};
