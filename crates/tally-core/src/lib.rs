//! tally-core - Core library for Tally
//!
//! This crate contains the local store, outbox queue, and sync engine shared
//! by the Tally API and CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{Collection, OutboxEntry, OutboxEntryId, OutboxOperation, Record, SyncStatus};
pub use services::LocalStore;
pub use state::{SyncNotice, SyncState};
