//! Async services shared by the CLI and the sync engine.

mod local_store;

pub use local_store::{LocalStore, MergeSummary};
