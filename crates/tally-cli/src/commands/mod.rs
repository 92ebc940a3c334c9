pub mod cleanup;
pub mod common;
pub mod config;
pub mod outbox;
pub mod records;
pub mod sync;
pub mod watch;
