use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record payload must be a JSON object")]
    PayloadNotObject,
    #[error("Record id cannot be empty")]
    EmptyRecordId,
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync cycle did not complete: {0}")]
    SyncInterrupted(String),
    #[error(
        "Sync is not configured. Run `tally config init --api-base-url <URL> --token <TOKEN>` first."
    )]
    SyncNotConfigured,
}
