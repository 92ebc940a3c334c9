//! Error types for tally-core

use thiserror::Error;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Local storage quota exhausted; retention cleanup must run first
    #[error("Local storage exhausted; run retention cleanup before writing again")]
    StorageExhausted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network failure talking to the reconciliation endpoint (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The reconciliation endpoint rejected the request
    #[error("Server rejected request: {0}")]
    Server(String),

    /// Full-sync payload digest did not match
    #[error("Integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

impl Error {
    /// Whether retrying the same request later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &error {
            if failure.code == rusqlite::ErrorCode::DiskFull {
                return Self::StorageExhausted;
            }
        }
        Self::Sqlite(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::Server(format!("invalid response body: {error}"));
        }
        match error.status() {
            Some(status) if status.is_client_error() => Self::Server(error.to_string()),
            _ => Self::Transport(error.to_string()),
        }
    }
}
