//! Outbox entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Collection;
use crate::error::Error;

/// Identifier of a pending mutation, using UUID v7 (time-sortable).
///
/// Also sent to the server as the idempotency key of the upload item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxEntryId(Uuid);

impl OutboxEntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OutboxEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxOperation {
    Insert,
    Update,
    Delete,
}

impl OutboxOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OutboxOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// A mutation waiting for server acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique identifier / idempotency key
    pub id: OutboxEntryId,
    /// Local enqueue sequence; defines FIFO replay order
    pub seq: i64,
    /// Target collection
    pub collection: Collection,
    /// Target record id, when the payload names one
    pub record_id: Option<String>,
    /// Mutation kind
    pub operation: OutboxOperation,
    /// Mutation body
    pub payload: Value,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_unique_and_parse_back() {
        let first = OutboxEntryId::new();
        let second = OutboxEntryId::new();
        assert_ne!(first, second);
        assert_eq!(first.as_str().parse::<OutboxEntryId>().unwrap(), first);
    }

    #[test]
    fn operation_parses_case_insensitively() {
        assert_eq!(
            "update".parse::<OutboxOperation>().unwrap(),
            OutboxOperation::Update
        );
        assert!("upsert".parse::<OutboxOperation>().is_err());
    }
}
