//! Outbox queue repository

use crate::error::{Error, Result};
use crate::models::{payload_id, Collection, OutboxEntry, OutboxEntryId, OutboxOperation};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::record_repository::SqliteRecordRepository;

/// Result of asking the queue to retry an entry later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Retry count incremented to the contained value
    Requeued(u32),
    /// The entry already sits at the ceiling; nothing changed
    CeilingReached(u32),
}

/// Trait for the durable mutation log
pub trait OutboxRepository {
    /// Append a mutation; returns its id
    fn enqueue(
        &self,
        collection: Collection,
        operation: OutboxOperation,
        payload: &Value,
    ) -> Result<OutboxEntryId>;

    /// Up to `limit` entries with `seq > after_seq`, in FIFO order
    fn batch_after(&self, after_seq: i64, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Remove an entry after server acknowledgment
    fn acknowledge(&self, id: &OutboxEntryId) -> Result<bool>;

    /// Increment the retry count, unless it already reached `ceiling`
    fn requeue(&self, id: &OutboxEntryId, ceiling: u32) -> Result<Requeue>;

    /// Drop an entry without acknowledgment (rejected or abandoned)
    fn remove(&self, id: &OutboxEntryId) -> Result<bool>;

    /// Fetch one entry
    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>>;

    /// Pending entries targeting one record, in FIFO order
    fn pending_for(&self, collection: Collection, record_id: &str) -> Result<Vec<OutboxEntry>>;

    /// Number of pending entries
    fn len(&self) -> Result<usize>;

    /// Whether nothing is pending
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The oldest `limit` pending entries
    fn list(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.batch_after(0, limit)
    }
}

/// SQLite implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

const ENTRY_COLUMNS: &str =
    "seq, id, collection, record_id, operation, payload, enqueued_at, retry_count";

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Lazily walk the queue in FIFO batches of at most `batch_size`.
    ///
    /// The walk is finite (it ends after the last entry that existed when a
    /// batch was read) and restartable: calling `drain` again starts over
    /// from the oldest entry still pending.
    pub fn drain(&self, batch_size: usize) -> OutboxDrain<'_, 'a> {
        OutboxDrain {
            repo: self,
            after_seq: 0,
            batch_size: batch_size.max(1),
            done: false,
        }
    }

    fn delete_entry(&self, id: &OutboxEntryId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let target: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT collection, record_id FROM outbox WHERE id = ?",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((collection, record_id)) = target else {
            return Ok(false);
        };

        tx.execute("DELETE FROM outbox WHERE id = ?", params![id.as_str()])?;
        if let Some(record_id) = record_id {
            let collection: Collection = collection.parse()?;
            SqliteRecordRepository::new(&tx).refresh_synced(collection, &record_id)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
        let id: String = row.get(1)?;
        let collection: String = row.get(2)?;
        let operation: String = row.get(4)?;
        let payload: String = row.get(5)?;
        Ok(OutboxEntry {
            seq: row.get(0)?,
            id: id.parse().map_err(|error| conversion_error(1, error))?,
            collection: collection
                .parse()
                .map_err(|error| conversion_error(2, error))?,
            record_id: row.get(3)?,
            operation: operation
                .parse()
                .map_err(|error| conversion_error(4, error))?,
            payload: serde_json::from_str(&payload).map_err(|error| conversion_error(5, error))?,
            enqueued_at: row.get(6)?,
            retry_count: row.get(7)?,
        })
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn enqueue(
        &self,
        collection: Collection,
        operation: OutboxOperation,
        payload: &Value,
    ) -> Result<OutboxEntryId> {
        if !payload.is_object() {
            return Err(Error::InvalidInput(
                "outbox payload must be a JSON object".to_string(),
            ));
        }

        let id = OutboxEntryId::new();
        self.conn.execute(
            "INSERT INTO outbox (id, collection, record_id, operation, payload, enqueued_at, retry_count)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
            params![
                id.as_str(),
                collection.as_str(),
                payload_id(payload),
                operation.as_str(),
                serde_json::to_string(payload)?,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(id)
    }

    fn batch_after(&self, after_seq: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM outbox WHERE seq > ? ORDER BY seq ASC LIMIT ?"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = stmt
            .query_map(params![after_seq, limit], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn acknowledge(&self, id: &OutboxEntryId) -> Result<bool> {
        self.delete_entry(id)
    }

    fn requeue(&self, id: &OutboxEntryId, ceiling: u32) -> Result<Requeue> {
        let current: u32 = self
            .conn
            .query_row(
                "SELECT retry_count FROM outbox WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("outbox entry {id}")))?;

        if current >= ceiling {
            return Ok(Requeue::CeilingReached(current));
        }

        self.conn.execute(
            "UPDATE outbox SET retry_count = retry_count + 1 WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(Requeue::Requeued(current + 1))
    }

    fn remove(&self, id: &OutboxEntryId) -> Result<bool> {
        self.delete_entry(id)
    }

    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM outbox WHERE id = ?"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn pending_for(&self, collection: Collection, record_id: &str) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM outbox
             WHERE collection = ? AND record_id = ?
             ORDER BY seq ASC"
        ))?;
        let entries = stmt
            .query_map(params![collection.as_str(), record_id], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn len(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?)
    }
}

/// Lazy FIFO walk over the outbox, see [`SqliteOutboxRepository::drain`]
pub struct OutboxDrain<'r, 'c> {
    repo: &'r SqliteOutboxRepository<'c>,
    after_seq: i64,
    batch_size: usize,
    done: bool,
}

impl Iterator for OutboxDrain<'_, '_> {
    type Item = Result<Vec<OutboxEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.repo.batch_after(self.after_seq, self.batch_size) {
            Ok(batch) if batch.is_empty() => {
                self.done = true;
                None
            }
            Ok(batch) => {
                if batch.len() < self.batch_size {
                    self.done = true;
                }
                if let Some(last) = batch.last() {
                    self.after_seq = last.seq;
                }
                Some(Ok(batch))
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
