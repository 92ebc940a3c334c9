//! Record repository implementation

use crate::error::Result;
use crate::models::{Collection, Record};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// Trait for per-collection record storage
pub trait RecordRepository {
    /// Insert or replace a record (merge-by-replace)
    fn put(&self, record: &Record) -> Result<()>;

    /// Get a record by collection and id
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>>;

    /// All records of a collection
    fn get_all(&self, collection: Collection) -> Result<Vec<Record>>;

    /// Remove a record; returns whether it existed
    fn delete(&self, collection: Collection, id: &str) -> Result<bool>;

    /// Number of records in a collection
    fn count(&self, collection: Collection) -> Result<usize>;

    /// Drop synced records last modified before `cutoff_ms`
    fn purge_synced_older_than(&self, cutoff_ms: i64) -> Result<usize>;

    /// Replace the synced contents of a collection with `records`.
    ///
    /// Unsynced local records survive. Returns how many records were dropped.
    fn replace_collection(&self, collection: Collection, records: &[Record]) -> Result<usize>;
}

/// SQLite implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str =
    "collection, id, payload, synced, last_modified_locally, last_server_version";

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// `replace_collection` on the caller's transaction, so several
    /// collections can be replaced atomically.
    pub fn replace_rows(&self, collection: Collection, records: &[Record]) -> Result<usize> {
        self.conn.execute(
            "CREATE TEMP TABLE IF NOT EXISTS incoming_ids (id TEXT PRIMARY KEY)",
            [],
        )?;
        self.conn.execute("DELETE FROM incoming_ids", [])?;
        for record in records {
            self.conn.execute(
                "INSERT OR IGNORE INTO incoming_ids (id) VALUES (?)",
                params![record.id],
            )?;
        }

        let dropped = self.conn.execute(
            "DELETE FROM records
             WHERE collection = ? AND synced = 1 AND id NOT IN (SELECT id FROM incoming_ids)",
            params![collection.as_str()],
        )?;

        for record in records {
            Self::insert_or_replace(self.conn, record)?;
        }
        self.conn.execute("DELETE FROM incoming_ids", [])?;
        Ok(dropped)
    }

    /// Recompute `synced` from the outbox for one record
    pub fn refresh_synced(&self, collection: Collection, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE records SET synced = NOT EXISTS(
                SELECT 1 FROM outbox WHERE outbox.collection = ?1 AND outbox.record_id = ?2
             )
             WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;
        Ok(())
    }

    /// Whether any outbox entry still targets the record
    pub fn has_pending(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM outbox WHERE collection = ? AND record_id = ?)",
            params![collection.as_str(), id],
            |row| row.get(0),
        )?)
    }

    fn insert_or_replace(conn: &Connection, record: &Record) -> Result<()> {
        let index = IndexFields::from_payload(&record.payload);
        conn.execute(
            "INSERT OR REPLACE INTO records (
                collection, id, payload, synced, last_modified_locally, last_server_version,
                user_id, date, categoria, active, read
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.collection.as_str(),
                record.id,
                serde_json::to_string(&record.payload)?,
                i32::from(record.synced),
                record.last_modified_locally,
                record.last_server_version,
                index.user_id,
                index.date,
                index.categoria,
                index.active.map(i32::from),
                index.read.map(i32::from),
            ],
        )?;
        Ok(())
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let collection: String = row.get(0)?;
        let payload: String = row.get(2)?;
        Ok(Record {
            collection: collection.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown collection {collection}").into(),
                )
            })?,
            id: row.get(1)?,
            payload: serde_json::from_str(&payload).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            synced: row.get::<_, i32>(3)? != 0,
            last_modified_locally: row.get(4)?,
            last_server_version: row.get(5)?,
        })
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn put(&self, record: &Record) -> Result<()> {
        Self::insert_or_replace(self.conn, record)
    }

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?"),
                params![collection.as_str(), id],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE collection = ?
             ORDER BY date DESC, id ASC"
        ))?;

        let records = stmt
            .query_map(params![collection.as_str()], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![collection.as_str(), id],
        )?;
        Ok(rows > 0)
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?",
            params![collection.as_str()],
            |row| row.get(0),
        )?)
    }

    fn purge_synced_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE synced = 1 AND last_modified_locally < ?",
            params![cutoff_ms],
        )?;
        Ok(rows)
    }

    fn replace_collection(&self, collection: Collection, records: &[Record]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let dropped = SqliteRecordRepository::new(&tx).replace_rows(collection, records)?;
        tx.commit()?;
        Ok(dropped)
    }
}

/// Secondary index columns pulled out of a payload
#[derive(Debug, Default, PartialEq, Eq)]
struct IndexFields {
    user_id: Option<String>,
    date: Option<String>,
    categoria: Option<String>,
    active: Option<bool>,
    read: Option<bool>,
}

impl IndexFields {
    fn from_payload(payload: &Value) -> Self {
        Self {
            user_id: payload.get("userId").and_then(scalar_text),
            date: payload.get("date").and_then(scalar_text),
            categoria: payload.get("categoria").and_then(scalar_text),
            active: payload.get("active").and_then(Value::as_bool),
            read: payload.get("read").and_then(Value::as_bool),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
