//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn)?;
    }

    tracing::info!(from = version, to = CURRENT_VERSION, "Local schema migrated");
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: records, outbox, and sync metadata
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            last_modified_locally INTEGER NOT NULL,
            last_server_version TEXT,
            user_id TEXT,
            date TEXT,
            categoria TEXT,
            active INTEGER,
            read INTEGER,
            PRIMARY KEY (collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_synced ON records(collection, synced);
        CREATE INDEX IF NOT EXISTS idx_records_user ON records(collection, user_id);
        CREATE INDEX IF NOT EXISTS idx_records_date ON records(collection, date DESC);
        CREATE INDEX IF NOT EXISTS idx_records_categoria ON records(collection, categoria);
        CREATE INDEX IF NOT EXISTS idx_records_active ON records(collection, active);
        CREATE INDEX IF NOT EXISTS idx_records_read ON records(collection, read);

        CREATE TABLE IF NOT EXISTS outbox (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL,
            record_id TEXT,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_target ON outbox(collection, record_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_enqueued ON outbox(enqueued_at);

        CREATE TABLE IF NOT EXISTS sync_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync INTEGER,
            last_full_sync INTEGER,
            sync_count INTEGER NOT NULL DEFAULT 0,
            needs_full_sync INTEGER NOT NULL DEFAULT 0,
            abandoned_since_full_sync INTEGER NOT NULL DEFAULT 0,
            snapshot_digest TEXT,
            snapshot_records INTEGER NOT NULL DEFAULT 0
        );

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::debug!("Applied schema migration v1");
    Ok(())
}
