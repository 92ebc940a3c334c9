//! Sync status repository implementation

use crate::error::Result;
use crate::models::SyncStatus;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync metadata storage
pub trait SyncStatusRepository {
    /// Load the status, or defaults before the first sync attempt
    fn load(&self) -> Result<SyncStatus>;

    /// Persist the status (creates the row lazily)
    fn save(&self, status: &SyncStatus) -> Result<()>;
}

/// SQLite implementation of `SyncStatusRepository`
pub struct SqliteSyncStatusRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStatusRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStatusRepository for SqliteSyncStatusRepository<'_> {
    fn load(&self) -> Result<SyncStatus> {
        let status = self
            .conn
            .query_row(
                "SELECT last_sync, last_full_sync, sync_count, needs_full_sync,
                        abandoned_since_full_sync, snapshot_digest, snapshot_records
                 FROM sync_status WHERE id = 1",
                [],
                |row| {
                    Ok(SyncStatus {
                        last_sync: row.get(0)?,
                        last_full_sync: row.get(1)?,
                        sync_count: row.get(2)?,
                        needs_full_sync: row.get::<_, i32>(3)? != 0,
                        abandoned_since_full_sync: row.get(4)?,
                        snapshot_digest: row.get(5)?,
                        snapshot_records: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(status.unwrap_or_default())
    }

    fn save(&self, status: &SyncStatus) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_status (
                id, last_sync, last_full_sync, sync_count, needs_full_sync,
                abandoned_since_full_sync, snapshot_digest, snapshot_records
             ) VALUES (1, ?, ?, ?, ?, ?, ?, ?)",
            params![
                status.last_sync,
                status.last_full_sync,
                status.sync_count,
                i32::from(status.needs_full_sync),
                status.abandoned_since_full_sync,
                status.snapshot_digest,
                status.snapshot_records,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_defaults_before_first_sync() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStatusRepository::new(db.connection());
        assert_eq!(repo.load().unwrap(), SyncStatus::default());
    }

    #[test]
    fn test_save_and_load_status() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStatusRepository::new(db.connection());

        let status = SyncStatus {
            last_sync: Some(1_700_000_100),
            last_full_sync: Some(1_700_000_000),
            sync_count: 4,
            needs_full_sync: true,
            abandoned_since_full_sync: 2,
            snapshot_digest: Some("sha256:abc".to_string()),
            snapshot_records: 12,
        };
        repo.save(&status).unwrap();
        assert_eq!(repo.load().unwrap(), status);

        let updated = SyncStatus {
            sync_count: 5,
            ..status
        };
        repo.save(&updated).unwrap();
        assert_eq!(repo.load().unwrap().sync_count, 5);
    }
}
