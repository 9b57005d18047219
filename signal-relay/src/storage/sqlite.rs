//! SQLite audit backend for signal-relay.

use super::{AuditStore, PairingRecord};
use crate::error::StorageError;
use async_trait::async_trait;
use signal_types::IdentityHash;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based audit log.
///
/// Uses WAL mode so appends never block readers.
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteAuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuditStore").finish_non_exhaustive()
    }
}

impl SqliteAuditStore {
    /// Open (or create) the audit database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory audit store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pairing_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                initiator_hash TEXT NOT NULL,
                target_hash TEXT NOT NULL,
                requested_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pairing_requested_at ON pairing_requests(requested_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PairingRow {
    initiator_hash: String,
    target_hash: String,
    requested_at: i64,
}

impl TryFrom<PairingRow> for PairingRecord {
    type Error = StorageError;

    fn try_from(row: PairingRow) -> Result<Self, Self::Error> {
        let decode = |hex: String| {
            IdentityHash::from_hex(hex).ok_or_else(|| {
                StorageError::Database(sqlx::Error::Decode("invalid identity hash".into()))
            })
        };
        Ok(PairingRecord {
            initiator: decode(row.initiator_hash)?,
            target: decode(row.target_hash)?,
            requested_at: row.requested_at,
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn record_pairing(&self, record: PairingRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO pairing_requests (initiator_hash, target_hash, requested_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(record.initiator.as_str())
        .bind(record.target.as_str())
        .bind(record.requested_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn recent_pairings(&self, limit: u32) -> Result<Vec<PairingRecord>, StorageError> {
        let rows = sqlx::query_as::<_, PairingRow>(
            r#"
            SELECT initiator_hash, target_hash, requested_at
            FROM pairing_requests
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn pairing_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pairing_requests")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(initiator: &str, target: &str, at: i64) -> PairingRecord {
        PairingRecord {
            initiator: IdentityHash::of(initiator),
            target: IdentityHash::of(target),
            requested_at: at,
        }
    }

    #[tokio::test]
    async fn records_are_appended_and_listed_newest_first() {
        let store = SqliteAuditStore::in_memory().await.unwrap();

        store
            .record_pairing(record("alice@example.com", "bob@example.com", 100))
            .await
            .unwrap();
        store
            .record_pairing(record("bob@example.com", "carol@example.com", 200))
            .await
            .unwrap();

        assert_eq!(store.pairing_count().await.unwrap(), 2);

        let recent = store.recent_pairings(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], record("bob@example.com", "carol@example.com", 200));
        assert_eq!(recent[1].requested_at, 100);
    }

    #[tokio::test]
    async fn recent_pairings_respects_limit() {
        let store = SqliteAuditStore::in_memory().await.unwrap();
        for i in 0..5 {
            store
                .record_pairing(record("a@b.c", "d@e.f", i))
                .await
                .unwrap();
        }
        let recent = store.recent_pairings(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].requested_at, 4);
    }

    #[tokio::test]
    async fn raw_identities_are_never_stored() {
        let store = SqliteAuditStore::in_memory().await.unwrap();
        store
            .record_pairing(record("alice@example.com", "bob@example.com", 1))
            .await
            .unwrap();

        let leaked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pairing_requests WHERE initiator_hash LIKE '%@%' OR target_hash LIKE '%@%'",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(leaked, 0);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");

        {
            let store = SqliteAuditStore::new(&path).await.unwrap();
            store
                .record_pairing(record("a@b.c", "d@e.f", 7))
                .await
                .unwrap();
        }

        let reopened = SqliteAuditStore::new(&path).await.unwrap();
        assert_eq!(reopened.pairing_count().await.unwrap(), 1);
    }
}
