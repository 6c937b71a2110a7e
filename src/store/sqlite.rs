//! SQLite-backed record store.
//!
//! Persisted transfer records are small JSON blobs, so a single key/value
//! table is enough. WAL mode is enabled for file databases so restore reads
//! do not block pause-time writes.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::instrument;

use super::{RecordStore, StoreError};

/// Maximum connections in the pool. Kept low for SQLite since it uses
/// file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds. Connections wait this long before
/// returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Durable [`RecordStore`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) a store at the given database path.
    ///
    /// Enables WAL mode, sets a busy timeout, and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails, or
    /// [`StoreError::Migration`] if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // WAL mode for concurrent reads
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory store for testing.
    ///
    /// The database exists only for the lifetime of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails, or
    /// [`StoreError::Migration`] if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Gracefully closes all connections in the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO records (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.put("transfer:a", &[0, 255, 7]).await.unwrap();
        assert_eq!(store.get("transfer:a").await.unwrap(), Some(vec![0, 255, 7]));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.put("k", b"old").await.unwrap();
        store.put("k", b"new").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_and_is_idempotent() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.put("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let store = SqliteStore::new(&path).await.unwrap();
        store.put("k", b"v").await.unwrap();
        store.close().await;

        let reopened = SqliteStore::new(&path).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
