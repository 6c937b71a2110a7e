//! Durable key→bytes storage for persisted transfer records.
//!
//! The engine only needs a flat store with last-write-wins semantics per
//! key; nothing transactional. Two implementations are provided:
//! [`MemoryStore`] for tests and ephemeral use, and [`SqliteStore`] for
//! durability across process restarts.

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from the persistence adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to run migrations when opening a SQLite store.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Flat durable key→bytes store consumed by the download manager.
///
/// Keys are unique; `put` overwrites. No guarantee is required beyond
/// last-write-wins per key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Deletes the value stored under `key`. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
