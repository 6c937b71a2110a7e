//! Relocation of completed payloads to their final destination.
//!
//! Transports write incoming bytes to a scratch location; when a transfer
//! finishes, the manager moves the payload to
//! `<downloads_root>/<directory>/<file name>`. The move overwrites any
//! pre-existing file at the destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors from file relocation.
#[derive(Debug, Error)]
pub enum RelocateError {
    /// Failed to create the destination directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the payload into place.
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        /// Source path of the payload.
        from: PathBuf,
        /// Intended destination path.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem mover consumed by the download manager at completion time.
#[async_trait]
pub trait FileMover: Send + Sync {
    /// Creates `path` (and any missing parents) if it does not exist.
    async fn ensure_directory(&self, path: &Path) -> Result<(), RelocateError>;

    /// Moves `from` to `to`, overwriting any existing file at `to`.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), RelocateError>;
}

/// [`FileMover`] operating on the local filesystem.
///
/// Uses rename when source and destination share a filesystem and falls
/// back to copy-then-remove across devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileMover;

impl LocalFileMover {
    /// Creates a new mover.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileMover for LocalFileMover {
    async fn ensure_directory(&self, path: &Path) -> Result<(), RelocateError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| RelocateError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), RelocateError> {
        if tokio::fs::rename(from, to).await.is_ok() {
            debug!(from = %from.display(), to = %to.display(), "payload renamed into place");
            return Ok(());
        }

        // Rename fails across filesystems; copy then remove the scratch file.
        tokio::fs::copy(from, to)
            .await
            .map_err(|source| RelocateError::Move {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
        if let Err(error) = tokio::fs::remove_file(from).await {
            debug!(path = %from.display(), error = %error, "failed to remove scratch file after copy");
        }
        debug!(from = %from.display(), to = %to.display(), "payload copied into place");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_directory_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        LocalFileMover::new().ensure_directory(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_directory_existing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mover = LocalFileMover::new();
        mover.ensure_directory(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_move_file_relocates_payload() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("scratch.part");
        let to = dir.path().join("final.bin");
        tokio::fs::write(&from, b"payload").await.unwrap();

        LocalFileMover::new().move_file(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("scratch.part");
        let to = dir.path().join("final.bin");
        tokio::fs::write(&from, b"new").await.unwrap();
        tokio::fs::write(&to, b"old").await.unwrap();

        LocalFileMover::new().move_file(&from, &to).await.unwrap();
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_move_file_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("missing.part");
        let to = dir.path().join("final.bin");

        let result = LocalFileMover::new().move_file(&from, &to).await;
        assert!(matches!(result, Err(RelocateError::Move { .. })));
    }
}
