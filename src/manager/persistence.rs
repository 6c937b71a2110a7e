//! Durable layout for transfer records.
//!
//! One entry per identifier under `transfer:<identifier>` plus one index
//! entry under [`INDEX_KEY`] listing every known identifier in order. The
//! `Paused` resume blob is the only field that must round-trip with exact
//! binary fidelity; everything else is plain structural JSON.

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::transfer::{Transfer, TransferState};

/// Well-known key holding the ordered identifier list.
pub(crate) const INDEX_KEY: &str = "transfer-index";

/// Store key for one transfer record.
pub(crate) fn record_key(identifier: &str) -> String {
    format!("transfer:{identifier}")
}

/// Serialized form of a transfer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTransfer {
    /// Unique identifier.
    pub identifier: String,
    /// Source URL, stored as a string so the request can be reconstructed.
    pub source: String,
    /// State at persist time, including any resume blob.
    pub state: TransferState,
    /// One-step state history.
    pub last_state: TransferState,
    /// Total bytes written by the attempt being persisted.
    pub total_bytes_written: u64,
    /// Expected total bytes; 0 means unknown.
    pub total_bytes_expected: u64,
    /// Destination file name.
    pub file_name: String,
    /// Destination directory name.
    pub directory_name: String,
}

impl PersistedTransfer {
    /// Captures the persistable fields of a live record.
    #[must_use]
    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self {
            identifier: transfer.identifier().to_string(),
            source: transfer.source().to_string(),
            state: transfer.state().clone(),
            last_state: transfer.last_state().clone(),
            total_bytes_written: transfer.total_bytes_written(),
            total_bytes_expected: transfer.total_bytes_expected(),
            file_name: transfer.file_name().to_string(),
            directory_name: transfer.directory_name().to_string(),
        }
    }

    /// Rebuilds an in-memory record, state restored verbatim.
    ///
    /// Returns `None` when the stored URL no longer parses; the caller
    /// skips such records rather than failing the whole restore.
    #[must_use]
    pub(crate) fn into_transfer(self) -> Option<Transfer> {
        let source = match Url::parse(&self.source) {
            Ok(url) => url,
            Err(error) => {
                warn!(
                    identifier = %self.identifier,
                    source = %self.source,
                    error = %error,
                    "skipping persisted record with unparseable source URL"
                );
                return None;
            }
        };
        Some(Transfer::restored(
            self.identifier,
            source,
            self.file_name,
            self.directory_name,
            self.state,
            self.last_state,
            self.total_bytes_written,
            self.total_bytes_expected,
        ))
    }
}
