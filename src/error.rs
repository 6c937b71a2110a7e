//! Error types surfaced through the manager's observation channel.
//!
//! Command-level misses (unknown identifier, no active operation) are `bool`
//! returns, not errors. Everything here is a background failure: it is
//! logged, handed to the manager observer, and never allowed to panic or to
//! cross the command boundary as a `Result`.

use thiserror::Error;

use crate::relocate::RelocateError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Failure while persisting or restoring transfer records.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The underlying key→bytes store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record or the identifier index could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Background failures reported to the manager observer.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The transport reported or returned a failure.
    #[error("transport error for transfer {identifier}: {source}")]
    Transport {
        /// Identifier of the affected transfer.
        identifier: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Moving a finished payload to its destination failed. The transfer
    /// itself succeeded; its state stays Finished.
    #[error("failed to relocate payload for transfer {identifier}: {source}")]
    Relocation {
        /// Identifier of the affected transfer.
        identifier: String,
        /// The underlying relocation error.
        #[source]
        source: RelocateError,
    },

    /// Persisting or deleting a transfer record failed.
    #[error("persistence error for transfer {identifier}: {source}")]
    Persistence {
        /// Identifier of the affected transfer.
        identifier: String,
        /// The underlying persistence error.
        #[source]
        source: PersistenceError,
    },
}

impl ManagerError {
    /// Identifier of the transfer the error belongs to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Transport { identifier, .. }
            | Self::Relocation { identifier, .. }
            | Self::Persistence { identifier, .. } => identifier,
        }
    }
}
