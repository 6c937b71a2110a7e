//! Transport adapter boundary.
//!
//! The engine never performs network I/O itself. It hands operations to a
//! [`Transport`] and receives asynchronous [`TransferEvent`]s back through an
//! [`EventSink`]. The sink holds a non-owning reference to the manager, so a
//! transport outliving its manager delivers into the void instead of keeping
//! the manager alive.
//!
//! A reqwest-backed adapter, [`HttpTransport`], is provided; the manager only
//! depends on the trait.

use std::path::PathBuf;
use std::sync::Weak;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

mod http;

pub use http::HttpTransport;

/// Errors reported by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level failure (DNS, connection refused, TLS, timeout).
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL being transferred.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// The URL being transferred.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Filesystem error while writing the scratch payload.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Scratch path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Resume data could not be decoded into a restartable operation.
    #[error("invalid resume data: {reason}")]
    InvalidResumeData {
        /// Why the blob was rejected.
        reason: String,
    },

    /// A pause/cancel request named an identifier with no running operation.
    #[error("no active operation for {identifier}")]
    NoOperation {
        /// The identifier that had no operation.
        identifier: String,
    },
}

/// Asynchronous callback from a transport operation.
#[derive(Debug)]
pub struct TransferEvent {
    /// Identifier of the transfer the operation belongs to.
    pub identifier: String,
    /// What happened.
    pub kind: TransferEventKind,
}

/// The payload of a [`TransferEvent`].
#[derive(Debug)]
pub enum TransferEventKind {
    /// Bytes arrived. `expected == 0` means the total is unknown.
    BytesWritten {
        /// Total bytes written so far for this operation.
        written: u64,
        /// Expected total bytes, or 0 when unknown.
        expected: u64,
    },
    /// The operation finished; the payload sits at `temp_path`.
    Completed {
        /// Scratch location of the complete payload.
        temp_path: PathBuf,
    },
    /// A pause request resolved. `None` means the transport cannot produce
    /// resume data and the transfer must be treated as cancelled.
    Paused {
        /// Opaque blob sufficient to restart the transfer, if supported.
        resume_data: Option<Vec<u8>>,
    },
    /// The operation failed and will not make further progress.
    Failed {
        /// What went wrong.
        error: TransportError,
    },
    /// A resumed operation re-attached at the given offset. Informational.
    ResumedAtOffset {
        /// Byte offset the operation resumed from.
        offset: u64,
        /// Expected total bytes, or 0 when unknown.
        expected: u64,
    },
    /// The transport flushed queued delivery after a relaunch. No-op hook.
    SessionFlushed,
}

impl TransferEvent {
    /// Convenience constructor.
    #[must_use]
    pub fn new(identifier: impl Into<String>, kind: TransferEventKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
        }
    }
}

/// Internal receiver of transport events. Implemented by the manager.
#[async_trait]
pub(crate) trait EventConsumer: Send + Sync {
    async fn consume(&self, event: TransferEvent);
}

/// Delivery handle a transport uses to report events for an operation.
///
/// Cloneable and cheap. Holds a weak reference: delivery after the manager
/// has been dropped is a silent no-op.
#[derive(Clone)]
pub struct EventSink {
    consumer: Weak<dyn EventConsumer>,
}

impl EventSink {
    pub(crate) fn new(consumer: Weak<dyn EventConsumer>) -> Self {
        Self { consumer }
    }

    /// Delivers one event to the owning manager, if it is still alive.
    pub async fn deliver(&self, event: TransferEvent) {
        if let Some(consumer) = self.consumer.upgrade() {
            consumer.consume(event).await;
        } else {
            debug!(identifier = %event.identifier, "dropping event for released manager");
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// The resumable-transfer capability the engine is built on.
///
/// `start`/`resume` are dispatch-only: they return once the operation has
/// been accepted, and progress, completion, pause resolution, and failure
/// arrive later through the [`EventSink`]. `pause` resolves asynchronously
/// with a [`TransferEventKind::Paused`] event; `cancel` stops the operation
/// without retaining resume state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begins a fresh transfer of `source` under `identifier`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the operation cannot be dispatched.
    async fn start(
        &self,
        identifier: &str,
        source: &Url,
        sink: EventSink,
    ) -> Result<(), TransportError>;

    /// Restarts a transfer from opaque resume data previously produced by a
    /// pause on this transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the blob is invalid or the operation
    /// cannot be dispatched.
    async fn resume(
        &self,
        identifier: &str,
        resume_data: &[u8],
        sink: EventSink,
    ) -> Result<(), TransportError>;

    /// Requests that the running operation halt and yield resume data.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoOperation`] if nothing is running under
    /// `identifier`.
    async fn pause(&self, identifier: &str) -> Result<(), TransportError>;

    /// Requests termination of the running operation. No resume data is
    /// retained.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoOperation`] if nothing is running under
    /// `identifier`.
    async fn cancel(&self, identifier: &str) -> Result<(), TransportError>;
}
