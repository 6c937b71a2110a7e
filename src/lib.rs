//! Pullman Download Engine
//!
//! This library provides a client-side download manager: long-running
//! transfers with pause/resume, observable state and progress, durable
//! records that survive a restart, and relocation of finished payloads
//! into a configured directory layout.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`manager`] - Record collection, command surface, event application
//! - [`transfer`] - Per-transfer state machine, listeners, snapshots
//! - [`transport`] - Byte-moving backends and the callback event channel
//! - [`store`] - Key/value persistence backends
//! - [`relocate`] - Filesystem placement of finished payloads
//! - [`error`] - Manager-level error taxonomy

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod manager;
pub mod relocate;
pub mod store;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use error::{ManagerError, PersistenceError};
pub use manager::{DownloadManager, DownloadRequest, ManagerConfig, PersistedTransfer};
pub use relocate::{FileMover, LocalFileMover, RelocateError};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError};
pub use transfer::{
    DEFAULT_DIRECTORY_NAME, Listener, ManagerObserver, TransferObserver, TransferSnapshot,
    TransferState,
};
pub use transport::{
    EventSink, HttpTransport, TransferEvent, TransferEventKind, Transport, TransportError,
};
