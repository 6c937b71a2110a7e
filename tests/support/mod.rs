//! Shared fixtures for integration tests: a scriptable transport, a
//! recording observer, and manager construction helpers.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

use pullman::{
    DownloadManager, EventSink, LocalFileMover, ManagerConfig, ManagerError, MemoryStore,
    TransferEvent, TransferEventKind, TransferSnapshot, TransferState, Transport, TransportError,
};

/// One dispatched transport call, for asserting command routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Start { identifier: String, source: String },
    Resume { identifier: String, resume_data: Vec<u8> },
    Pause { identifier: String },
    Cancel { identifier: String },
}

/// Transport that records calls and lets tests emit events by hand.
///
/// `start`/`resume` capture the sink per identifier; tests then drive the
/// manager through [`MockTransport::emit`]. Events are applied before
/// `emit` returns, so assertions can follow it directly.
#[derive(Default)]
pub struct MockTransport {
    sinks: DashMap<String, EventSink>,
    calls: Mutex<Vec<TransportCall>>,
    fail_dispatch: std::sync::atomic::AtomicBool,
    dispatch_gate: Mutex<Option<(Arc<tokio::sync::Notify>, Arc<tokio::sync::Notify>)>>,
}

/// Handle to a held dispatch; see [`MockTransport::hold_dispatch`].
pub struct DispatchHold {
    reached: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

impl DispatchHold {
    /// Waits until the held `start`/`resume` call has entered the transport.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the held dispatch proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `start`/`resume` call block inside the transport until
    /// released, so a test can interleave commands mid-dispatch. One-shot.
    pub fn hold_dispatch(&self) -> DispatchHold {
        let reached = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        *self.dispatch_gate.lock().unwrap() = Some((reached.clone(), release.clone()));
        DispatchHold { reached, release }
    }

    async fn wait_if_held(&self) {
        let gate = self.dispatch_gate.lock().unwrap().take();
        if let Some((reached, release)) = gate {
            reached.notify_one();
            release.notified().await;
        }
    }

    /// Makes subsequent `start`/`resume` calls return an error.
    pub fn fail_dispatch(&self, fail: bool) {
        self.fail_dispatch
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Delivers an event for `identifier` through its captured sink.
    ///
    /// # Panics
    ///
    /// Panics if no operation was ever dispatched under `identifier`.
    pub async fn emit(&self, identifier: &str, kind: TransferEventKind) {
        let sink = self
            .sinks
            .get(identifier)
            .map(|entry| entry.value().clone())
            .expect("no sink captured for identifier");
        sink.deliver(TransferEvent::new(identifier, kind)).await;
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn dispatch_error(&self, identifier: &str) -> Option<TransportError> {
        if self.fail_dispatch.load(std::sync::atomic::Ordering::SeqCst) {
            Some(TransportError::NoOperation {
                identifier: identifier.to_string(),
            })
        } else {
            None
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(
        &self,
        identifier: &str,
        source: &Url,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        self.wait_if_held().await;
        self.record(TransportCall::Start {
            identifier: identifier.to_string(),
            source: source.to_string(),
        });
        if let Some(error) = self.dispatch_error(identifier) {
            return Err(error);
        }
        self.sinks.insert(identifier.to_string(), sink);
        Ok(())
    }

    async fn resume(
        &self,
        identifier: &str,
        resume_data: &[u8],
        sink: EventSink,
    ) -> Result<(), TransportError> {
        self.wait_if_held().await;
        self.record(TransportCall::Resume {
            identifier: identifier.to_string(),
            resume_data: resume_data.to_vec(),
        });
        if let Some(error) = self.dispatch_error(identifier) {
            return Err(error);
        }
        self.sinks.insert(identifier.to_string(), sink);
        Ok(())
    }

    async fn pause(&self, identifier: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Pause {
            identifier: identifier.to_string(),
        });
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Cancel {
            identifier: identifier.to_string(),
        });
        Ok(())
    }
}

/// Manager-level observer that records everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<(String, TransferState, TransferState)>>,
    pub progress: Mutex<Vec<(String, u64, u64)>>,
    pub finished: Mutex<Vec<(String, PathBuf)>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state_pairs(&self, identifier: &str) -> Vec<(TransferState, TransferState)> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == identifier)
            .map(|(_, from, to)| (from.clone(), to.clone()))
            .collect()
    }

    pub fn last_progress(&self, identifier: &str) -> Option<(u64, u64)> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == identifier)
            .map(|(_, written, expected)| (*written, *expected))
    }
}

impl pullman::ManagerObserver for RecordingObserver {
    fn state_changed(
        &self,
        transfer: &TransferSnapshot,
        from: &TransferState,
        to: &TransferState,
    ) {
        self.states
            .lock()
            .unwrap()
            .push((transfer.identifier.clone(), from.clone(), to.clone()));
    }

    fn progress_changed(&self, transfer: &TransferSnapshot, written: u64, expected: u64) {
        self.progress
            .lock()
            .unwrap()
            .push((transfer.identifier.clone(), written, expected));
    }

    fn finished(&self, transfer: &TransferSnapshot, final_path: &std::path::Path) {
        self.finished
            .lock()
            .unwrap()
            .push((transfer.identifier.clone(), final_path.to_path_buf()));
    }

    fn error(&self, error: &ManagerError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Installs a tracing subscriber honoring `RUST_LOG`, quiet by default.
/// Later calls are no-ops, so every fixture can invoke it.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A manager over the mock transport, an in-memory store, and a tempdir
/// downloads root. The tempdir guard must outlive the manager.
pub fn manager_fixture() -> (DownloadManager, Arc<MockTransport>, Arc<MemoryStore>, tempfile::TempDir) {
    init_tracing();
    let transport = MockTransport::new();
    let store = Arc::new(MemoryStore::new());
    let root = tempfile::TempDir::new().expect("tempdir");
    let manager = DownloadManager::new(
        transport.clone(),
        store.clone(),
        Arc::new(LocalFileMover::new()),
        ManagerConfig::new(root.path()),
    );
    (manager, transport, store, root)
}

pub fn test_url(path: &str) -> Url {
    Url::parse(&format!("https://files.example.com{path}")).expect("valid url")
}
