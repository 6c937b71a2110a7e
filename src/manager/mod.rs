//! Download manager: owns the record collection, routes commands to
//! individual transfers, applies transport callbacks, and drives
//! persistence and payload relocation.
//!
//! # Concurrency model
//!
//! Two actors touch a record: the control path (command calls, any task)
//! and the callback path (events delivered by the transport's own tasks
//! through an [`EventSink`]). Both funnel through one manager-level mutex,
//! so a command and a concurrent callback for the same identifier can never
//! interleave into an inconsistent `state`/`last_state`/counter combination.
//! The mutex is never held across a store or mover await, and `*_all`
//! operations take it per record, not across the whole batch.
//!
//! Notifications run synchronously with the mutation that caused them, on
//! whichever task performed it. Observers must not call back into the
//! manager and should marshal to their own context for anything slow.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pullman::{
//!     DownloadManager, DownloadRequest, HttpTransport, LocalFileMover, ManagerConfig,
//!     MemoryStore,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(
//!     Arc::new(HttpTransport::new("./scratch")),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(LocalFileMover::new()),
//!     ManagerConfig::new("./files"),
//! );
//! let source = url::Url::parse("https://example.com/big.iso")?;
//! manager.download(DownloadRequest::new(source, "big-iso")).await;
//! manager.pause("big-iso").await;
//! # Ok(())
//! # }
//! ```

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{ManagerError, PersistenceError};
use crate::relocate::FileMover;
use crate::store::RecordStore;
use crate::transfer::{
    DEFAULT_DIRECTORY_NAME, Listener, ManagerObserver, Transfer, TransferObserver,
    TransferSnapshot, TransferState,
};
use crate::transport::{EventConsumer, EventSink, TransferEvent, TransferEventKind, Transport};

mod persistence;

pub use persistence::PersistedTransfer;

use persistence::{INDEX_KEY, record_key};

/// Manager construction parameters.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root under which finished payloads are placed.
    pub downloads_root: PathBuf,
    /// Directory name used for transfers that do not supply one.
    pub default_directory_name: String,
    /// Drop a record from the collection after it finishes successfully.
    pub remove_finished: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from("."),
            default_directory_name: DEFAULT_DIRECTORY_NAME.to_string(),
            remove_finished: false,
        }
    }
}

impl ManagerConfig {
    /// Creates a config rooted at `downloads_root`, everything else default.
    #[must_use]
    pub fn new(downloads_root: impl Into<PathBuf>) -> Self {
        Self {
            downloads_root: downloads_root.into(),
            ..Self::default()
        }
    }

    /// Overrides the default destination directory name.
    #[must_use]
    pub fn default_directory_name(mut self, name: impl Into<String>) -> Self {
        self.default_directory_name = name.into();
        self
    }

    /// Drops records from the collection after successful completion.
    #[must_use]
    pub fn remove_finished(mut self, remove: bool) -> Self {
        self.remove_finished = remove;
        self
    }
}

/// Parameters for [`DownloadManager::download`].
#[derive(Debug)]
pub struct DownloadRequest {
    source: Url,
    identifier: String,
    file_name: Option<String>,
    directory_name: Option<String>,
    user_info: HashMap<String, serde_json::Value>,
    listener: Option<Listener>,
}

impl DownloadRequest {
    /// Creates a request fetching `source` under `identifier`.
    #[must_use]
    pub fn new(source: Url, identifier: impl Into<String>) -> Self {
        Self {
            source,
            identifier: identifier.into(),
            file_name: None,
            directory_name: None,
            user_info: HashMap::new(),
            listener: None,
        }
    }

    /// Destination file name; defaults to the source URL's last segment.
    #[must_use]
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Destination directory name; defaults to the manager's configured one.
    #[must_use]
    pub fn directory_name(mut self, name: impl Into<String>) -> Self {
        self.directory_name = Some(name.into());
        self
    }

    /// Opaque caller metadata carried on the record.
    #[must_use]
    pub fn user_info(mut self, user_info: HashMap<String, serde_json::Value>) -> Self {
        self.user_info = user_info;
        self
    }

    /// Listener attached before the transfer starts.
    #[must_use]
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }
}

/// What `resume` hands to the transport once the record is in `Waiting`.
enum Dispatch {
    Fresh(Url),
    FromBlob(Vec<u8>),
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn RecordStore>,
    mover: Arc<dyn FileMover>,
    config: ManagerConfig,
    records: Mutex<BTreeMap<String, Transfer>>,
    observer: RwLock<Option<Arc<dyn ManagerObserver>>>,
    self_weak: Weak<ManagerInner>,
}

/// The download-lifecycle engine.
///
/// Explicitly constructed and explicitly passed; there is no process-wide
/// shared instance. Cloning is cheap and shares the same record collection.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    /// Creates a manager over the given transport, store, and mover.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn RecordStore>,
        mover: Arc<dyn FileMover>,
        config: ManagerConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| ManagerInner {
            transport,
            store,
            mover,
            config,
            records: Mutex::new(BTreeMap::new()),
            observer: RwLock::new(None),
            self_weak: weak.clone(),
        });
        Self { inner }
    }

    /// Installs the manager-level observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn ManagerObserver>) {
        if let Ok(mut slot) = self.inner.observer.write() {
            *slot = Some(observer);
        }
    }

    /// Creates the record for `request` if its identifier is new, attaches
    /// the listener, and resumes it. An existing identifier is reused, not
    /// duplicated.
    ///
    /// Returns `true`; the transfer itself proceeds asynchronously.
    #[instrument(skip(self, request), fields(identifier = %request.identifier))]
    pub async fn download(&self, request: DownloadRequest) -> bool {
        let DownloadRequest {
            source,
            identifier,
            file_name,
            directory_name,
            user_info,
            listener,
        } = request;

        {
            let mut records = self.inner.records.lock().await;
            match records.entry(identifier.clone()) {
                Entry::Occupied(mut occupied) => {
                    debug!("reusing existing record");
                    if let Some(listener) = listener {
                        occupied.get_mut().add_listener(listener);
                    }
                }
                Entry::Vacant(vacant) => {
                    let mut transfer = Transfer::new(
                        identifier.clone(),
                        source,
                        file_name,
                        directory_name,
                        &self.inner.config.default_directory_name,
                    );
                    transfer.set_user_info(user_info);
                    if let Some(listener) = listener {
                        transfer.add_listener(listener);
                    }
                    vacant.insert(transfer);
                }
            }
        }

        self.inner.resume(&identifier).await
    }

    /// Starts or restarts the transfer. A `Paused` record resumes from its
    /// blob, anything else starts fresh from the source; byte counters
    /// reset to zero either way.
    ///
    /// Returns `false` only when no record exists for `identifier`. The
    /// return reports hand-off, not completion; dispatch failures surface
    /// through the observer and leave the record `Failed`.
    #[instrument(skip(self))]
    pub async fn resume(&self, identifier: &str) -> bool {
        self.inner.resume(identifier).await
    }

    /// Asks the transport to halt the transfer and yield resume data. The
    /// resulting `Paused`-or-`Cancelled` transition arrives asynchronously.
    ///
    /// Returns `false` when no record or no active operation exists.
    #[instrument(skip(self))]
    pub async fn pause(&self, identifier: &str) -> bool {
        self.inner.pause(identifier).await
    }

    /// Cancels the transfer: the record moves to `Cancelled` immediately
    /// and the transport is asked to terminate the operation. Idempotent
    /// when already cancelled.
    ///
    /// Returns `false` when no record or no active operation exists.
    #[instrument(skip(self))]
    pub async fn cancel(&self, identifier: &str) -> bool {
        self.inner.cancel(identifier).await
    }

    /// Cancels the transfer if active, deletes its persisted entry, and
    /// removes it from the collection.
    ///
    /// Returns `false` when no record exists.
    #[instrument(skip(self))]
    pub async fn remove(&self, identifier: &str) -> bool {
        self.inner.remove(identifier).await
    }

    /// Bulk-removes every record whose state does NOT equal `keep`.
    ///
    /// The name says what it does: only records matching `keep` survive.
    /// Returns how many records were removed.
    #[instrument(skip(self), fields(keep = %keep))]
    pub async fn remove_all_except(&self, keep: &TransferState) -> usize {
        self.inner.remove_all_except(keep).await
    }

    /// Resumes every record currently held, in identifier order.
    ///
    /// This operates on the in-memory collection; use [`restore_all`]
    /// first to rehydrate persisted transfers after a restart.
    ///
    /// [`restore_all`]: DownloadManager::restore_all
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> usize {
        self.inner.resume_all().await
    }

    /// Pauses every record currently held, in identifier order, then
    /// persists the identifier index.
    #[instrument(skip(self))]
    pub async fn pause_all(&self) -> usize {
        self.inner.pause_all().await
    }

    /// Cancels every record currently held, in identifier order.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self) -> usize {
        self.inner.cancel_all().await
    }

    /// Count of records whose state is neither `Finished` nor `Cancelled`.
    /// Recomputed on read.
    pub async fn pending_downloads(&self) -> usize {
        let records = self.inner.records.lock().await;
        records
            .values()
            .filter(|t| {
                !matches!(
                    t.state(),
                    TransferState::Finished | TransferState::Cancelled
                )
            })
            .count()
    }

    /// Attaches a listener to an existing record.
    ///
    /// Returns `false` when no record exists.
    pub async fn add_listener(&self, identifier: &str, listener: Listener) -> bool {
        let mut records = self.inner.records.lock().await;
        match records.get_mut(identifier) {
            Some(transfer) => {
                transfer.add_listener(listener);
                true
            }
            None => false,
        }
    }

    /// Removes every listener registration on `identifier` whose object
    /// handler is `observer`.
    ///
    /// Returns `true` if at least one registration was removed.
    pub async fn remove_listener(
        &self,
        identifier: &str,
        observer: &Arc<dyn TransferObserver>,
    ) -> bool {
        let mut records = self.inner.records.lock().await;
        records
            .get_mut(identifier)
            .is_some_and(|transfer| transfer.remove_listeners_owned_by(observer) > 0)
    }

    /// Owned view of one record, if it exists.
    pub async fn snapshot(&self, identifier: &str) -> Option<TransferSnapshot> {
        let records = self.inner.records.lock().await;
        records.get(identifier).map(Transfer::snapshot)
    }

    /// Owned views of every record, in identifier order.
    pub async fn snapshots(&self) -> Vec<TransferSnapshot> {
        let records = self.inner.records.lock().await;
        records.values().map(Transfer::snapshot).collect()
    }

    /// `true` if a record exists for `identifier`.
    pub async fn contains(&self, identifier: &str) -> bool {
        let records = self.inner.records.lock().await;
        records.contains_key(identifier)
    }

    /// Rehydrates persisted records into the collection, state verbatim.
    ///
    /// Records that are missing, undecodable, or carry an unparseable URL
    /// are skipped with a warning; identifiers already live in the
    /// collection are left untouched. Restored records are inactive until
    /// resumed. Returns how many records were restored.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] only when the identifier index itself
    /// cannot be read or decoded.
    #[instrument(skip(self))]
    pub async fn restore_all(&self) -> Result<usize, PersistenceError> {
        self.inner.restore_all().await
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    /// Delivery handle for transport callbacks. Weak: a transport holding
    /// a sink never keeps the manager alive.
    fn event_sink(&self) -> EventSink {
        let weak: Weak<dyn EventConsumer> = self.self_weak.clone();
        EventSink::new(weak)
    }

    fn observer(&self) -> Option<Arc<dyn ManagerObserver>> {
        self.observer.read().ok().and_then(|slot| slot.clone())
    }

    fn notify_error(&self, error: ManagerError) {
        warn!(identifier = %error.identifier(), error = %error, "background failure");
        if let Some(observer) = self.observer() {
            observer.error(&error);
        }
    }

    async fn resume(&self, identifier: &str) -> bool {
        let observer = self.observer();
        let dispatch = {
            let mut records = self.records.lock().await;
            let Some(transfer) = records.get_mut(identifier) else {
                return false;
            };
            if transfer.active {
                debug!(identifier = %identifier, "operation already active; re-issue is a no-op");
                return true;
            }
            let resume_data = match transfer.state() {
                TransferState::Paused(data) => Some(data.clone()),
                _ => None,
            };
            // Fresh attempt: counters reset before the state becomes Waiting.
            transfer.set_progress(0, 0, observer.as_ref());
            transfer.set_state(TransferState::Waiting, observer.as_ref());
            transfer.active = true;
            match resume_data {
                Some(data) => Dispatch::FromBlob(data),
                None => Dispatch::Fresh(transfer.source().clone()),
            }
        };

        let sink = self.event_sink();
        let dispatched = match dispatch {
            Dispatch::Fresh(source) => self.transport.start(identifier, &source, sink).await,
            Dispatch::FromBlob(data) => self.transport.resume(identifier, &data, sink).await,
        };

        match dispatched {
            Err(error) => {
                let observer = self.observer();
                {
                    let mut records = self.records.lock().await;
                    if let Some(transfer) = records.get_mut(identifier) {
                        transfer.active = false;
                        transfer.set_state(TransferState::Failed, observer.as_ref());
                    }
                }
                self.notify_error(ManagerError::Transport {
                    identifier: identifier.to_string(),
                    source: error,
                });
            }
            Ok(()) => {
                // A cancel or remove may have landed while dispatch was in
                // flight; the operation it could not find is registered now
                // and must not run unattended.
                let orphaned = {
                    let records = self.records.lock().await;
                    !records.get(identifier).is_some_and(|transfer| transfer.active)
                };
                if orphaned {
                    debug!(identifier = %identifier, "record lost ownership during dispatch; stopping operation");
                    if let Err(error) = self.transport.cancel(identifier).await {
                        debug!(identifier = %identifier, error = %error, "transport had no operation to cancel");
                    }
                }
            }
        }
        true
    }

    async fn pause(&self, identifier: &str) -> bool {
        {
            let records = self.records.lock().await;
            match records.get(identifier) {
                Some(transfer) if transfer.active && transfer.state().is_active() => {}
                _ => return false,
            }
        }

        if let Err(error) = self.transport.pause(identifier).await {
            self.notify_error(ManagerError::Transport {
                identifier: identifier.to_string(),
                source: error,
            });
        }
        true
    }

    async fn cancel(&self, identifier: &str) -> bool {
        let observer = self.observer();
        let was_active = {
            let mut records = self.records.lock().await;
            let Some(transfer) = records.get_mut(identifier) else {
                return false;
            };
            if *transfer.state() == TransferState::Cancelled {
                return true;
            }
            if !transfer.active {
                return false;
            }
            // Optimistic: the record is Cancelled now; the transport stops
            // when it gets around to it, and late callbacks are ignored.
            transfer.active = false;
            transfer.set_state(TransferState::Cancelled, observer.as_ref());
            true
        };

        if was_active {
            if let Err(error) = self.transport.cancel(identifier).await {
                debug!(identifier = %identifier, error = %error, "transport had no operation to cancel");
            }
        }
        true
    }

    async fn remove(&self, identifier: &str) -> bool {
        self.cancel(identifier).await;
        let remaining = {
            let mut records = self.records.lock().await;
            if records.remove(identifier).is_none() {
                return false;
            }
            current_ids(&records)
        };
        self.delete_persisted(identifier, &remaining).await;
        info!(identifier = %identifier, "record removed");
        true
    }

    async fn remove_all_except(&self, keep: &TransferState) -> usize {
        let (removed, remaining) = {
            let mut records = self.records.lock().await;
            let doomed: Vec<String> = records
                .iter()
                .filter(|(_, transfer)| transfer.state() != keep)
                .map(|(identifier, _)| identifier.clone())
                .collect();
            let mut removed = Vec::with_capacity(doomed.len());
            for identifier in doomed {
                if let Some(transfer) = records.remove(&identifier) {
                    removed.push((identifier, transfer.active));
                }
            }
            (removed, current_ids(&records))
        };

        for (identifier, was_active) in &removed {
            if *was_active {
                if let Err(error) = self.transport.cancel(identifier).await {
                    debug!(identifier = %identifier, error = %error, "transport had no operation to cancel");
                }
            }
            if let Err(error) = self.store.delete(&record_key(identifier)).await {
                self.notify_error(ManagerError::Persistence {
                    identifier: identifier.clone(),
                    source: error.into(),
                });
            }
        }
        if !removed.is_empty() {
            self.persist_index(&remaining, "*").await;
        }
        info!(removed = removed.len(), keep = %keep, "bulk removal complete");
        removed.len()
    }

    async fn resume_all(&self) -> usize {
        let mut resumed = 0;
        for identifier in self.all_ids().await {
            if self.resume(&identifier).await {
                resumed += 1;
            }
        }
        resumed
    }

    async fn pause_all(&self) -> usize {
        let ids = self.all_ids().await;
        let mut paused = 0;
        for identifier in &ids {
            if self.pause(identifier).await {
                paused += 1;
            }
        }
        // Bulk persist of the known-identifier index; individual records are
        // persisted as their Paused callbacks arrive.
        self.persist_index(&ids, "*").await;
        paused
    }

    async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for identifier in self.all_ids().await {
            if self.cancel(&identifier).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    async fn all_ids(&self) -> Vec<String> {
        let records = self.records.lock().await;
        current_ids(&records)
    }

    async fn restore_all(&self) -> Result<usize, PersistenceError> {
        let Some(bytes) = self.store.get(INDEX_KEY).await? else {
            return Ok(0);
        };
        let ids: Vec<String> = serde_json::from_slice(&bytes)?;

        let mut restored = 0;
        for identifier in ids {
            let Some(transfer) = self.load_persisted(&identifier).await else {
                continue;
            };
            let mut records = self.records.lock().await;
            match records.entry(identifier) {
                Entry::Vacant(vacant) => {
                    vacant.insert(transfer);
                    restored += 1;
                }
                Entry::Occupied(occupied) => {
                    debug!(identifier = %occupied.key(), "identifier already live; persisted copy ignored");
                }
            }
        }
        info!(restored, "restored persisted transfers");
        Ok(restored)
    }

    /// Reads and decodes one persisted record; any failure skips it.
    async fn load_persisted(&self, identifier: &str) -> Option<Transfer> {
        let bytes = match self.store.get(&record_key(identifier)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(identifier = %identifier, "persisted record missing; skipping");
                return None;
            }
            Err(error) => {
                warn!(identifier = %identifier, error = %error, "failed to read persisted record; skipping");
                return None;
            }
        };
        match serde_json::from_slice::<PersistedTransfer>(&bytes) {
            Ok(record) => record.into_transfer(),
            Err(error) => {
                warn!(identifier = %identifier, error = %error, "failed to decode persisted record; skipping");
                None
            }
        }
    }

    async fn persist_record(&self, record: PersistedTransfer, ids: Vec<String>) {
        let identifier = record.identifier.clone();
        if let Err(error) = self.try_persist_record(&record, &ids).await {
            self.notify_error(ManagerError::Persistence {
                identifier,
                source: error,
            });
        } else {
            debug!(identifier = %identifier, "record persisted");
        }
    }

    async fn try_persist_record(
        &self,
        record: &PersistedTransfer,
        ids: &[String],
    ) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(record)?;
        self.store.put(&record_key(&record.identifier), &bytes).await?;
        let index = serde_json::to_vec(ids)?;
        self.store.put(INDEX_KEY, &index).await?;
        Ok(())
    }

    async fn persist_index(&self, ids: &[String], context: &str) {
        let result: Result<(), PersistenceError> = match serde_json::to_vec(ids) {
            Ok(index) => self.store.put(INDEX_KEY, &index).await.map_err(Into::into),
            Err(error) => Err(error.into()),
        };
        if let Err(error) = result {
            self.notify_error(ManagerError::Persistence {
                identifier: context.to_string(),
                source: error,
            });
        }
    }

    async fn delete_persisted(&self, identifier: &str, remaining: &[String]) {
        let result: Result<(), PersistenceError> = async {
            self.store.delete(&record_key(identifier)).await?;
            let index = serde_json::to_vec(remaining)?;
            self.store.put(INDEX_KEY, &index).await?;
            Ok(())
        }
        .await;
        if let Err(error) = result {
            self.notify_error(ManagerError::Persistence {
                identifier: identifier.to_string(),
                source: error,
            });
        }
    }

    async fn on_bytes_written(&self, identifier: &str, written: u64, expected: u64) {
        let observer = self.observer();
        let mut records = self.records.lock().await;
        let Some(transfer) = records.get_mut(identifier) else {
            debug!(identifier = %identifier, "progress for unknown transfer ignored");
            return;
        };
        if !transfer.active || !transfer.state().is_active() {
            debug!(identifier = %identifier, state = %transfer.state(), "stray progress ignored");
            return;
        }
        if *transfer.state() != TransferState::Downloading {
            transfer.set_state(TransferState::Downloading, observer.as_ref());
        }
        transfer.set_progress(written, expected, observer.as_ref());
    }

    async fn on_completed(&self, identifier: &str, temp_path: PathBuf) {
        let observer = self.observer();
        let snapshot = {
            let mut records = self.records.lock().await;
            let Some(transfer) = records.get_mut(identifier) else {
                debug!(identifier = %identifier, "completion for unknown transfer ignored");
                return;
            };
            if !transfer.active || !transfer.state().is_active() {
                debug!(identifier = %identifier, state = %transfer.state(), "stray completion ignored");
                return;
            }
            transfer.active = false;
            transfer.set_state(TransferState::Finished, observer.as_ref());
            transfer.snapshot()
        };

        let directory = self.config.downloads_root.join(&snapshot.directory_name);
        let destination = directory.join(&snapshot.file_name);
        let moved = match self.mover.ensure_directory(&directory).await {
            Ok(()) => self.mover.move_file(&temp_path, &destination).await,
            Err(error) => Err(error),
        };
        match moved {
            Ok(()) => {
                info!(identifier = %identifier, path = %destination.display(), "payload relocated");
            }
            Err(error) => {
                // The transfer succeeded even though the move failed; the
                // record stays Finished.
                self.notify_error(ManagerError::Relocation {
                    identifier: identifier.to_string(),
                    source: error,
                });
            }
        }

        if let Some(observer) = &observer {
            observer.finished(&snapshot, &destination);
        }

        if self.config.remove_finished {
            let remaining = {
                let mut records = self.records.lock().await;
                records.remove(identifier);
                current_ids(&records)
            };
            self.delete_persisted(identifier, &remaining).await;
            debug!(identifier = %identifier, "finished record discarded");
        }
    }

    async fn on_paused(&self, identifier: &str, resume_data: Option<Vec<u8>>) {
        let observer = self.observer();
        match resume_data {
            Some(data) => {
                let persisted = {
                    let mut records = self.records.lock().await;
                    let Some(transfer) = records.get_mut(identifier) else {
                        debug!(identifier = %identifier, "pause result for unknown transfer ignored");
                        return;
                    };
                    if !transfer.active || !transfer.state().is_active() {
                        debug!(identifier = %identifier, state = %transfer.state(), "stray pause result ignored");
                        return;
                    }
                    transfer.active = false;
                    transfer.set_state(TransferState::Paused(data), observer.as_ref());
                    let record = PersistedTransfer::from_transfer(transfer);
                    (record, current_ids(&records))
                };
                self.persist_record(persisted.0, persisted.1).await;
            }
            None => {
                let mut records = self.records.lock().await;
                let Some(transfer) = records.get_mut(identifier) else {
                    return;
                };
                if !transfer.active || !transfer.state().is_active() {
                    debug!(identifier = %identifier, state = %transfer.state(), "stray pause result ignored");
                    return;
                }
                // The server cannot resume this transfer later; a pause
                // without resume data is a terminal cancellation.
                warn!(identifier = %identifier, "transport yielded no resume data; cancelling");
                transfer.active = false;
                transfer.set_state(TransferState::Cancelled, observer.as_ref());
            }
        }
    }

    async fn on_failed(&self, identifier: &str, error: crate::transport::TransportError) {
        let observer = self.observer();
        {
            let mut records = self.records.lock().await;
            if let Some(transfer) = records.get_mut(identifier) {
                if transfer.active && transfer.state().is_active() {
                    transfer.active = false;
                    transfer.set_state(TransferState::Failed, observer.as_ref());
                } else {
                    debug!(identifier = %identifier, state = %transfer.state(), "failure for inactive transfer");
                }
            }
        }
        self.notify_error(ManagerError::Transport {
            identifier: identifier.to_string(),
            source: error,
        });
    }
}

#[async_trait]
impl EventConsumer for ManagerInner {
    async fn consume(&self, event: TransferEvent) {
        let TransferEvent { identifier, kind } = event;
        match kind {
            TransferEventKind::BytesWritten { written, expected } => {
                self.on_bytes_written(&identifier, written, expected).await;
            }
            TransferEventKind::Completed { temp_path } => {
                self.on_completed(&identifier, temp_path).await;
            }
            TransferEventKind::Paused { resume_data } => {
                self.on_paused(&identifier, resume_data).await;
            }
            TransferEventKind::Failed { error } => {
                self.on_failed(&identifier, error).await;
            }
            TransferEventKind::ResumedAtOffset { offset, expected } => {
                debug!(identifier = %identifier, offset, expected, "operation resumed at offset");
            }
            TransferEventKind::SessionFlushed => {
                debug!(identifier = %identifier, "session flushed pending events");
            }
        }
    }
}

fn current_ids(records: &BTreeMap<String, Transfer>) -> Vec<String> {
    records.keys().cloned().collect()
}
