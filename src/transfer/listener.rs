//! Listener registrations and observer traits.
//!
//! Each transfer holds an insertion-ordered list of [`Listener`]s. A
//! registration carries up to one object-style handler and up to one closure
//! per event kind; within a registration the object handler always fires
//! before the closure. The manager additionally holds one crate-level
//! [`ManagerObserver`] notified ahead of the per-record listeners.

use std::path::Path;
use std::sync::Arc;

use crate::error::ManagerError;

use super::state::TransferState;
use super::{Transfer, TransferSnapshot};

/// Object-style handler attached to a single transfer.
///
/// Both methods default to no-ops so implementers can pick the events they
/// care about.
pub trait TransferObserver: Send + Sync {
    /// The transfer moved from `from` to `to`.
    fn state_changed(&self, transfer: &TransferSnapshot, from: &TransferState, to: &TransferState) {
        let _ = (transfer, from, to);
    }

    /// The transfer's byte counters changed.
    fn progress_changed(&self, transfer: &TransferSnapshot, written: u64, expected: u64) {
        let _ = (transfer, written, expected);
    }
}

/// Manager-level delegate, notified for every transfer the manager owns.
///
/// Notifications run synchronously with the state mutation that caused them,
/// on whichever task performed it; implementations must not call back into
/// the manager and should marshal to their own context for anything slow.
pub trait ManagerObserver: Send + Sync {
    /// A transfer moved from `from` to `to`.
    fn state_changed(&self, transfer: &TransferSnapshot, from: &TransferState, to: &TransferState) {
        let _ = (transfer, from, to);
    }

    /// A transfer's byte counters changed.
    fn progress_changed(&self, transfer: &TransferSnapshot, written: u64, expected: u64) {
        let _ = (transfer, written, expected);
    }

    /// A transfer finished and its payload relocation was attempted;
    /// `final_path` is where the payload was moved (or should have been).
    fn finished(&self, transfer: &TransferSnapshot, final_path: &Path) {
        let _ = (transfer, final_path);
    }

    /// A background failure occurred (transport, relocation, persistence).
    fn error(&self, error: &ManagerError) {
        let _ = error;
    }
}

/// Closure slot for state changes.
pub type StateChangedFn =
    Box<dyn Fn(&TransferSnapshot, &TransferState, &TransferState) + Send + Sync>;

/// Closure slot for progress changes.
pub type ProgressChangedFn = Box<dyn Fn(&TransferSnapshot, u64, u64) + Send + Sync>;

/// One listener registration on a transfer.
///
/// Any combination of slots may be empty; an entirely empty registration is
/// legal and simply never fires.
#[derive(Default)]
pub struct Listener {
    observer: Option<Arc<dyn TransferObserver>>,
    on_state: Option<StateChangedFn>,
    on_progress: Option<ProgressChangedFn>,
}

impl Listener {
    /// Creates an empty registration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an object-style handler.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attaches a state-change closure.
    #[must_use]
    pub fn on_state_changed(
        mut self,
        handler: impl Fn(&TransferSnapshot, &TransferState, &TransferState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state = Some(Box::new(handler));
        self
    }

    /// Attaches a progress-change closure.
    #[must_use]
    pub fn on_progress_changed(
        mut self,
        handler: impl Fn(&TransferSnapshot, u64, u64) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Box::new(handler));
        self
    }

    /// `true` if this registration's object handler is `observer`.
    pub(crate) fn is_owned_by(&self, observer: &Arc<dyn TransferObserver>) -> bool {
        self.observer
            .as_ref()
            .is_some_and(|own| Arc::ptr_eq(own, observer))
    }

    /// Fires the state slots: object handler first, then closure.
    pub(crate) fn notify_state(
        &self,
        transfer: &TransferSnapshot,
        from: &TransferState,
        to: &TransferState,
    ) {
        if let Some(observer) = &self.observer {
            observer.state_changed(transfer, from, to);
        }
        if let Some(handler) = &self.on_state {
            handler(transfer, from, to);
        }
    }

    /// Fires the progress slots: object handler first, then closure.
    pub(crate) fn notify_progress(&self, transfer: &TransferSnapshot, written: u64, expected: u64) {
        if let Some(observer) = &self.observer {
            observer.progress_changed(transfer, written, expected);
        }
        if let Some(handler) = &self.on_progress {
            handler(transfer, written, expected);
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("has_observer", &self.observer.is_some())
            .field("has_on_state", &self.on_state.is_some())
            .field("has_on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Fan-out for one state transition: manager observer first, then each
/// listener in insertion order.
pub(crate) fn fan_out_state(
    transfer: &Transfer,
    snapshot: &TransferSnapshot,
    delegate: Option<&Arc<dyn ManagerObserver>>,
    from: &TransferState,
    to: &TransferState,
) {
    if let Some(delegate) = delegate {
        delegate.state_changed(snapshot, from, to);
    }
    for listener in transfer.listeners() {
        listener.notify_state(snapshot, from, to);
    }
}

/// Fan-out for one progress tick: manager observer first, then each
/// listener in insertion order.
pub(crate) fn fan_out_progress(
    transfer: &Transfer,
    snapshot: &TransferSnapshot,
    delegate: Option<&Arc<dyn ManagerObserver>>,
    written: u64,
    expected: u64,
) {
    if let Some(delegate) = delegate {
        delegate.progress_changed(snapshot, written, expected);
    }
    for listener in transfer.listeners() {
        listener.notify_progress(snapshot, written, expected);
    }
}
