//! Transfer records: identity, destination, state, and byte counters.
//!
//! A [`Transfer`] is owned exclusively by the manager's record collection;
//! every mutation goes through the state-machine methods here, which update
//! `last_state` atomically with `state` and fan notifications out only after
//! both fields (or both byte counters) hold their new values.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use url::Url;

mod listener;
mod state;

pub use listener::{
    Listener, ManagerObserver, ProgressChangedFn, StateChangedFn, TransferObserver,
};
pub use state::TransferState;

pub(crate) use listener::{fan_out_progress, fan_out_state};

/// Directory name used when the caller supplies none.
pub const DEFAULT_DIRECTORY_NAME: &str = "Downloads";

/// One download's in-memory record.
#[derive(Debug)]
pub struct Transfer {
    identifier: String,
    source: Url,
    file_name: String,
    directory_name: String,
    state: TransferState,
    last_state: TransferState,
    total_bytes_written: u64,
    total_bytes_expected: u64,
    user_info: HashMap<String, serde_json::Value>,
    listeners: Vec<Listener>,
    /// Whether a transport operation is currently associated with this
    /// record. Never persisted; restored records start inactive.
    pub(crate) active: bool,
}

impl Transfer {
    /// Creates a record in the `Unknown` state.
    ///
    /// The destination file name defaults to the last path segment of the
    /// source URL (falling back to the identifier), the directory to
    /// `default_directory`.
    pub(crate) fn new(
        identifier: String,
        source: Url,
        file_name: Option<String>,
        directory_name: Option<String>,
        default_directory: &str,
    ) -> Self {
        let file_name = file_name.unwrap_or_else(|| default_file_name(&source, &identifier));
        let directory_name = directory_name.unwrap_or_else(|| default_directory.to_string());
        Self {
            identifier,
            source,
            file_name,
            directory_name,
            state: TransferState::Unknown,
            last_state: TransferState::Unknown,
            total_bytes_written: 0,
            total_bytes_expected: 0,
            user_info: HashMap::new(),
            listeners: Vec::new(),
            active: false,
        }
    }

    /// Reconstructs a record from persisted fields, verbatim.
    pub(crate) fn restored(
        identifier: String,
        source: Url,
        file_name: String,
        directory_name: String,
        state: TransferState,
        last_state: TransferState,
        total_bytes_written: u64,
        total_bytes_expected: u64,
    ) -> Self {
        Self {
            identifier,
            source,
            file_name,
            directory_name,
            state,
            last_state,
            total_bytes_written,
            total_bytes_expected,
            user_info: HashMap::new(),
            listeners: Vec::new(),
            active: false,
        }
    }

    /// Unique identifier, immutable after creation.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The request URL this transfer fetches.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// State immediately prior to the most recent transition.
    #[must_use]
    pub fn last_state(&self) -> &TransferState {
        &self.last_state
    }

    /// Destination file name used at completion time.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Destination directory name used at completion time.
    #[must_use]
    pub fn directory_name(&self) -> &str {
        &self.directory_name
    }

    /// Total bytes written by the current attempt.
    #[must_use]
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Expected total bytes; 0 means unknown.
    #[must_use]
    pub fn total_bytes_expected(&self) -> u64 {
        self.total_bytes_expected
    }

    /// Caller-attached metadata, passed through unmodified.
    #[must_use]
    pub fn user_info(&self) -> &HashMap<String, serde_json::Value> {
        &self.user_info
    }

    /// Fraction complete; 0.0 when the expected total is unknown.
    ///
    /// Not clamped: a transport reporting more bytes than expected passes
    /// through as a value above 1.0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total_bytes_expected > 0 {
            self.total_bytes_written as f64 / self.total_bytes_expected as f64
        } else {
            0.0
        }
    }

    pub(crate) fn set_user_info(&mut self, user_info: HashMap<String, serde_json::Value>) {
        self.user_info = user_info;
    }

    pub(crate) fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub(crate) fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Removes every registration whose object handler is `observer`.
    /// Returns how many were removed.
    pub(crate) fn remove_listeners_owned_by(
        &mut self,
        observer: &Arc<dyn TransferObserver>,
    ) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|listener| !listener.is_owned_by(observer));
        before - self.listeners.len()
    }

    /// Transitions to `to`, recording the outgoing state in `last_state`
    /// before notifying. Listeners observe the fully updated pair.
    pub(crate) fn set_state(
        &mut self,
        to: TransferState,
        delegate: Option<&Arc<dyn ManagerObserver>>,
    ) {
        self.last_state = std::mem::replace(&mut self.state, to);
        debug!(
            identifier = %self.identifier,
            from = %self.last_state,
            to = %self.state,
            "state transition"
        );
        let snapshot = self.snapshot();
        fan_out_state(self, &snapshot, delegate, &self.last_state, &self.state);
    }

    /// Updates both byte counters together, then fires one progress
    /// notification with the now-current values.
    pub(crate) fn set_progress(
        &mut self,
        written: u64,
        expected: u64,
        delegate: Option<&Arc<dyn ManagerObserver>>,
    ) {
        self.total_bytes_written = written;
        self.total_bytes_expected = expected;
        let snapshot = self.snapshot();
        fan_out_progress(self, &snapshot, delegate, written, expected);
    }

    /// Owned copy of the observable fields.
    #[must_use]
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            identifier: self.identifier.clone(),
            source: self.source.clone(),
            file_name: self.file_name.clone(),
            directory_name: self.directory_name.clone(),
            state: self.state.clone(),
            last_state: self.last_state.clone(),
            total_bytes_written: self.total_bytes_written,
            total_bytes_expected: self.total_bytes_expected,
            user_info: self.user_info.clone(),
        }
    }
}

/// Owned view of a transfer handed to observers and query callers.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    /// Unique identifier.
    pub identifier: String,
    /// The request URL.
    pub source: Url,
    /// Destination file name.
    pub file_name: String,
    /// Destination directory name.
    pub directory_name: String,
    /// State at snapshot time.
    pub state: TransferState,
    /// State immediately prior to the most recent transition.
    pub last_state: TransferState,
    /// Total bytes written by the current attempt.
    pub total_bytes_written: u64,
    /// Expected total bytes; 0 means unknown.
    pub total_bytes_expected: u64,
    /// Caller-attached metadata.
    pub user_info: HashMap<String, serde_json::Value>,
}

impl TransferSnapshot {
    /// Fraction complete; 0.0 when the expected total is unknown. Not
    /// clamped.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total_bytes_expected > 0 {
            self.total_bytes_written as f64 / self.total_bytes_expected as f64
        } else {
            0.0
        }
    }
}

/// Last non-empty path segment of the URL, or the identifier when the URL
/// has no usable segment.
fn default_file_name(source: &Url, identifier: &str) -> String {
    source
        .path_segments()
        .and_then(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .next_back()
                .map(std::string::ToString::to_string)
        })
        .unwrap_or_else(|| identifier.to_string())
}
