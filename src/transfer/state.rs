//! Transfer lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a single transfer.
///
/// `Paused` carries the opaque resume blob produced by the transport;
/// equality between two `Paused` values compares the blob byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "resume_data")]
pub enum TransferState {
    /// Never started; the state a record is created in.
    Unknown,
    /// Handed to the transport, no bytes received yet.
    Waiting,
    /// Bytes are arriving.
    Downloading,
    /// Halted with resume data sufficient to restart without re-downloading.
    Paused(Vec<u8>),
    /// Completed successfully; payload relocated (or relocation attempted).
    Finished,
    /// Terminated without resume data.
    Cancelled,
    /// The transport reported an unrecoverable error.
    Failed,
}

impl TransferState {
    /// Lowercase name for logs and display.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Paused(_) => "paused",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// `true` while a transport operation can still report progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Downloading)
    }

    /// `true` for states no transport callback may move the record out of.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_equality_compares_blob() {
        assert_eq!(
            TransferState::Paused(vec![1, 2, 3]),
            TransferState::Paused(vec![1, 2, 3])
        );
        assert_ne!(
            TransferState::Paused(vec![1, 2, 3]),
            TransferState::Paused(vec![1, 2])
        );
    }

    #[test]
    fn test_unit_states_compare_by_discriminant() {
        assert_eq!(TransferState::Waiting, TransferState::Waiting);
        assert_ne!(TransferState::Waiting, TransferState::Downloading);
        assert_ne!(TransferState::Paused(Vec::new()), TransferState::Cancelled);
    }

    #[test]
    fn test_active_and_terminal_partition() {
        assert!(TransferState::Waiting.is_active());
        assert!(TransferState::Downloading.is_active());
        assert!(!TransferState::Paused(Vec::new()).is_active());
        assert!(!TransferState::Unknown.is_active());

        assert!(TransferState::Finished.is_terminal());
        assert!(TransferState::Cancelled.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Paused(Vec::new()).is_terminal());
        assert!(!TransferState::Unknown.is_terminal());
    }

    #[test]
    fn test_display_uses_lowercase_names() {
        assert_eq!(TransferState::Downloading.to_string(), "downloading");
        assert_eq!(TransferState::Paused(vec![9]).to_string(), "paused");
    }

    #[test]
    fn test_serde_roundtrip_preserves_resume_blob() {
        let state = TransferState::Paused(vec![0, 255, 128, 7]);
        let json = serde_json::to_vec(&state).unwrap();
        let restored: TransferState = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_serde_unit_state_encoding() {
        let json = serde_json::to_string(&TransferState::Waiting).unwrap();
        assert_eq!(json, r#"{"kind":"waiting"}"#);
    }
}
