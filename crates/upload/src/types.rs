//! Data types for the upload pipeline.

use std::fmt;

use cloudrive_transfer::ProgressState;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Identifies one queued file for progress and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(pub u64);

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-file upload state.
///
/// ```text
/// ready -> calculating -> checking -> done            (already on the server)
///                                  -> uploading -> done
/// ```
///
/// `canceled` and `failed` are reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Ready,
    Calculating,
    Checking,
    Uploading,
    Done,
    Failed,
    Canceled,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Ready, Calculating) => true,
            (Calculating, Checking) => true,
            (Checking, Uploading | Done) => true,
            (Uploading, Done) => true,
            (from, Failed | Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Calculating => "calculating",
            Self::Checking => "checking",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Hashing,
    Checking,
    Uploading,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hashing => "hashing",
            Self::Checking => "checking",
            Self::Uploading => "uploading",
        };
        f.write_str(s)
    }
}

/// How a queued file finished.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The file is on the server.
    Done {
        fingerprint: String,
        /// Id reported by the existence check when the content was already
        /// present.
        file_id: Option<String>,
        /// `true` when no chunk was transferred because of a dedup hit.
        deduplicated: bool,
    },
    /// Stopped by the user.
    Canceled,
    Failed { stage: Stage, error: UploadError },
}

impl UploadOutcome {
    /// Terminal state matching this outcome.
    pub fn state(&self) -> UploadState {
        match self {
            Self::Done { .. } => UploadState::Done,
            Self::Canceled => UploadState::Canceled,
            Self::Failed { .. } => UploadState::Failed,
        }
    }
}

/// Result for one file returned by [`UploadQueue::run`](crate::UploadQueue::run).
#[derive(Debug)]
pub struct UploadReport {
    pub id: UploadId,
    pub file_name: String,
    pub outcome: UploadOutcome,
}

/// Event emitted while the queue runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged {
        id: UploadId,
        file_name: String,
        state: UploadState,
    },
    /// Fingerprinting progress.
    HashProgress { id: UploadId, percent: u8 },
    /// Chunk transfer progress.
    UploadProgress { id: UploadId, progress: ProgressState },
    /// The file reached a terminal state. `error` is set only for failures.
    Finished {
        id: UploadId,
        file_name: String,
        state: UploadState,
        error: Option<String>,
    },
}
