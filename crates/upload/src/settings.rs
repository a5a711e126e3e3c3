//! Tunables for the upload queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upload queue settings.
///
/// Every field has a default, so a partial JSON object deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadSettings {
    /// Files processed at the same time.
    pub file_concurrency: usize,
    /// Chunks of one file in flight at the same time.
    pub chunk_concurrency: usize,
    /// Per-request timeout for chunk transfers and existence checks.
    pub chunk_timeout_secs: u64,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            file_concurrency: 1,
            chunk_concurrency: 1,
            chunk_timeout_secs: 60,
            event_buffer: 256,
        }
    }
}

impl UploadSettings {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs.max(1))
    }

    pub(crate) fn file_concurrency(&self) -> usize {
        self.file_concurrency.max(1)
    }

    pub(crate) fn chunk_concurrency(&self) -> usize {
        self.chunk_concurrency.max(1)
    }
}
