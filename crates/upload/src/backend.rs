//! Backend trait consumed by the upload pipeline.
//!
//! The app implements this on top of the drive HTTP client. Keeping it a
//! trait lets the pipeline run against in-memory mocks.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Future returned by [`DriveBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Answer to an existence lookup by fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsResult {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file_id: Option<String>,
}

/// One chunk on its way to the backend.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_name: String,
    /// Total size of the file the chunk belongs to.
    pub file_size: u64,
    pub fingerprint: String,
    pub index: u64,
    pub count: u64,
    pub folder_id: i64,
    pub data: Vec<u8>,
}

/// Remote drive operations needed to upload a file.
pub trait DriveBackend: Send + Sync {
    /// Looks up content by fingerprint within `folder_id`.
    fn check_exists(&self, folder_id: i64, fingerprint: &str) -> BackendFuture<'_, ExistsResult>;

    /// Transfers one chunk.
    fn upload_chunk(&self, chunk: ChunkUpload) -> BackendFuture<'_, ()>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording backend shared by the pipeline tests.

    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedChunk {
        pub file_name: String,
        pub fingerprint: String,
        pub index: u64,
        pub count: u64,
        pub folder_id: i64,
        pub len: usize,
    }

    #[derive(Default)]
    pub struct MockBackend {
        /// Fingerprints the server already has.
        pub known: Mutex<HashSet<String>>,
        pub exists_calls: Mutex<Vec<(i64, String)>>,
        pub chunks: Mutex<Vec<RecordedChunk>>,
        /// Chunk index that fails with a backend error.
        pub fail_on: Option<u64>,
        /// Cancels this token once the given number of chunks have landed.
        pub cancel_after: Option<(usize, CancellationToken)>,
        /// Artificial latency per chunk.
        pub delay: Option<Duration>,
        /// Makes every existence check fail with a backend error.
        pub exists_fails: bool,
        /// Artificial latency per existence check.
        pub exists_delay: Option<Duration>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn knowing(fingerprint: &str) -> Self {
            let backend = Self::default();
            backend.known.lock().unwrap().insert(fingerprint.to_string());
            backend
        }

        pub fn chunk_indices(&self) -> Vec<u64> {
            self.chunks.lock().unwrap().iter().map(|c| c.index).collect()
        }
    }

    impl DriveBackend for MockBackend {
        fn check_exists(
            &self,
            folder_id: i64,
            fingerprint: &str,
        ) -> BackendFuture<'_, ExistsResult> {
            let fingerprint = fingerprint.to_string();
            Box::pin(async move {
                self.exists_calls
                    .lock()
                    .unwrap()
                    .push((folder_id, fingerprint.clone()));
                if let Some(delay) = self.exists_delay {
                    tokio::time::sleep(delay).await;
                }
                if self.exists_fails {
                    return Err(UploadError::backend("lookup unavailable"));
                }
                let exists = self.known.lock().unwrap().contains(&fingerprint);
                Ok(ExistsResult {
                    exists,
                    filename: exists.then(|| "existing.bin".to_string()),
                    new_file_id: exists.then(|| format!("file-{fingerprint}")),
                })
            })
        }

        fn upload_chunk(&self, chunk: ChunkUpload) -> BackendFuture<'_, ()> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail_on == Some(chunk.index) {
                    return Err(UploadError::backend("server rejected chunk"));
                }
                let landed = {
                    let mut chunks = self.chunks.lock().unwrap();
                    chunks.push(RecordedChunk {
                        file_name: chunk.file_name,
                        fingerprint: chunk.fingerprint,
                        index: chunk.index,
                        count: chunk.count,
                        folder_id: chunk.folder_id,
                        len: chunk.data.len(),
                    });
                    chunks.len()
                };
                if let Some((after, token)) = &self.cancel_after
                    && landed == *after
                {
                    token.cancel();
                }
                Ok(())
            })
        }
    }
}
