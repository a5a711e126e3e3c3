//! Drive upload pipeline.
//!
//! Each queued file moves through the same stages:
//!
//! 1. **Calculate** — fingerprint the content (MD5, chunked)
//! 2. **Check** — ask the backend whether the folder already has it
//! 3. **Upload** — transfer the chunks that the fingerprint pass read
//!
//! A hit in step 2 finishes the file without transferring a byte. The
//! backend is abstracted by [`DriveBackend`] so the pipeline runs against
//! mocks in tests and against the HTTP client in the app.

pub mod backend;
pub mod error;
pub mod queue;
pub mod settings;
pub mod types;
pub mod uploader;

pub use backend::{BackendFuture, ChunkUpload, DriveBackend, ExistsResult};
pub use error::{BoxError, UploadError};
pub use queue::UploadQueue;
pub use settings::UploadSettings;
pub use types::{Stage, UploadEvent, UploadId, UploadOutcome, UploadReport, UploadState};
pub use uploader::ChunkedUploader;
