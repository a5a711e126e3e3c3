//! Upload error types.

use std::time::Duration;

use cloudrive_transfer::TransferError;

use crate::types::{UploadId, UploadState};

/// Boxed cause reported by a [`DriveBackend`](crate::DriveBackend).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("chunk {index} of {file} failed: {source}")]
    Chunk {
        file: String,
        index: u64,
        #[source]
        source: Box<UploadError>,
    },

    #[error("{file}: request timed out after {timeout:?} (chunk {index:?})")]
    Timeout {
        file: String,
        index: Option<u64>,
        timeout: Duration,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: UploadState, to: UploadState },

    #[error("upload not found: {0}")]
    NotFound(UploadId),
}

impl UploadError {
    /// Wraps a backend failure, keeping it reachable through `source()`.
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Self::Backend(error.into())
    }

    /// `true` for user-initiated stops, which callers should not report as
    /// failures.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Transfer(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cancelled_through_transfer() {
        assert!(UploadError::Cancelled.is_cancelled());
        assert!(UploadError::from(TransferError::Cancelled).is_cancelled());
        assert!(!UploadError::backend("boom").is_cancelled());
    }

    #[test]
    fn chunk_error_names_file_and_index() {
        let err = UploadError::Chunk {
            file: "report.pdf".into(),
            index: 3,
            source: Box::new(UploadError::backend("503")),
        };
        assert_eq!(
            err.to_string(),
            "chunk 3 of report.pdf failed: backend error: 503"
        );
    }

    #[test]
    fn chunk_error_keeps_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = UploadError::Chunk {
            file: "report.pdf".into(),
            index: 0,
            source: Box::new(UploadError::backend(io)),
        };

        let backend = err.source().expect("chunk error has a source");
        assert!(matches!(
            backend.downcast_ref::<UploadError>(),
            Some(UploadError::Backend(_))
        ));
        let root = backend.source().expect("backend error has a source");
        let io = root.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset);
    }
}
