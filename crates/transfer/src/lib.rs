//! Content fingerprinting and chunk planning for drive uploads.
//!
//! The hasher and the uploader both chunk a file through [`ChunkPlan`], so
//! chunk indices mean the same byte ranges on both passes.

mod fingerprint;
mod policy;
mod progress;
mod source;

pub use fingerprint::{EMPTY_FINGERPRINT, compute_fingerprint, fingerprint_bytes};
pub use policy::{ChunkPlan, chunk_size_for};
pub use progress::{NoopObserver, ProgressState, SpeedCalculator, TransferObserver, percent};
pub use source::{FileSource, LocalFile, MemoryFile, ReadFuture};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub(crate) fn io(file: &str, source: std::io::Error) -> Self {
        Self::Io {
            file: file.to_string(),
            source,
        }
    }

    /// `true` when the operation stopped because its token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
