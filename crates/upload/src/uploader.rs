//! Chunked transfer of one file.

use std::ops::Range;
use std::time::{Duration, Instant};

use cloudrive_transfer::{
    ChunkPlan, FileSource, ProgressState, SpeedCalculator, TransferError, TransferObserver,
    percent,
};
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{ChunkUpload, DriveBackend};
use crate::error::UploadError;
use crate::settings::UploadSettings;

/// Uploads a file's chunks to a [`DriveBackend`].
///
/// Chunk boundaries come from [`ChunkPlan::for_size`], the same plan the
/// fingerprint pass used. With `chunk_concurrency > 1` chunks may complete
/// out of order; progress counts completions, so it still only grows.
pub struct ChunkedUploader<'a> {
    backend: &'a dyn DriveBackend,
    chunk_concurrency: usize,
    chunk_timeout: Duration,
}

/// Target of one upload call.
struct Target<'a> {
    file: &'a dyn FileSource,
    plan: ChunkPlan,
    fingerprint: &'a str,
    folder_id: i64,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(backend: &'a dyn DriveBackend, settings: &UploadSettings) -> Self {
        Self {
            backend,
            chunk_concurrency: settings.chunk_concurrency(),
            chunk_timeout: settings.chunk_timeout(),
        }
    }

    /// Transfers every chunk of `file` into `folder_id`.
    ///
    /// `cancel` is checked before each chunk is dispatched. The first failed
    /// or timed-out chunk aborts the whole upload. A zero-byte file makes no
    /// backend calls and completes immediately.
    pub async fn upload_chunks(
        &self,
        file: &dyn FileSource,
        fingerprint: &str,
        folder_id: i64,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let target = Target {
            file,
            plan: ChunkPlan::for_size(file.size()),
            fingerprint,
            folder_id,
        };
        let total = target.plan.chunk_count();

        if total == 0 {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            observer.on_progress(ProgressState::new(100, 0.0));
            return Ok(());
        }

        let speed = SpeedCalculator::default();
        let mut completed = 0u64;
        let target = &target;

        let mut in_flight = stream::iter(target.plan.ranges())
            .map(|(index, range)| self.send_chunk(target, index, range, cancel))
            .buffer_unordered(self.chunk_concurrency);

        while let Some(result) = in_flight.next().await {
            let (index, bytes, elapsed) = result?;
            completed += 1;
            speed.add_sample(bytes, elapsed);
            observer.on_chunk_completed(index, bytes, elapsed);
            observer.on_progress(ProgressState::new(
                percent(completed, total),
                speed.bytes_per_second(),
            ));
        }

        Ok(())
    }

    async fn send_chunk(
        &self,
        target: &Target<'_>,
        index: u64,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64, Duration), UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let name = target.file.name();
        let len = range.end - range.start;
        let data = target
            .file
            .read_range(range.start, len as usize)
            .await
            .map_err(|source| TransferError::Io {
                file: name.to_string(),
                source,
            })?;

        let chunk = ChunkUpload {
            file_name: name.to_string(),
            file_size: target.plan.size(),
            fingerprint: target.fingerprint.to_string(),
            index,
            count: target.plan.chunk_count(),
            folder_id: target.folder_id,
            data,
        };

        let started = Instant::now();
        match tokio::time::timeout(self.chunk_timeout, self.backend.upload_chunk(chunk)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(UploadError::Chunk {
                    file: name.to_string(),
                    index,
                    source: Box::new(e),
                });
            }
            Err(_) => {
                return Err(UploadError::Timeout {
                    file: name.to_string(),
                    index: Some(index),
                    timeout: self.chunk_timeout,
                });
            }
        }
        let elapsed = started.elapsed();

        debug!(file = %name, chunk = index, bytes = len, ?elapsed, "chunk uploaded");
        Ok((index, len, elapsed))
    }
}
