use std::time::Instant;

use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ChunkPlan;
use crate::progress::{ProgressState, SpeedCalculator, TransferObserver, percent};
use crate::source::FileSource;
use crate::TransferError;

/// Fingerprint of a zero-byte file.
pub const EMPTY_FINGERPRINT: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Computes the MD5 of `data` and returns the hex-encoded digest.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Computes the content fingerprint (hex MD5) of `file`.
///
/// Chunks are read strictly in order using the file's [`ChunkPlan`]; the
/// next read is only issued after the previous chunk has been appended to
/// the digest. `cancel` is polled before every read. Progress is reported
/// once per chunk.
pub async fn compute_fingerprint(
    file: &dyn FileSource,
    observer: &dyn TransferObserver,
    cancel: &CancellationToken,
) -> Result<String, TransferError> {
    let plan = ChunkPlan::for_size(file.size());
    let speed = SpeedCalculator::default();
    let mut hasher = Md5::new();

    for (index, range) in plan.ranges() {
        if cancel.is_cancelled() {
            debug!(file = %file.name(), chunk = index, "hashing cancelled");
            return Err(TransferError::Cancelled);
        }

        let started = Instant::now();
        let len = (range.end - range.start) as usize;
        let buf = file
            .read_range(range.start, len)
            .await
            .map_err(|source| TransferError::io(file.name(), source))?;
        hasher.update(&buf);
        let elapsed = started.elapsed();

        speed.add_sample(len as u64, elapsed);
        observer.on_chunk_completed(index, len as u64, elapsed);
        observer.on_progress(ProgressState::new(
            percent(index + 1, plan.chunk_count()),
            speed.bytes_per_second(),
        ));
    }

    let digest = hex::encode(hasher.finalize());
    debug!(
        file = %file.name(),
        chunks = plan.chunk_count(),
        fingerprint = %digest,
        "fingerprint computed"
    );
    Ok(digest)
}
