//! Size-tiered chunking shared by the hasher and the uploader.
//!
//! Both passes derive their boundaries from [`ChunkPlan::for_size`], so the
//! backend can reconcile chunks by index.

use std::ops::Range;

use crate::MIB;

const GIB: u64 = 1024 * MIB;

/// Chunk size tiers, ascending by upper size bound (exclusive).
const TIERS: [(u64, u64); 5] = [
    (5 * MIB, MIB),
    (50 * MIB, 2 * MIB),
    (100 * MIB, 4 * MIB),
    (GIB, 8 * MIB),
    (2 * GIB, 16 * MIB),
];

/// Chunk size for files of 2 GiB and above.
const LARGEST_CHUNK: u64 = 32 * MIB;

/// Returns the chunk size in bytes for a file of `size` bytes.
pub fn chunk_size_for(size: u64) -> u64 {
    TIERS
        .iter()
        .find(|(bound, _)| size < *bound)
        .map(|(_, chunk)| *chunk)
        .unwrap_or(LARGEST_CHUNK)
}

/// Chunk boundaries for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
    chunk_count: u64,
}

impl ChunkPlan {
    /// Builds the plan for a file of `size` bytes.
    pub fn for_size(size: u64) -> Self {
        let chunk_size = chunk_size_for(size);
        Self {
            size,
            chunk_size,
            chunk_count: size.div_ceil(chunk_size),
        }
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// `true` for zero-byte files, which have no chunks at all.
    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.size);
        Some(start..end)
    }

    /// Iterates `(index, range)` over every chunk in order.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, Range<u64>)> + '_ {
        (0..self.chunk_count).filter_map(|index| self.range(index).map(|r| (index, r)))
    }
}
