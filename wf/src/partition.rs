// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-budgeted chunking.
//!
//! A chunk needs one packed slot per input and per output feature vector
//! for every point, plus a reverse-index slot when the index-based unpack
//! path is used. The partition size is the number of such points that fit
//! in the budget; the chunk loop never holds more than that at once.

use crate::compaction::ReverseIndex;
use std::mem::size_of;
use std::ops::Range;

/// Default per-chunk temporary budget: 64 MiB.
pub const DEFAULT_PARTITION_BYTES: usize = 64 * 1024 * 1024;

/// Bytes of chunk temporaries needed per point.
#[must_use]
pub const fn per_point_bytes<T>(
    num_inputs: usize,
    num_outputs: usize,
    include_reverse_index: bool,
) -> usize {
    let values = size_of::<T>() * (num_inputs + num_outputs);
    if include_reverse_index {
        values + size_of::<ReverseIndex>()
    } else {
        values
    }
}

/// Largest point count whose chunk temporaries fit in `budget_bytes`.
///
/// Zero when the budget cannot hold a single point. When the per-point cost
/// is zero (no feature vectors at all) the budget does not constrain the
/// chunk and `usize::MAX` is returned.
#[must_use]
pub const fn compute_partition_size<T>(
    num_inputs: usize,
    num_outputs: usize,
    include_reverse_index: bool,
    budget_bytes: usize,
) -> usize {
    let per_point = per_point_bytes::<T>(num_inputs, num_outputs, include_reverse_index);
    if per_point == 0 {
        usize::MAX
    } else {
        budget_bytes / per_point
    }
}

/// Disjoint, ordered chunks covering `0..total`.
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    next: usize,
    total: usize,
    chunk: usize,
}

impl ChunkRanges {
    #[must_use]
    pub const fn new(total: usize, chunk: usize) -> Self {
        Self {
            next: 0,
            total,
            chunk,
        }
    }
}

impl Iterator for ChunkRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.chunk == 0 || self.next >= self.total {
            return None;
        }
        let start = self.next;
        let end = start + self.chunk.min(self.total - start);
        self.next = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.chunk == 0 {
            return (0, Some(0));
        }
        let left = (self.total - self.next.min(self.total)).div_ceil(self.chunk);
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkRanges {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_points_of_two_in_four_out() {
        let per_point = per_point_bytes::<f64>(2, 4, true);
        assert_eq!(per_point, 52);
        assert_eq!(compute_partition_size::<f64>(2, 4, true, 100 * per_point), 100);
        assert_eq!(compute_partition_size::<f64>(2, 4, true, 100 * per_point + 51), 100);
    }

    #[test]
    fn reverse_index_costs_four_bytes() {
        assert_eq!(per_point_bytes::<f32>(1, 1, false), 8);
        assert_eq!(per_point_bytes::<f32>(1, 1, true), 12);
    }

    #[test]
    fn tiny_budget_fits_nothing() {
        assert_eq!(compute_partition_size::<f64>(2, 4, false, 47), 0);
        assert_eq!(compute_partition_size::<f64>(2, 4, false, 48), 1);
    }

    #[test]
    fn no_feature_vectors_is_unbounded() {
        assert_eq!(compute_partition_size::<f64>(0, 0, false, 0), usize::MAX);
    }

    #[test]
    fn chunks_cover_in_order() {
        let chunks: Vec<_> = ChunkRanges::new(10, 4).collect();
        assert_eq!(chunks, vec![0..4, 4..8, 8..10]);
        assert_eq!(ChunkRanges::new(10, 4).len(), 3);
    }

    #[test]
    fn exact_multiple_has_no_tail() {
        let chunks: Vec<_> = ChunkRanges::new(8, 4).collect();
        assert_eq!(chunks, vec![0..4, 4..8]);
    }

    #[test]
    fn degenerate_chunking_yields_nothing() {
        assert_eq!(ChunkRanges::new(10, 0).count(), 0);
        assert_eq!(ChunkRanges::new(0, 4).count(), 0);
    }

    #[test]
    fn oversized_chunk_is_one_range() {
        let chunks: Vec<_> = ChunkRanges::new(5, usize::MAX).collect();
        assert_eq!(chunks, vec![0..5]);
    }
}
