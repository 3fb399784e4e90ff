// SPDX-License-Identifier: AGPL-3.0-only

//! Data-parallel kernels for accelerator execution.
//!
//! Compaction is the classic three-phase scheme: count matches per block,
//! exclusive-scan the counts into output offsets, then let every block write
//! its own disjoint output segment. Segments are carved out of the output
//! with `split_at_mut`, so no two workers ever alias. The packed order is the
//! original order, identical to the sequential kernels.

use super::cast::{Real, Scalar};
use super::ReverseIndex;
use rayon::prelude::*;

/// Points handled by one kernel block.
pub(super) const BLOCK: usize = 4096;

/// Matches of `target` per block of `predicate`.
pub(super) fn block_counts(predicate: &[bool], target: bool) -> Vec<usize> {
    predicate
        .par_chunks(BLOCK)
        .map(|block| block.iter().filter(|&&p| p == target).count())
        .collect()
}

fn exclusive_scan(counts: &[usize]) -> Vec<usize> {
    let mut acc = 0;
    counts
        .iter()
        .map(|&c| {
            let start = acc;
            acc += c;
            start
        })
        .collect()
}

/// Carve consecutive segments of the given lengths off the front of `dst`.
fn split_segments<'a, T>(mut dst: &'a mut [T], lens: &[usize]) -> Vec<&'a mut [T]> {
    let mut out = Vec::with_capacity(lens.len());
    for &len in lens {
        let (head, tail) = std::mem::take(&mut dst).split_at_mut(len);
        out.push(head);
        dst = tail;
    }
    out
}

/// Regroup per-feature segment lists into per-block lists.
fn transpose<'a, T>(per_feature: Vec<Vec<&'a mut [T]>>, blocks: usize) -> Vec<Vec<&'a mut [T]>> {
    let mut per_block: Vec<Vec<&'a mut [T]>> = (0..blocks)
        .map(|_| Vec::with_capacity(per_feature.len()))
        .collect();
    for segments in per_feature {
        for (b, seg) in segments.into_iter().enumerate() {
            per_block[b].push(seg);
        }
    }
    per_block
}

pub(super) fn pack<T: Copy + Send + Sync>(
    predicate: &[bool],
    sparse: &[&[T]],
    dense: &mut [&mut [T]],
    reverse_index: Option<&mut [ReverseIndex]>,
    counts: &[usize],
    target: bool,
) {
    let blocks = counts.len();
    let per_feature = dense
        .iter_mut()
        .map(|d| split_segments(&mut **d, counts))
        .collect();
    let per_block = transpose(per_feature, blocks);
    let index_segments: Vec<Option<&mut [ReverseIndex]>> = match reverse_index {
        Some(index) => split_segments(index, counts).into_iter().map(Some).collect(),
        None => (0..blocks).map(|_| None).collect(),
    };

    per_block
        .into_par_iter()
        .zip(index_segments)
        .enumerate()
        .for_each(|(b, (mut outs, mut index))| {
            let base = b * BLOCK;
            let end = (base + BLOCK).min(predicate.len());
            let mut k = 0;
            for i in base..end {
                if predicate[i] != target {
                    continue;
                }
                for (dst, src) in outs.iter_mut().zip(sparse) {
                    dst[k] = src[i];
                }
                if let Some(index) = index.as_deref_mut() {
                    index[k] = i as ReverseIndex;
                }
                k += 1;
            }
        });
}

pub(super) fn unpack<T: Copy + Send + Sync>(
    predicate: &[bool],
    dense: &[&[T]],
    sparse: &mut [&mut [T]],
    counts: &[usize],
    target: bool,
) {
    let n = predicate.len();
    let offsets = exclusive_scan(counts);
    let per_feature = sparse
        .iter_mut()
        .map(|s| s[..n].chunks_mut(BLOCK).collect())
        .collect();
    let per_block = transpose(per_feature, counts.len());

    per_block
        .into_par_iter()
        .enumerate()
        .for_each(|(b, mut outs)| {
            let base = b * BLOCK;
            let end = (base + BLOCK).min(n);
            let mut k = offsets[b];
            for (local, &p) in predicate[base..end].iter().enumerate() {
                if p != target {
                    continue;
                }
                for (dst, src) in outs.iter_mut().zip(dense) {
                    dst[local] = src[k];
                }
                k += 1;
            }
        });
}

pub(super) fn unpack_indexed<T: Copy + Send + Sync>(
    reverse_index: &[ReverseIndex],
    dense: &[&[T]],
    sparse: &mut [&mut [T]],
) {
    if reverse_index.is_empty() {
        return;
    }
    let ascending = reverse_index.par_windows(2).all(|w| w[0] < w[1]);
    if !ascending {
        // Targets may interleave; only features are independent.
        sparse
            .par_iter_mut()
            .zip(dense.par_iter())
            .for_each(|(dst, src)| {
                for (k, &i) in reverse_index.iter().enumerate() {
                    dst[i as usize] = src[k];
                }
            });
        return;
    }

    // Ascending targets: block b owns sparse[first(b)..first(b + 1)].
    let index_blocks: Vec<&[ReverseIndex]> = reverse_index.chunks(BLOCK).collect();
    let starts: Vec<usize> = index_blocks
        .iter()
        .enumerate()
        .map(|(b, block)| if b == 0 { 0 } else { block[0] as usize })
        .collect();
    let per_feature = sparse
        .iter_mut()
        .map(|s| {
            let len = s.len();
            let lens: Vec<usize> = starts
                .iter()
                .enumerate()
                .map(|(b, &start)| starts.get(b + 1).copied().unwrap_or(len) - start)
                .collect();
            split_segments(&mut **s, &lens)
        })
        .collect();
    let per_block = transpose(per_feature, index_blocks.len());

    per_block
        .into_par_iter()
        .zip(index_blocks)
        .enumerate()
        .for_each(|(b, (mut outs, block))| {
            let base = starts[b];
            for (local, &i) in block.iter().enumerate() {
                let k = b * BLOCK + local;
                for (dst, src) in outs.iter_mut().zip(dense) {
                    dst[i as usize - base] = src[k];
                }
            }
        });
}

/// One worker per output row; each row is one point's feature vector.
pub(super) fn linearize<S: Scalar>(n: usize, features: &[&[S]], out: &mut [Real]) {
    let stride = features.len();
    if stride == 0 || n == 0 {
        return;
    }
    out[..n * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, row)| {
            for (slot, feature) in row.iter_mut().zip(features) {
                *slot = feature[i].to_real();
            }
        });
}
