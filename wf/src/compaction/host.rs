// SPDX-License-Identifier: AGPL-3.0-only

//! Sequential kernels. Callers have validated arity and lengths.

use super::cast::{Real, Scalar};
use super::ReverseIndex;

pub(super) fn count(predicate: &[bool], target: bool) -> usize {
    predicate.iter().filter(|&&p| p == target).count()
}

pub(super) fn pack<T: Copy>(
    predicate: &[bool],
    sparse: &[&[T]],
    dense: &mut [&mut [T]],
    mut reverse_index: Option<&mut [ReverseIndex]>,
    target: bool,
) {
    let mut packed = 0;
    for (i, &p) in predicate.iter().enumerate() {
        if p != target {
            continue;
        }
        for (dst, src) in dense.iter_mut().zip(sparse) {
            dst[packed] = src[i];
        }
        if let Some(index) = reverse_index.as_deref_mut() {
            index[packed] = i as ReverseIndex;
        }
        packed += 1;
    }
}

pub(super) fn unpack<T: Copy>(
    predicate: &[bool],
    dense: &[&[T]],
    sparse: &mut [&mut [T]],
    target: bool,
) {
    let mut packed = 0;
    for (i, &p) in predicate.iter().enumerate() {
        if p != target {
            continue;
        }
        for (dst, src) in sparse.iter_mut().zip(dense) {
            dst[i] = src[packed];
        }
        packed += 1;
    }
}

pub(super) fn unpack_indexed<T: Copy>(
    reverse_index: &[ReverseIndex],
    dense: &[&[T]],
    sparse: &mut [&mut [T]],
) {
    for (dst, src) in sparse.iter_mut().zip(dense) {
        for (k, &i) in reverse_index.iter().enumerate() {
            dst[i as usize] = src[k];
        }
    }
}

/// One pass per feature, strided writes into the point-major output.
pub(super) fn linearize<S: Scalar>(n: usize, features: &[&[S]], out: &mut [Real]) {
    let stride = features.len();
    for (d, feature) in features.iter().enumerate() {
        for (i, &v) in feature[..n].iter().enumerate() {
            out[i * stride + d] = v.to_real();
        }
    }
}
