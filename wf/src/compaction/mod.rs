// SPDX-License-Identifier: AGPL-3.0-only

//! Stream compaction over parallel feature vectors.
//!
//! A *feature vector* is one planar array per physical quantity; a set of
//! them describes the same points. Packing copies the points whose predicate
//! flag equals a target value into contiguous dense vectors, in original
//! order. Unpacking writes them back, either by re-scanning the predicate or
//! through the reverse index recorded while packing.
//!
//! ```text
//!   predicate  T F T T F F T T F T        target = false
//!   sparse     a b c d e f g h i j   ──pack──▶  dense  b e f i
//!                                               index  1 4 5 8
//! ```
//!
//! [`Compactor`] is the one strategy object for both execution modes. The
//! sequential and parallel kernels produce identical output for identical
//! input, so callers never branch on the mode themselves.

pub mod cast;
mod host;
mod parallel;

use crate::error::{check_arity, check_len, AmsError, Result};
use crate::resource::ExecutionMode;
use cast::{Real, Scalar};

/// Element type of reverse-index buffers.
pub type ReverseIndex = u32;

/// Predicate value marking points the cheap model may not answer.
pub const NOT_ADMITTED: bool = false;

/// Mode-selected compaction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compactor {
    /// Single-threaded scans.
    Sequential,
    /// Block-count, exclusive-scan, scatter kernels on the rayon pool.
    Parallel,
}

impl Compactor {
    #[must_use]
    pub const fn for_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Host => Self::Sequential,
            ExecutionMode::Accelerator => Self::Parallel,
        }
    }

    /// Number of positions in `predicate[..n]` equal to `target`.
    #[must_use]
    pub fn count(self, predicate: &[bool], n: usize, target: bool) -> usize {
        let predicate = &predicate[..n.min(predicate.len())];
        match self {
            Self::Sequential => host::count(predicate, target),
            Self::Parallel => parallel::block_counts(predicate, target).iter().sum(),
        }
    }

    /// Pack the points of `sparse[*][..n]` whose flag equals `target`.
    ///
    /// Returns the packed count. The dense vectors receive the points in
    /// their original relative order.
    ///
    /// # Errors
    ///
    /// [`AmsError::DimensionMismatch`] when the two sets differ in arity,
    /// [`AmsError::ShortBuffer`] when the predicate or a sparse vector is
    /// shorter than `n` or a dense vector cannot hold the packed points.
    /// Nothing is written on error.
    pub fn pack<T: Copy + Send + Sync>(
        self,
        predicate: &[bool],
        n: usize,
        sparse: &[&[T]],
        dense: &mut [&mut [T]],
        target: bool,
    ) -> Result<usize> {
        self.pack_impl(predicate, None, n, sparse, dense, target)
    }

    /// [`Self::pack`], additionally recording the original offset of every
    /// packed point in `reverse_index[..packed]`.
    ///
    /// # Errors
    ///
    /// As [`Self::pack`]; also [`AmsError::IndexOverflow`] when `n` exceeds
    /// the reverse-index range and [`AmsError::ShortBuffer`] when
    /// `reverse_index` cannot hold the packed count.
    pub fn pack_indexed<T: Copy + Send + Sync>(
        self,
        predicate: &[bool],
        reverse_index: &mut [ReverseIndex],
        n: usize,
        sparse: &[&[T]],
        dense: &mut [&mut [T]],
        target: bool,
    ) -> Result<usize> {
        if n > ReverseIndex::MAX as usize {
            return Err(AmsError::IndexOverflow { n });
        }
        self.pack_impl(predicate, Some(reverse_index), n, sparse, dense, target)
    }

    fn pack_impl<T: Copy + Send + Sync>(
        self,
        predicate: &[bool],
        reverse_index: Option<&mut [ReverseIndex]>,
        n: usize,
        sparse: &[&[T]],
        dense: &mut [&mut [T]],
        target: bool,
    ) -> Result<usize> {
        check_arity(sparse.len(), dense.len())?;
        check_len("predicate", [predicate.len()], n)?;
        check_len("sparse feature vector", sparse.iter().map(|v| v.len()), n)?;
        let predicate = &predicate[..n];

        match self {
            Self::Sequential => {
                let packed = host::count(predicate, target);
                check_packed_room(&*dense, reverse_index.as_deref(), packed)?;
                host::pack(predicate, sparse, dense, reverse_index, target);
                Ok(packed)
            }
            Self::Parallel => {
                let counts = parallel::block_counts(predicate, target);
                let packed = counts.iter().sum();
                check_packed_room(&*dense, reverse_index.as_deref(), packed)?;
                parallel::pack(predicate, sparse, dense, reverse_index, &counts, target);
                Ok(packed)
            }
        }
    }

    /// Inverse of [`Self::pack`]: scatter dense points back to every position
    /// of `sparse[*][..n]` whose flag equals `target`.
    ///
    /// Must be called with the predicate and `n` of the matching pack call;
    /// positions with the other flag value are left untouched.
    ///
    /// # Errors
    ///
    /// [`AmsError::DimensionMismatch`] or [`AmsError::ShortBuffer`], raised
    /// before anything is written.
    pub fn unpack<T: Copy + Send + Sync>(
        self,
        predicate: &[bool],
        n: usize,
        dense: &[&[T]],
        sparse: &mut [&mut [T]],
        target: bool,
    ) -> Result<()> {
        check_arity(sparse.len(), dense.len())?;
        check_len("predicate", [predicate.len()], n)?;
        check_len("sparse feature vector", sparse.iter().map(|v| v.len()), n)?;
        let predicate = &predicate[..n];

        match self {
            Self::Sequential => {
                let packed = host::count(predicate, target);
                check_len("dense feature vector", dense.iter().map(|v| v.len()), packed)?;
                host::unpack(predicate, dense, sparse, target);
            }
            Self::Parallel => {
                let counts = parallel::block_counts(predicate, target);
                check_len(
                    "dense feature vector",
                    dense.iter().map(|v| v.len()),
                    counts.iter().sum(),
                )?;
                parallel::unpack(predicate, dense, sparse, &counts, target);
            }
        }
        Ok(())
    }

    /// Scatter `dense[*][i]` to `sparse[*][reverse_index[i]]` for every
    /// `i < packed`. Runs in O(packed) and does not need the predicate.
    ///
    /// # Errors
    ///
    /// [`AmsError::DimensionMismatch`] or [`AmsError::ShortBuffer`] (an index
    /// past the end of a sparse vector counts as a short sparse vector).
    pub fn unpack_indexed<T: Copy + Send + Sync>(
        self,
        reverse_index: &[ReverseIndex],
        packed: usize,
        dense: &[&[T]],
        sparse: &mut [&mut [T]],
    ) -> Result<()> {
        check_arity(sparse.len(), dense.len())?;
        check_len("reverse index", [reverse_index.len()], packed)?;
        check_len("dense feature vector", dense.iter().map(|v| v.len()), packed)?;
        let reverse_index = &reverse_index[..packed];
        if let Some(&max) = reverse_index.iter().max() {
            check_len(
                "sparse feature vector",
                sparse.iter().map(|v| v.len()),
                max as usize + 1,
            )?;
        }

        match self {
            Self::Sequential => host::unpack_indexed(reverse_index, dense, sparse),
            Self::Parallel => parallel::unpack_indexed(reverse_index, dense, sparse),
        }
        Ok(())
    }

    /// Interleave `features[*][..n]` into `out[..n * F]`, point-major
    /// (`out[i * F + d] = features[d][i]`), converting to [`Real`].
    ///
    /// # Errors
    ///
    /// [`AmsError::ShortBuffer`] when a feature vector or `out` is too short.
    pub fn linearize_into<S: Scalar>(
        self,
        n: usize,
        features: &[&[S]],
        out: &mut [Real],
    ) -> Result<()> {
        check_len("feature vector", features.iter().map(|v| v.len()), n)?;
        check_len("linearized output", [out.len()], n * features.len())?;
        match self {
            Self::Sequential => host::linearize(n, features, out),
            Self::Parallel => parallel::linearize(n, features, out),
        }
        Ok(())
    }
}

fn check_packed_room<T>(
    dense: &[&mut [T]],
    reverse_index: Option<&[ReverseIndex]>,
    packed: usize,
) -> Result<()> {
    check_len("dense feature vector", dense.iter().map(|v| v.len()), packed)?;
    if let Some(index) = reverse_index {
        check_len("reverse index", [index.len()], packed)?;
    }
    Ok(())
}

impl crate::resource::ExecutionContext {
    /// Allocate and fill a point-major interleaved copy of `features[*][..n]`.
    ///
    /// # Errors
    ///
    /// [`AmsError::Allocation`] or [`AmsError::ShortBuffer`].
    pub fn linearize<S: Scalar>(
        &self,
        n: usize,
        features: &[&[S]],
    ) -> Result<crate::resource::Buffer<Real>> {
        let mut out = self.allocate::<Real>(n * features.len())?;
        self.compactor().linearize_into(n, features, &mut out)?;
        Ok(out)
    }
}
