// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for the dispatch core.
//!
//! Every failure is fatal for the dispatch that raised it. Callers can still
//! pattern-match on the variant, or ask [`AmsError::kind`] whether the
//! failure was a configuration mistake or resource exhaustion.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AmsError>;

/// The two failure families of the dispatch core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched arities, short buffers, bad ranges or bad settings.
    Configuration,
    /// An allocation could not be satisfied.
    ResourceExhaustion,
}

/// Errors raised by compaction, layout translation and dispatch.
#[derive(Debug, Error)]
pub enum AmsError {
    /// Sparse and dense feature-vector sets have different cardinality.
    #[error("packing arrays size mismatch: {sparse} sparse vs {dense} dense feature vectors")]
    DimensionMismatch { sparse: usize, dense: usize },

    /// A buffer is shorter than the operation needs.
    #[error("{what} holds {actual} elements but {required} are required")]
    ShortBuffer {
        what: &'static str,
        required: usize,
        actual: usize,
    },

    /// Reverse indices are 32-bit; a chunk this large cannot be indexed.
    #[error("cannot record reverse indices for {n} points (limit {})", u32::MAX)]
    IndexOverflow { n: usize },

    /// A group's range does not fit the index list or overlaps its neighbour.
    #[error("group {group}: invalid index range {start}..{end} (index list holds {len})")]
    GroupRange {
        group: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    /// The index list names an element outside the mesh.
    #[error("group {group}: element index {index} out of range for {elements} elements")]
    ElementIndex {
        group: usize,
        index: usize,
        elements: usize,
    },

    /// The memory budget cannot hold even one point.
    #[error("partition budget of {budget} bytes cannot hold a single point ({per_point} bytes)")]
    PartitionBudget { budget: usize, per_point: usize },

    /// Buffers handed to a group do not match the group's declared arity.
    #[error("group {group}: expected {expected} feature vectors, got {actual}")]
    ArityMismatch {
        group: usize,
        expected: usize,
        actual: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Allocation failure.
    #[error("allocation of {elements} elements ({bytes} bytes) failed")]
    Allocation { elements: usize, bytes: usize },

    /// Sink or configuration file I/O.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl AmsError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Allocation { .. } => ErrorKind::ResourceExhaustion,
            _ => ErrorKind::Configuration,
        }
    }
}

/// Fail with [`AmsError::DimensionMismatch`] unless both sides have the same arity.
pub(crate) fn check_arity(sparse: usize, dense: usize) -> Result<()> {
    if sparse == dense {
        Ok(())
    } else {
        Err(AmsError::DimensionMismatch { sparse, dense })
    }
}

/// Fail with [`AmsError::ShortBuffer`] if any length is below `required`.
pub(crate) fn check_len(
    what: &'static str,
    lens: impl IntoIterator<Item = usize>,
    required: usize,
) -> Result<()> {
    for actual in lens {
        if actual < required {
            return Err(AmsError::ShortBuffer {
                what,
                required,
                actual,
            });
        }
    }
    Ok(())
}
