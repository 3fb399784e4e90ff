// SPDX-License-Identifier: AGPL-3.0-only

//! Sparse ↔ dense layout translation at element granularity.
//!
//! The global sparse buffers are planar per quantity and shaped
//! `[group][element][quadrature point]`, quadrature point fastest:
//!
//! ```text
//!   offset(q, e, g) = q + nq * (e + ne * g)
//! ```
//!
//! A group usually occupies only some elements. The shared index list
//! names them; [`GroupRanges`] says which slice of that list belongs to
//! which group. [`gather`] copies the active elements of one group into a
//! dense `[active element][quadrature point]` buffer and [`scatter`] writes
//! them back.

use crate::error::{check_arity, check_len, AmsError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Dimensions of the global sparse layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshShape {
    pub num_qpts: usize,
    pub num_elems: usize,
    pub num_groups: usize,
}

impl MeshShape {
    #[must_use]
    pub const fn new(num_qpts: usize, num_elems: usize, num_groups: usize) -> Self {
        Self {
            num_qpts,
            num_elems,
            num_groups,
        }
    }

    /// Planar offset of quadrature point `q` of element `e` in group `g`.
    #[must_use]
    pub const fn index(&self, q: usize, e: usize, g: usize) -> usize {
        q + self.num_qpts * (e + self.num_elems * g)
    }

    /// Points per group when every element is active.
    #[must_use]
    pub const fn points_per_group(&self) -> usize {
        self.num_qpts * self.num_elems
    }

    /// Length of each global sparse buffer.
    #[must_use]
    pub const fn total_points(&self) -> usize {
        self.points_per_group() * self.num_groups
    }

    /// The planar range holding all of group `g`'s points.
    #[must_use]
    pub const fn group_block(&self, g: usize) -> Range<usize> {
        let start = self.index(0, 0, g);
        start..start + self.points_per_group()
    }
}

/// Per-group `(start, end)` ranges into the shared index list.
///
/// Validated on construction: ranges are ordered, non-overlapping, and lie
/// inside the list they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRanges {
    ranges: Vec<Range<usize>>,
}

impl GroupRanges {
    /// Build from explicit ranges into an index list of length `list_len`.
    ///
    /// # Errors
    ///
    /// [`AmsError::GroupRange`] for a reversed range, a range past
    /// `list_len`, or a range that starts before its predecessor ends.
    pub fn from_ranges(ranges: Vec<Range<usize>>, list_len: usize) -> Result<Self> {
        let mut floor = 0;
        for (group, r) in ranges.iter().enumerate() {
            if r.start > r.end || r.end > list_len || r.start < floor {
                return Err(AmsError::GroupRange {
                    group,
                    start: r.start,
                    end: r.end,
                    len: list_len,
                });
            }
            floor = r.end;
        }
        Ok(Self { ranges })
    }

    /// Build from cumulative end offsets: group `g` spans
    /// `ends[g - 1]..ends[g]`, the first group starting at `first_start`.
    ///
    /// # Errors
    ///
    /// As [`Self::from_ranges`].
    pub fn from_cumulative_ends(ends: &[usize], first_start: usize, list_len: usize) -> Result<Self> {
        let mut start = first_start;
        let ranges = ends
            .iter()
            .map(|&end| {
                let r = start..end;
                start = end;
                r
            })
            .collect();
        Self::from_ranges(ranges, list_len)
    }

    /// Build from the prefixed index-list format: the first `num_groups`
    /// entries are cumulative end offsets (counted from the start of the
    /// list), followed by the element indices themselves.
    ///
    /// # Errors
    ///
    /// [`AmsError::GroupRange`] when the list is shorter than its prefix or
    /// the offsets are inconsistent.
    pub fn from_prefixed_index_list(list: &[usize], num_groups: usize) -> Result<Self> {
        if list.len() < num_groups {
            return Err(AmsError::GroupRange {
                group: 0,
                start: 0,
                end: num_groups,
                len: list.len(),
            });
        }
        Self::from_cumulative_ends(&list[..num_groups], num_groups, list.len())
    }

    #[must_use]
    pub fn range(&self, group: usize) -> Option<Range<usize>> {
        self.ranges.get(group).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.ranges.iter().cloned()
    }
}

fn check_elements(shape: &MeshShape, group: usize, elements: &[usize]) -> Result<()> {
    if group >= shape.num_groups {
        return Err(AmsError::GroupRange {
            group,
            start: group,
            end: group + 1,
            len: shape.num_groups,
        });
    }
    if let Some(&index) = elements.iter().find(|&&e| e >= shape.num_elems) {
        return Err(AmsError::ElementIndex {
            group,
            index,
            elements: shape.num_elems,
        });
    }
    Ok(())
}

/// Copy the points of `elements` in `group` from the global sparse buffers
/// into dense `[active element][quadrature point]` buffers.
///
/// # Errors
///
/// [`AmsError::DimensionMismatch`], [`AmsError::ElementIndex`],
/// [`AmsError::GroupRange`] or [`AmsError::ShortBuffer`], all raised before
/// any copy.
pub fn gather<T: Copy>(
    shape: &MeshShape,
    group: usize,
    elements: &[usize],
    sparse: &[&[T]],
    dense: &mut [&mut [T]],
) -> Result<()> {
    check_arity(sparse.len(), dense.len())?;
    check_elements(shape, group, elements)?;
    check_len("sparse feature vector", sparse.iter().map(|v| v.len()), shape.total_points())?;
    let nq = shape.num_qpts;
    check_len("dense feature vector", dense.iter().map(|v| v.len()), elements.len() * nq)?;

    for (src, dst) in sparse.iter().zip(dense.iter_mut()) {
        for (k, &e) in elements.iter().enumerate() {
            let from = shape.index(0, e, group);
            dst[k * nq..(k + 1) * nq].copy_from_slice(&src[from..from + nq]);
        }
    }
    Ok(())
}

/// Inverse of [`gather`]: write dense per-element blocks back to the global
/// sparse buffers. Points of inactive elements are left untouched.
///
/// # Errors
///
/// As [`gather`].
pub fn scatter<T: Copy>(
    shape: &MeshShape,
    group: usize,
    elements: &[usize],
    dense: &[&[T]],
    sparse: &mut [&mut [T]],
) -> Result<()> {
    check_arity(sparse.len(), dense.len())?;
    check_elements(shape, group, elements)?;
    check_len("sparse feature vector", sparse.iter().map(|v| v.len()), shape.total_points())?;
    let nq = shape.num_qpts;
    check_len("dense feature vector", dense.iter().map(|v| v.len()), elements.len() * nq)?;

    for (src, dst) in dense.iter().zip(sparse.iter_mut()) {
        for (k, &e) in elements.iter().enumerate() {
            let to = shape.index(0, e, group);
            dst[to..to + nq].copy_from_slice(&src[k * nq..(k + 1) * nq]);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn planar_index_is_qpt_fastest() {
        let shape = MeshShape::new(2, 3, 4);
        assert_eq!(shape.index(0, 0, 0), 0);
        assert_eq!(shape.index(1, 0, 0), 1);
        assert_eq!(shape.index(0, 1, 0), 2);
        assert_eq!(shape.index(0, 0, 1), 6);
        assert_eq!(shape.group_block(2), 12..18);
        assert_eq!(shape.total_points(), 24);
    }

    #[test]
    fn prefixed_list_ranges_start_after_prefix() {
        // two groups: group 0 -> elements [0, 2], group 1 -> element [1]
        let list = [4, 5, 0, 2, 1];
        let ranges = GroupRanges::from_prefixed_index_list(&list, 2).unwrap();
        assert_eq!(ranges.range(0), Some(2..4));
        assert_eq!(ranges.range(1), Some(4..5));
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let err = GroupRanges::from_ranges(vec![0..3, 2..4], 4).unwrap_err();
        assert!(matches!(err, AmsError::GroupRange { group: 1, .. }));
    }

    #[test]
    fn range_past_list_is_rejected() {
        assert!(GroupRanges::from_ranges(vec![0..5], 4).is_err());
        assert!(GroupRanges::from_prefixed_index_list(&[3], 2).is_err());
    }

    #[test]
    fn empty_group_range_is_valid() {
        let ranges = GroupRanges::from_cumulative_ends(&[2, 2, 3], 0, 3).unwrap();
        assert_eq!(ranges.range(1), Some(2..2));
    }

    #[test]
    fn gather_then_scatter_restores_active_elements() {
        let shape = MeshShape::new(2, 3, 2);
        let src: Vec<f64> = (0..12).map(f64::from).collect();
        let mut dense = vec![0.0; 4];
        gather(&shape, 1, &[2, 0], &[&src[..]], &mut [&mut dense[..]]).unwrap();
        assert_eq!(dense, vec![10.0, 11.0, 6.0, 7.0]);

        let mut back = vec![-1.0; 12];
        scatter(&shape, 1, &[2, 0], &[&dense[..]], &mut [&mut back[..]]).unwrap();
        let expected = [
            -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, 6.0, 7.0, -1.0, -1.0, 10.0, 11.0,
        ];
        assert_eq!(back, expected);
    }

    #[test]
    fn element_out_of_mesh_is_rejected_before_copy() {
        let shape = MeshShape::new(1, 2, 1);
        let src = [1.0, 2.0];
        let mut dense = vec![0.0; 2];
        let err = gather(&shape, 0, &[0, 5], &[&src[..]], &mut [&mut dense[..]]).unwrap_err();
        assert!(matches!(err, AmsError::ElementIndex { index: 5, .. }));
        assert_eq!(dense, vec![0.0, 0.0]);
    }

    #[test]
    fn gather_checks_arity() {
        let shape = MeshShape::new(1, 2, 1);
        let src = [1.0, 2.0];
        let err = gather::<f64>(&shape, 0, &[0], &[&src[..]], &mut []).unwrap_err();
        assert!(matches!(err, AmsError::DimensionMismatch { .. }));
    }
}
