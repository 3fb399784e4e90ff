// SPDX-License-Identifier: AGPL-3.0-only

//! Synthetic multi-material mesh.
//!
//! Each element holds one or more materials. For every material the
//! generator lists the elements it occupies in the prefixed index-list
//! format and fills density and energy at its quadrature points; points of
//! unoccupied `(material, element)` pairs stay zero.

use ams_wf::layout::{GroupRanges, MeshShape};
use ams_wf::{AmsError, Real};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::ops::RangeInclusive;

/// Density range of generated states.
pub const DENSITY: RangeInclusive<Real> = 1.0..=3.0;
/// Specific internal energy range of generated states.
pub const ENERGY: RangeInclusive<Real> = 0.5..=2.5;

/// Chance that an element holds a given secondary material.
const MIX_PROBABILITY: f64 = 0.3;

/// A generated problem in the global sparse layout.
#[derive(Debug, Clone)]
pub struct Problem {
    pub shape: MeshShape,
    /// `num_groups` cumulative end offsets, then element indices per group.
    pub index_list: Vec<usize>,
    pub ranges: GroupRanges,
    pub density: Vec<Real>,
    pub energy: Vec<Real>,
}

impl Problem {
    /// Generate a reproducible problem.
    ///
    /// Every element gets one primary material (round robin) and each other
    /// material with probability 0.3.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] when any dimension is zero.
    pub fn generate(
        num_groups: usize,
        num_elems: usize,
        num_qpts: usize,
        seed: u64,
    ) -> Result<Self, AmsError> {
        if num_groups == 0 || num_elems == 0 || num_qpts == 0 {
            return Err(AmsError::Config(format!(
                "mesh dimensions must be positive, got {num_groups} materials × {num_elems} elements × {num_qpts} qpts"
            )));
        }
        let shape = MeshShape::new(num_qpts, num_elems, num_groups);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut occupancy = vec![Vec::new(); num_groups];
        for e in 0..num_elems {
            let primary = e % num_groups;
            for (g, elems) in occupancy.iter_mut().enumerate() {
                if g == primary || rng.gen_bool(MIX_PROBABILITY) {
                    elems.push(e);
                }
            }
        }

        let listed: usize = occupancy.iter().map(Vec::len).sum();
        let mut index_list = Vec::with_capacity(num_groups + listed);
        let mut end = num_groups;
        for elems in &occupancy {
            end += elems.len();
            index_list.push(end);
        }
        for elems in &occupancy {
            index_list.extend_from_slice(elems);
        }
        let ranges = GroupRanges::from_prefixed_index_list(&index_list, num_groups)?;

        let mut density = vec![0.0; shape.total_points()];
        let mut energy = vec![0.0; shape.total_points()];
        for (g, elems) in occupancy.iter().enumerate() {
            for &e in elems {
                for q in 0..num_qpts {
                    let i = shape.index(q, e, g);
                    density[i] = rng.gen_range(DENSITY);
                    energy[i] = rng.gen_range(ENERGY);
                }
            }
        }

        Ok(Self {
            shape,
            index_list,
            ranges,
            density,
            energy,
        })
    }

    /// Elements occupied by group `g`.
    #[must_use]
    pub fn elements(&self, g: usize) -> &[usize] {
        self.ranges
            .range(g)
            .map(|r| &self.index_list[r])
            .unwrap_or_default()
    }

    /// Points that belong to some material.
    #[must_use]
    pub fn active_points(&self) -> usize {
        (0..self.shape.num_groups)
            .map(|g| self.elements(g).len() * self.shape.num_qpts)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_element_has_its_primary_material() {
        let p = Problem::generate(3, 10, 2, 1).unwrap_or_else(|e| panic!("{e}"));
        for e in 0..10 {
            assert!(p.elements(e % 3).contains(&e));
        }
    }

    #[test]
    fn ranges_follow_the_prefix() {
        let p = Problem::generate(4, 16, 1, 9).unwrap_or_else(|e| panic!("{e}"));
        let r0 = p.ranges.range(0).unwrap_or_default();
        assert_eq!(r0.start, 4);
        assert_eq!(p.ranges.range(3).map(|r| r.end), Some(p.index_list.len()));
        for g in 0..4 {
            let elems = p.elements(g);
            assert!(elems.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn only_occupied_points_carry_state() {
        let p = Problem::generate(2, 8, 3, 5).unwrap_or_else(|e| panic!("{e}"));
        let occupied = p.density.iter().filter(|&&d| d > 0.0).count();
        assert_eq!(occupied, p.active_points());
        assert!(p.density.iter().all(|&d| d == 0.0 || DENSITY.contains(&d)));
    }

    #[test]
    fn generation_is_reproducible() {
        let a = Problem::generate(3, 20, 2, 42).unwrap_or_else(|e| panic!("{e}"));
        let b = Problem::generate(3, 20, 2, 42).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a.index_list, b.index_list);
        assert_eq!(a.energy, b.energy);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(Problem::generate(0, 4, 4, 0), Err(AmsError::Config(_))));
    }
}
