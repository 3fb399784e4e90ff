// SPDX-License-Identifier: AGPL-3.0-only

//! Admission gates for the mini-app.
//!
//! - [`BoundsGate`]: trust the table only well inside the domain it was
//!   sampled on.
//! - [`RandomGate`]: admit a fixed fraction of points at random, for load
//!   studies where accuracy does not matter.

use crate::surrogate::{Axis, TabulatedSurrogate};
use ams_wf::{AdmissionGate, Real};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Admit `(ρ, e)` points inside the sampled domain shrunk by `margin` (a
/// fraction of each axis' width) on every side.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsGate {
    density: (Real, Real),
    energy: (Real, Real),
}

fn shrink(axis: &Axis, margin: Real) -> (Real, Real) {
    let pad = (axis.hi - axis.lo) * margin;
    (axis.lo + pad, axis.hi - pad)
}

impl BoundsGate {
    #[must_use]
    pub fn for_table(table: &TabulatedSurrogate, margin: Real) -> Self {
        Self {
            density: shrink(table.density_axis(), margin),
            energy: shrink(table.energy_axis(), margin),
        }
    }

    #[must_use]
    pub fn admits(&self, density: Real, energy: Real) -> bool {
        (self.density.0..=self.density.1).contains(&density)
            && (self.energy.0..=self.energy.1).contains(&energy)
    }
}

impl AdmissionGate for BoundsGate {
    fn evaluate(&self, inputs: &[&[Real]], predicate: &mut [bool]) {
        for (p, (&rho, &e)) in predicate.iter_mut().zip(inputs[0].iter().zip(inputs[1])) {
            *p = self.admits(rho, e);
        }
    }
}

/// Seeded Bernoulli admission with acceptance probability `fraction`.
///
/// The stream is reseeded from the seed and the batch itself on every call,
/// so the same batch always gets the same predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomGate {
    pub fraction: Real,
    pub seed: u64,
}

impl RandomGate {
    #[must_use]
    pub fn new(fraction: Real, seed: u64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            seed,
        }
    }

    fn rng_for(&self, inputs: &[&[Real]], n: usize) -> ChaCha8Rng {
        let first = inputs
            .first()
            .and_then(|v| v.first())
            .map_or(0, |x| x.to_bits());
        ChaCha8Rng::seed_from_u64(self.seed ^ (n as u64).rotate_left(32) ^ first)
    }
}

impl AdmissionGate for RandomGate {
    fn evaluate(&self, inputs: &[&[Real]], predicate: &mut [bool]) {
        let mut rng = self.rng_for(inputs, predicate.len());
        for p in predicate.iter_mut() {
            *p = rng.gen::<Real>() < self.fraction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eos::{IdealGas, OUTPUTS};

    fn gate(margin: Real) -> BoundsGate {
        let table = TabulatedSurrogate::sample(
            &IdealGas::monatomic(),
            OUTPUTS,
            Axis::new(0.0..=10.0, 3),
            Axis::new(0.0..=1.0, 3),
        );
        BoundsGate::for_table(&table, margin)
    }

    #[test]
    fn margin_shrinks_domain() {
        let g = gate(0.1);
        assert!(g.admits(5.0, 0.5));
        assert!(g.admits(1.0, 0.1));
        assert!(!g.admits(0.5, 0.5));
        assert!(!g.admits(5.0, 0.95));
    }

    #[test]
    fn bounds_gate_fills_predicate() {
        let g = gate(0.0);
        let rho = [1.0, 11.0, 3.0];
        let e = [0.5, 0.5, -0.1];
        let mut p = [false; 3];
        g.evaluate(&[&rho[..], &e[..]], &mut p);
        assert_eq!(p, [true, false, false]);
    }

    #[test]
    fn random_gate_is_reproducible_and_near_fraction() {
        let g = RandomGate::new(0.25, 7);
        let x: Vec<Real> = (0..10_000).map(Real::from).collect();
        let mut a = vec![false; x.len()];
        let mut b = vec![false; x.len()];
        g.evaluate(&[&x[..]], &mut a);
        g.evaluate(&[&x[..]], &mut b);
        assert_eq!(a, b);
        let admitted = a.iter().filter(|&&p| p).count() as Real / a.len() as Real;
        assert!((admitted - 0.25).abs() < 0.03, "admitted {admitted}");
    }

    #[test]
    fn random_gate_extremes() {
        let x = [1.0; 64];
        let mut p = [true; 64];
        RandomGate::new(0.0, 1).evaluate(&[&x[..]], &mut p);
        assert!(p.iter().all(|&v| !v));
        RandomGate::new(2.0, 1).evaluate(&[&x[..]], &mut p);
        assert!(p.iter().all(|&v| v));
    }
}
