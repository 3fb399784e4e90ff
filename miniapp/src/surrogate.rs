// SPDX-License-Identifier: AGPL-3.0-only

//! Tabulated surrogate: bilinear interpolation over a regular `(ρ, e)` grid.
//!
//! The table is filled once by running the real physics on every grid node;
//! evaluation is then a constant-cost lookup per point. Queries outside the
//! sampled domain are clamped to its edge, which is exactly where the
//! admission gate should stop trusting the answer.

use ams_wf::{Physics, Real, Surrogate};
use std::ops::RangeInclusive;

/// One regularly spaced table axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub lo: Real,
    pub hi: Real,
    pub nodes: usize,
}

impl Axis {
    /// Fewer than two nodes are raised to two.
    #[must_use]
    pub fn new(range: RangeInclusive<Real>, nodes: usize) -> Self {
        Self {
            lo: *range.start(),
            hi: *range.end(),
            nodes: nodes.max(2),
        }
    }

    #[must_use]
    pub fn node(&self, i: usize) -> Real {
        self.lo + (self.hi - self.lo) * i as Real / (self.nodes - 1) as Real
    }

    /// Cell index and fractional offset of `x`, clamped to the axis.
    fn locate(&self, x: Real) -> (usize, Real) {
        let cells = (self.nodes - 1) as Real;
        let t = ((x - self.lo) / (self.hi - self.lo) * cells).clamp(0.0, cells);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cell = (t.floor() as usize).min(self.nodes - 2);
        (cell, t - cell as Real)
    }

    #[must_use]
    pub fn contains(&self, x: Real) -> bool {
        (self.lo..=self.hi).contains(&x)
    }
}

/// Grid-sampled approximation of a two-input physics model.
#[derive(Debug, Clone)]
pub struct TabulatedSurrogate {
    density: Axis,
    energy: Axis,
    /// `tables[k][i * energy.nodes + j]` = output `k` at `(ρ_i, e_j)`.
    tables: Vec<Vec<Real>>,
}

impl TabulatedSurrogate {
    /// Sample `physics` (with `outputs` output vectors) on the grid.
    #[must_use]
    pub fn sample(physics: &dyn Physics, outputs: usize, density: Axis, energy: Axis) -> Self {
        let nodes = density.nodes * energy.nodes;
        let mut rho = Vec::with_capacity(nodes);
        let mut e = Vec::with_capacity(nodes);
        for i in 0..density.nodes {
            for j in 0..energy.nodes {
                rho.push(density.node(i));
                e.push(energy.node(j));
            }
        }
        let mut tables = vec![vec![0.0; nodes]; outputs];
        let mut views: Vec<&mut [Real]> = tables.iter_mut().map(Vec::as_mut_slice).collect();
        physics.eval(&[&rho[..], &e[..]], &mut views);
        Self {
            density,
            energy,
            tables,
        }
    }

    #[must_use]
    pub const fn density_axis(&self) -> &Axis {
        &self.density
    }

    #[must_use]
    pub const fn energy_axis(&self) -> &Axis {
        &self.energy
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.tables.len()
    }

    /// Interpolated outputs at one point.
    pub fn interpolate(&self, density: Real, energy: Real, out: &mut [Real]) {
        let (i, u) = self.density.locate(density);
        let (j, v) = self.energy.locate(energy);
        let stride = self.energy.nodes;
        let corners = [
            (i * stride + j, (1.0 - u) * (1.0 - v)),
            (i * stride + j + 1, (1.0 - u) * v),
            ((i + 1) * stride + j, u * (1.0 - v)),
            ((i + 1) * stride + j + 1, u * v),
        ];
        for (slot, table) in out.iter_mut().zip(&self.tables) {
            *slot = corners.iter().map(|&(node, w)| w * table[node]).sum();
        }
    }
}

impl Surrogate for TabulatedSurrogate {
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]) {
        let mut point = vec![0.0; self.tables.len()];
        for (i, (&rho, &e)) in inputs[0].iter().zip(inputs[1]).enumerate() {
            self.interpolate(rho, e, &mut point);
            for (out, &v) in outputs.iter_mut().zip(&point) {
                out[i] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eos::{IdealGas, OUTPUTS};

    fn table() -> (IdealGas, TabulatedSurrogate) {
        let gas = IdealGas::monatomic();
        let s = TabulatedSurrogate::sample(
            &gas,
            OUTPUTS,
            Axis::new(1.0..=3.0, 9),
            Axis::new(0.5..=2.5, 9),
        );
        (gas, s)
    }

    #[test]
    fn exact_on_nodes() {
        let (gas, s) = table();
        let mut out = [0.0; OUTPUTS];
        let rho = s.density_axis().node(3);
        let e = s.energy_axis().node(5);
        s.interpolate(rho, e, &mut out);
        let exact = gas.state(rho, e);
        for k in 0..OUTPUTS {
            assert!((out[k] - exact[k]).abs() < 1e-12, "output {k}");
        }
    }

    #[test]
    fn bilinear_in_each_variable() {
        // p = (γ-1) ρ e is bilinear, so interpolation reproduces it anywhere inside
        let (gas, s) = table();
        let mut out = [0.0; OUTPUTS];
        s.interpolate(1.37, 2.11, &mut out);
        assert!((out[0] - gas.state(1.37, 2.11)[0]).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_domain() {
        let (_, s) = table();
        let mut inside = [0.0; OUTPUTS];
        let mut outside = [0.0; OUTPUTS];
        s.interpolate(3.0, 2.5, &mut inside);
        s.interpolate(30.0, 25.0, &mut outside);
        assert_eq!(inside, outside);
    }

    #[test]
    fn surrogate_eval_fills_every_point() {
        let (_, s) = table();
        let rho = [1.0, 2.0, 3.0];
        let e = [1.0, 1.0, 1.0];
        let mut out = vec![vec![Real::NAN; 3]; OUTPUTS];
        let mut views: Vec<&mut [Real]> = out.iter_mut().map(Vec::as_mut_slice).collect();
        s.eval(&[&rho[..], &e[..]], &mut views);
        assert!(out.iter().flatten().all(|v| v.is_finite()));
    }
}
