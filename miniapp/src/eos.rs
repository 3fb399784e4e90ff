// SPDX-License-Identifier: AGPL-3.0-only

//! Ideal-gas equation of state: the expensive backend of the mini-app.
//!
//! Inputs `[density, energy]`, outputs `[pressure, soundspeed², bulk
//! modulus, temperature]`:
//!
//! ```text
//!   p  = (γ − 1) ρ e
//!   c² = γ p / ρ
//!   K  = γ p
//!   T  = e / c_v
//! ```

use ams_wf::{Physics, Real};

pub const INPUTS: usize = 2;
pub const OUTPUTS: usize = 4;

/// Names of the output feature vectors, in order.
pub const OUTPUT_NAMES: [&str; OUTPUTS] = ["pressure", "soundspeed2", "bulkmod", "temperature"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdealGas {
    pub gamma: Real,
    pub specific_heat: Real,
}

impl IdealGas {
    #[must_use]
    pub const fn new(gamma: Real, specific_heat: Real) -> Self {
        Self {
            gamma,
            specific_heat,
        }
    }

    /// Monatomic gas with unit specific heat.
    #[must_use]
    pub const fn monatomic() -> Self {
        Self::new(5.0 / 3.0, 1.0)
    }

    /// Material `m` of a run: γ spread over (1.2, 1.7), c_v growing with `m`.
    #[must_use]
    pub fn for_material(m: usize) -> Self {
        let gamma = 1.2 + 0.5 * ((m % 7) as Real + 1.0) / 8.0;
        Self::new(gamma, 1.0 + 0.25 * m as Real)
    }

    /// Evaluate one point: `(pressure, soundspeed², bulkmod, temperature)`.
    #[must_use]
    pub fn state(&self, density: Real, energy: Real) -> [Real; OUTPUTS] {
        let pressure = (self.gamma - 1.0) * density * energy;
        let bulkmod = self.gamma * pressure;
        // γp/ρ without dividing, so vacant points (ρ = 0) stay finite
        let soundspeed2 = self.gamma * (self.gamma - 1.0) * energy;
        [
            pressure,
            soundspeed2,
            bulkmod,
            energy / self.specific_heat,
        ]
    }
}

impl Physics for IdealGas {
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]) {
        let (density, energy) = (inputs[0], inputs[1]);
        for i in 0..density.len() {
            for (out, v) in outputs.iter_mut().zip(self.state(density[i], energy[i])) {
                out[i] = v;
            }
        }
    }
}

/// Root-mean-square difference per output vector between `approx` and
/// `exact`, over the first `n` points.
#[must_use]
pub fn rmse(n: usize, approx: &[&[Real]], exact: &[&[Real]]) -> Vec<Real> {
    approx
        .iter()
        .zip(exact)
        .map(|(a, e)| {
            if n == 0 {
                return 0.0;
            }
            let sum: Real = a[..n]
                .iter()
                .zip(&e[..n])
                .map(|(x, y)| (x - y) * (x - y))
                .sum();
            (sum / n as Real).sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monatomic_state() {
        let gas = IdealGas::monatomic();
        let [p, c2, k, t] = gas.state(3.0, 2.0);
        assert!((p - 4.0).abs() < 1e-12);
        assert!((k - 20.0 / 3.0).abs() < 1e-12);
        assert!((c2 - k / 3.0).abs() < 1e-12);
        assert!((t - 2.0).abs() < 1e-12);
    }

    #[test]
    fn eval_matches_state() {
        let gas = IdealGas::for_material(3);
        let rho = [1.0, 2.0];
        let e = [0.5, 4.0];
        let mut out = vec![vec![0.0; 2]; OUTPUTS];
        let mut views: Vec<&mut [Real]> = out.iter_mut().map(Vec::as_mut_slice).collect();
        gas.eval(&[&rho[..], &e[..]], &mut views);
        let expected = gas.state(2.0, 4.0);
        for (k, v) in expected.iter().enumerate() {
            assert_eq!(out[k][1], *v);
        }
    }

    #[test]
    fn empty_batch_is_noop() {
        let gas = IdealGas::monatomic();
        let empty: [Real; 0] = [];
        let mut p: [Real; 0] = [];
        gas.eval(&[&empty[..], &empty[..]], &mut [&mut p[..]]);
    }

    #[test]
    fn materials_differ() {
        assert_ne!(IdealGas::for_material(0), IdealGas::for_material(1));
        let g = IdealGas::for_material(6).gamma;
        assert!(g > 1.2 && g < 1.7);
    }

    #[test]
    fn rmse_of_identical_is_zero() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0, 5.0];
        let r = rmse(3, &[&a[..], &a[..]], &[&a[..], &b[..]]);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - (4.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(rmse(0, &[&a[..]], &[&b[..]]), vec![0.0]);
    }
}
