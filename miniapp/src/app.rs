// SPDX-License-Identifier: AGPL-3.0-only

//! Mini-app driver: one ideal-gas material per group, a tabulated surrogate
//! per material, and a pure-physics reference to measure surrogate error.

use crate::eos::{self, IdealGas, INPUTS, OUTPUTS};
use crate::mesh::{Problem, DENSITY, ENERGY};
use crate::surrogate::{Axis, TabulatedSurrogate};
use crate::uq::{BoundsGate, RandomGate};
use ams_wf::sink::{BinarySink, JsonLinesSink};
use ams_wf::{
    AdmissionGate, AmsError, Arity, DispatchReport, Group, Real, SampleSink, Workflow,
    WorkflowConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Admission policy applied to every material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateChoice {
    /// [`BoundsGate`] around each material's table.
    #[default]
    Bounds,
    /// [`RandomGate`] with [`RunSettings::admit_fraction`].
    Random,
    /// No surrogate at all: every point goes to physics.
    None,
}

impl fmt::Display for GateChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bounds => "bounds",
            Self::Random => "random",
            Self::None => "none",
        })
    }
}

impl FromStr for GateChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bounds" => Ok(Self::Bounds),
            "random" => Ok(Self::Random),
            "none" => Ok(Self::None),
            other => Err(format!("unknown gate '{other}' (bounds, random, none)")),
        }
    }
}

/// Problem and model parameters of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub materials: usize,
    pub elements: usize,
    pub qpts: usize,
    pub seed: u64,
    /// Grid nodes per table axis.
    pub table_nodes: usize,
    pub gate: GateChoice,
    /// Fraction of each table axis excluded by [`BoundsGate`].
    pub margin: Real,
    /// Acceptance probability of [`RandomGate`].
    pub admit_fraction: Real,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            materials: 5,
            elements: 10_000,
            qpts: 8,
            seed: 42,
            table_nodes: 32,
            gate: GateChoice::Bounds,
            margin: 0.05,
            admit_fraction: 0.8,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: DispatchReport,
    /// Global output buffers, one per [`eos::OUTPUT_NAMES`] entry.
    pub outputs: Vec<Vec<Real>>,
    /// Per-output RMSE over occupied points against pure physics.
    pub rmse: Vec<Real>,
}

impl RunOutcome {
    pub fn print_summary(&self) {
        self.report.print_summary();
        println!("  Surrogate error (RMSE vs physics):");
        for (name, err) in eos::OUTPUT_NAMES.iter().zip(&self.rmse) {
            println!("    {name:<12} {err:.3e}");
        }
    }
}

/// A generated problem plus the workflow that evaluates it.
#[derive(Debug)]
pub struct MiniApp {
    settings: RunSettings,
    problem: Problem,
    materials: Vec<IdealGas>,
    workflow: Workflow,
}

impl MiniApp {
    /// Generate the mesh and register one group per material.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] for zero dimensions or an invalid workflow
    /// configuration.
    pub fn new(settings: RunSettings, config: WorkflowConfig) -> Result<Self, AmsError> {
        let problem = Problem::generate(
            settings.materials,
            settings.elements,
            settings.qpts,
            settings.seed,
        )?;
        let mut workflow = Workflow::new(config)?;
        let materials: Vec<IdealGas> = (0..settings.materials)
            .map(IdealGas::for_material)
            .collect();
        for (m, gas) in materials.iter().enumerate() {
            workflow.add_group(build_group(&settings, m, *gas));
        }
        info!(
            materials = settings.materials,
            elements = settings.elements,
            qpts = settings.qpts,
            active_points = problem.active_points(),
            gate = %settings.gate,
            "mini-app ready"
        );
        Ok(Self {
            settings,
            problem,
            materials,
            workflow,
        })
    }

    #[must_use]
    pub const fn problem(&self) -> &Problem {
        &self.problem
    }

    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    #[must_use]
    pub const fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn set_sink(&mut self, sink: Box<dyn SampleSink>) {
        self.workflow.set_sink(sink);
    }

    /// Detach the sink (flushed).
    pub fn take_sink(&mut self) -> Option<Box<dyn SampleSink>> {
        self.workflow.take_sink()
    }

    /// Dispatch the whole mesh and score it against pure physics.
    ///
    /// # Errors
    ///
    /// Whatever [`Workflow::evaluate`] reports.
    pub fn run(&mut self) -> Result<RunOutcome, AmsError> {
        let p = &self.problem;
        let total = p.shape.total_points();
        let mut outputs = vec![vec![0.0; total]; OUTPUTS];
        let inputs = [&p.density[..], &p.energy[..]];
        let report = {
            let mut views: Vec<&mut [Real]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
            self.workflow
                .evaluate(&p.shape, &p.index_list, &p.ranges, &inputs, &mut views)?
        };
        let rmse = self.score(&outputs);
        info!(
            points = report.total_points(),
            physics_fraction = report.physics_fraction(),
            "run complete"
        );
        Ok(RunOutcome {
            report,
            outputs,
            rmse,
        })
    }

    /// RMSE over occupied points against each material's exact state.
    fn score(&self, outputs: &[Vec<Real>]) -> Vec<Real> {
        let p = &self.problem;
        let active = p.active_points();
        let mut approx = vec![Vec::with_capacity(active); OUTPUTS];
        let mut exact = vec![Vec::with_capacity(active); OUTPUTS];
        for (g, gas) in self.materials.iter().enumerate() {
            for &e in p.elements(g) {
                for q in 0..p.shape.num_qpts {
                    let i = p.shape.index(q, e, g);
                    let state = gas.state(p.density[i], p.energy[i]);
                    for k in 0..OUTPUTS {
                        approx[k].push(outputs[k][i]);
                        exact[k].push(state[k]);
                    }
                }
            }
        }
        let approx: Vec<&[Real]> = approx.iter().map(Vec::as_slice).collect();
        let exact: Vec<&[Real]> = exact.iter().map(Vec::as_slice).collect();
        eos::rmse(active, &approx, &exact)
    }
}

fn build_group(settings: &RunSettings, m: usize, gas: IdealGas) -> Group {
    let group = Group::new(m, Arity::new(INPUTS, OUTPUTS), Box::new(gas));
    if settings.gate == GateChoice::None {
        return group;
    }
    let table = TabulatedSurrogate::sample(
        &gas,
        OUTPUTS,
        Axis::new(DENSITY, settings.table_nodes),
        Axis::new(ENERGY, settings.table_nodes),
    );
    let gate: Box<dyn AdmissionGate> = match settings.gate {
        GateChoice::Random => Box::new(RandomGate::new(
            settings.admit_fraction,
            settings.seed ^ m as u64,
        )),
        _ => Box::new(BoundsGate::for_table(&table, settings.margin)),
    };
    group.with_surrogate(Box::new(table)).with_gate(gate)
}

/// Open a sample sink: binary for a `.bin` extension, JSON lines otherwise.
///
/// # Errors
///
/// [`AmsError::Io`] when the file cannot be created.
pub fn open_sink(path: impl AsRef<Path>) -> Result<Box<dyn SampleSink>, AmsError> {
    let path = path.as_ref();
    let binary = path.extension().is_some_and(|ext| ext == "bin");
    let sink: Box<dyn SampleSink> = if binary {
        Box::new(BinarySink::create(path)?)
    } else {
        Box::new(JsonLinesSink::create(path)?)
    };
    info!(path = %path.display(), binary, "sample sink opened");
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(gate: GateChoice) -> RunSettings {
        RunSettings {
            materials: 3,
            elements: 40,
            qpts: 2,
            gate,
            ..RunSettings::default()
        }
    }

    #[test]
    fn gate_choice_parses() {
        assert_eq!("Bounds".parse::<GateChoice>(), Ok(GateChoice::Bounds));
        assert_eq!("none".parse::<GateChoice>(), Ok(GateChoice::None));
        assert!("table".parse::<GateChoice>().is_err());
        assert_eq!(GateChoice::Random.to_string(), "random");
    }

    #[test]
    fn one_group_per_material() {
        let app = MiniApp::new(small(GateChoice::Bounds), WorkflowConfig::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(app.workflow().groups().len(), 3);
        assert!(app.workflow().groups().iter().all(Group::can_admit));
    }

    #[test]
    fn physics_only_run_is_exact() {
        let mut app = MiniApp::new(small(GateChoice::None), WorkflowConfig::default())
            .unwrap_or_else(|e| panic!("{e}"));
        let out = app.run().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out.report.physics_points(), out.report.total_points());
        assert!(out.rmse.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: RunSettings = serde_json::from_str(r#"{"materials": 2, "gate": "random"}"#)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.materials, 2);
        assert_eq!(s.gate, GateChoice::Random);
        assert_eq!(s.qpts, RunSettings::default().qpts);
    }
}
