// SPDX-License-Identifier: AGPL-3.0-only

//! Multi-material ideal-gas run through the surrogate/physics dispatch core.
//!
//! Generates a mixed-material mesh, registers one group per material with a
//! tabulated surrogate and an admission gate, dispatches every point, and
//! reports how the work split between surrogate and physics together with
//! the surrogate's error against pure physics.
//!
//! Configuration precedence: command line, then `AMS_*` environment
//! variables, then `--config` file, then defaults.
//!
//! Exit code 0 = run complete.

use ams_miniapp::app::open_sink;
use ams_miniapp::{GateChoice, MiniApp, RunSettings};
use ams_wf::resource::install_global_mode;
use ams_wf::{AmsError, ExecutionMode, UnpackStrategy, WorkflowConfig};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "miniapp", version, about = "AMS surrogate/physics dispatch mini-app")]
struct Cli {
    /// Number of materials (one dispatch group each)
    #[arg(long, default_value_t = 5)]
    materials: usize,

    /// Number of mesh elements
    #[arg(long, default_value_t = 10_000)]
    elements: usize,

    /// Quadrature points per element
    #[arg(long, default_value_t = 8)]
    qpts: usize,

    /// Seed for the mesh and the random gate
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Admission gate: bounds, random or none
    #[arg(long, default_value_t = GateChoice::Bounds)]
    gate: GateChoice,

    /// Fraction of each table axis the bounds gate refuses
    #[arg(long, default_value_t = 0.05)]
    margin: f64,

    /// Acceptance probability of the random gate
    #[arg(long, default_value_t = 0.8)]
    fraction: f64,

    /// Nodes per surrogate table axis
    #[arg(long, default_value_t = 32)]
    table_nodes: usize,

    /// Execution mode: host or accelerator
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Byte budget for one chunk's temporaries
    #[arg(long)]
    budget: Option<usize>,

    /// Unpack strategy: predicate or reverse_index
    #[arg(long)]
    unpack: Option<UnpackStrategy>,

    /// Evaluate partially occupied groups in place instead of gathering
    #[arg(long)]
    no_pack_sparse: bool,

    /// Workflow configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record physics samples here (`.bin` = binary, otherwise JSON lines)
    #[arg(long)]
    sink: Option<PathBuf>,

    /// Print the dispatch report as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn settings(&self) -> RunSettings {
        RunSettings {
            materials: self.materials,
            elements: self.elements,
            qpts: self.qpts,
            seed: self.seed,
            table_nodes: self.table_nodes,
            gate: self.gate,
            margin: self.margin,
            admit_fraction: self.fraction,
        }
    }

    fn workflow_config(&self) -> Result<WorkflowConfig, AmsError> {
        let base = match &self.config {
            Some(path) => WorkflowConfig::from_json_file(path)?,
            None => WorkflowConfig::default(),
        };
        let mut config = base.with_env_overrides()?;
        if let Some(mode) = self.mode {
            config = config.with_execution(mode);
        }
        if let Some(budget) = self.budget {
            config = config.with_partition_bytes(budget);
        }
        if let Some(unpack) = self.unpack {
            config = config.with_unpack(unpack);
        }
        if self.no_pack_sparse {
            config = config.with_pack_sparse_groups(false);
        }
        config.validate()?;
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<(), AmsError> {
    let mut config = cli.workflow_config()?;
    config.execution = install_global_mode(config.execution);

    let mut app = MiniApp::new(cli.settings(), config)?;
    if let Some(path) = &cli.sink {
        app.set_sink(open_sink(path)?);
    }

    let t0 = Instant::now();
    let outcome = app.run()?;
    let elapsed = t0.elapsed();
    drop(app.take_sink());

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome.report)
            .map_err(|e| AmsError::Config(format!("report serialization: {e}")))?;
        println!("{json}");
    } else {
        println!();
        println!("═══════════════════════════════════════════════════════════");
        println!(
            "  AMS mini-app: {} materials × {} elements × {} qpts",
            cli.materials, cli.elements, cli.qpts
        );
        println!("═══════════════════════════════════════════════════════════");
        outcome.print_summary();
        println!("  Wall time: {:.3} s", elapsed.as_secs_f64());
        println!();
    }
    info!(elapsed_s = elapsed.as_secs_f64(), "done");
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = ?e.kind(), "{e}");
            ExitCode::FAILURE
        }
    }
}
