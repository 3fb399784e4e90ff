// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::unwrap_used)]

//! Integration tests: end-to-end mini-app runs.
//!
//! Multi-material mesh through the dispatch core with real ideal-gas
//! physics, tabulated surrogates and admission gates.

use ams_miniapp::app::open_sink;
use ams_miniapp::eos::OUTPUTS;
use ams_miniapp::{GateChoice, MiniApp, RunSettings};
use ams_wf::sink::{read_binary, read_json_lines};
use ams_wf::{ExecutionMode, Layout, UnpackStrategy, WorkflowConfig};

fn settings(gate: GateChoice) -> RunSettings {
    RunSettings {
        materials: 4,
        elements: 300,
        qpts: 4,
        seed: 11,
        table_nodes: 16,
        gate,
        ..RunSettings::default()
    }
}

fn run(settings: RunSettings, config: WorkflowConfig) -> ams_miniapp::RunOutcome {
    MiniApp::new(settings, config).unwrap().run().unwrap()
}

#[test]
fn every_occupied_point_is_answered() {
    let mut app = MiniApp::new(settings(GateChoice::Bounds), WorkflowConfig::default()).unwrap();
    let outcome = app.run().unwrap();
    let p = app.problem();
    for g in 0..p.shape.num_groups {
        for &e in p.elements(g) {
            for q in 0..p.shape.num_qpts {
                let i = p.shape.index(q, e, g);
                assert!(outcome.outputs[0][i] > 0.0, "pressure at ({q}, {e}, {g})");
            }
        }
    }
    assert_eq!(outcome.report.groups.len(), 4);
}

#[test]
fn bounds_gate_splits_work_and_stays_accurate() {
    let outcome = run(settings(GateChoice::Bounds), WorkflowConfig::default());
    let fraction = outcome.report.physics_fraction();
    assert!(fraction > 0.0 && fraction < 1.0, "physics fraction {fraction}");
    // every output is bilinear or linear in (ρ, e), so the table is exact up to rounding
    for (k, err) in outcome.rmse.iter().enumerate() {
        assert!(*err < 1e-9, "output {k}: rmse {err}");
    }
}

#[test]
fn host_gathers_partial_groups() {
    let outcome = run(settings(GateChoice::Bounds), WorkflowConfig::default());
    assert!(outcome
        .report
        .groups
        .iter()
        .all(|g| matches!(g.layout, Layout::Gathered | Layout::Aliased)));
    assert!(outcome
        .report
        .groups
        .iter()
        .any(|g| g.layout == Layout::Gathered));
}

#[test]
fn modes_and_strategies_agree() {
    // accelerator mode always evaluates whole group blocks, so the host
    // reference does too; the random gate then sees identical batches
    let in_place = WorkflowConfig::default().with_pack_sparse_groups(false);
    let reference = run(settings(GateChoice::Random), in_place.clone());
    for mode in [ExecutionMode::Host, ExecutionMode::Accelerator] {
        for unpack in [UnpackStrategy::Predicate, UnpackStrategy::ReverseIndex] {
            let config = in_place
                .clone()
                .with_execution(mode)
                .with_unpack(unpack)
                .with_partition_bytes(4096);
            let outcome = run(settings(GateChoice::Random), config);
            assert_eq!(outcome.report.mode, mode);
            assert_eq!(outcome.outputs, reference.outputs, "{mode} / {unpack}");
            assert_eq!(
                outcome.report.physics_points(),
                reference.report.physics_points()
            );
        }
    }
}

#[test]
fn small_budget_only_changes_chunking() {
    let wide = run(settings(GateChoice::Bounds), WorkflowConfig::default());
    let narrow = run(
        settings(GateChoice::Bounds),
        WorkflowConfig::default().with_partition_bytes(1024),
    );
    assert_eq!(wide.outputs, narrow.outputs);
    let chunks = |o: &ams_miniapp::RunOutcome| -> usize {
        o.report.groups.iter().map(|g| g.chunks.len()).sum()
    };
    assert!(chunks(&narrow) > chunks(&wide));
}

#[test]
fn json_sink_records_physics_points() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.jsonl");
    let mut app = MiniApp::new(settings(GateChoice::Bounds), WorkflowConfig::default()).unwrap();
    app.set_sink(open_sink(&path).unwrap());
    let outcome = app.run().unwrap();
    drop(app.take_sink());

    let records = read_json_lines(&path).unwrap();
    assert_eq!(records.len(), outcome.report.physics_points());
    assert!(records.iter().all(|r| r.inputs.len() == 2 && r.outputs.len() == OUTPUTS));
}

#[test]
fn binary_sink_records_physics_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.bin");
    let mut app = MiniApp::new(settings(GateChoice::Bounds), WorkflowConfig::default()).unwrap();
    app.set_sink(open_sink(&path).unwrap());
    let outcome = app.run().unwrap();
    drop(app.take_sink());

    let batches = read_binary(&path).unwrap();
    let calls: usize = outcome.report.groups.iter().map(|g| g.physics_calls()).sum();
    assert_eq!(batches.len(), calls);
    let points: usize = batches.iter().map(|b| b.header.points).sum();
    assert_eq!(points, outcome.report.physics_points());
}

#[test]
fn no_gate_sends_everything_to_physics() {
    let outcome = run(settings(GateChoice::None), WorkflowConfig::default());
    assert_eq!(outcome.report.physics_points(), outcome.report.total_points());
}
