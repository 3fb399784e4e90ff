// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch orchestration: route every point to exactly one backend.
//!
//! Per group:
//!
//! ```text
//!   layout      gather active elements (host, partial group) or alias block
//!   admission   gate over the whole group → predicate (all false if absent)
//!   chunk loop  surrogate on the chunk → pack not-admitted → physics
//!               → sink → unpack physics outputs over the surrogate's
//!   scatter     dense outputs back to the global buffers (if gathered)
//! ```
//!
//! Chunk temporaries are sized by [`compute_partition_size`] and released
//! at the end of each iteration, so peak temporary memory is bounded by the
//! partition budget regardless of problem size. Groups run one after the
//! other.

use crate::backend::{Arity, Group, SampleSink};
use crate::compaction::cast::Real;
use crate::compaction::{ReverseIndex, NOT_ADMITTED};
use crate::config::WorkflowConfig;
use crate::error::{check_len, AmsError, Result};
use crate::layout::{gather, scatter, GroupRanges, MeshShape};
use crate::partition::{compute_partition_size, per_point_bytes, ChunkRanges};
use crate::resource::{views, views_mut, ExecutionContext, ExecutionMode};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, info_span, warn};

// ═══════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════

/// How a group's points were laid out for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Caller handed dense buffers directly.
    Dense,
    /// Active elements gathered into dense buffers and scattered back.
    Gathered,
    /// The group's full block of the global buffers, in place.
    Aliased,
    /// No active points; nothing ran.
    Skipped,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dense => "dense",
            Self::Gathered => "gathered",
            Self::Aliased => "aliased",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// One iteration of the chunk loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub offset: usize,
    pub len: usize,
    /// Points routed to physics.
    pub packed: usize,
}

/// Outcome of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: usize,
    pub layout: Layout,
    pub points: usize,
    pub chunks: Vec<ChunkReport>,
}

impl GroupReport {
    fn skipped(group: usize) -> Self {
        Self {
            group,
            layout: Layout::Skipped,
            points: 0,
            chunks: Vec::new(),
        }
    }

    #[must_use]
    pub fn physics_points(&self) -> usize {
        self.chunks.iter().map(|c| c.packed).sum()
    }

    #[must_use]
    pub fn surrogate_points(&self) -> usize {
        self.points - self.physics_points()
    }

    /// Number of chunks that invoked the physics backend.
    #[must_use]
    pub fn physics_calls(&self) -> usize {
        self.chunks.iter().filter(|c| c.packed > 0).count()
    }
}

/// Outcome of a full [`Workflow::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub mode: ExecutionMode,
    pub groups: Vec<GroupReport>,
}

impl DispatchReport {
    #[must_use]
    pub fn total_points(&self) -> usize {
        self.groups.iter().map(|g| g.points).sum()
    }

    #[must_use]
    pub fn physics_points(&self) -> usize {
        self.groups.iter().map(GroupReport::physics_points).sum()
    }

    /// Share of points answered by physics; 0 for an empty dispatch.
    #[must_use]
    pub fn physics_fraction(&self) -> f64 {
        let total = self.total_points();
        if total == 0 {
            return 0.0;
        }
        self.physics_points() as f64 / total as f64
    }

    pub fn print_summary(&self) {
        let total = self.total_points().max(1) as f64;
        println!("  Dispatch ({} execution):", self.mode);
        println!("    Total points:        {}", self.total_points());
        for g in &self.groups {
            println!(
                "    Group {:>3} [{:<8}] {:>9} pts, {:>4} chunks, physics {:>9} ({:.1}%)",
                g.group,
                g.layout,
                g.points,
                g.chunks.len(),
                g.physics_points(),
                100.0 * g.physics_points() as f64 / g.points.max(1) as f64
            );
        }
        println!(
            "    Surrogate answered:  {} ({:.1}%)",
            self.total_points() - self.physics_points(),
            100.0 * (self.total_points() - self.physics_points()) as f64 / total
        );
        println!(
            "    Physics evaluated:   {} ({:.1}%)",
            self.physics_points(),
            100.0 * self.physics_fraction()
        );
    }
}

// ═══════════════════════════════════════════════════════════════════
// Workflow
// ═══════════════════════════════════════════════════════════════════

/// Groups, their backends, and the policy to dispatch them with.
pub struct Workflow {
    ctx: ExecutionContext,
    config: WorkflowConfig,
    groups: Vec<Group>,
    sink: Option<Box<dyn SampleSink>>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("ctx", &self.ctx)
            .field("config", &self.config)
            .field("groups", &self.groups)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Workflow {
    /// A workflow running in `config.execution` mode.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] when the configuration is invalid.
    pub fn new(config: WorkflowConfig) -> Result<Self> {
        let ctx = ExecutionContext::new(config.execution);
        Self::with_context(ctx, config)
    }

    /// A workflow sharing an existing context (and its allocation tracker).
    /// The context's mode takes precedence over `config.execution`.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] when the configuration is invalid.
    pub fn with_context(ctx: ExecutionContext, mut config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        config.execution = ctx.mode();
        Ok(Self {
            ctx,
            config,
            groups: Vec::new(),
            sink: None,
        })
    }

    /// Register a group; returns its index.
    pub fn add_group(&mut self, group: Group) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    #[must_use]
    pub fn with_group(mut self, group: Group) -> Self {
        self.add_group(group);
        self
    }

    pub fn set_sink(&mut self, sink: Box<dyn SampleSink>) {
        self.sink = Some(sink);
    }

    /// Detach the sink, flushing it first.
    pub fn take_sink(&mut self) -> Option<Box<dyn SampleSink>> {
        flush_sink(&mut self.sink);
        self.sink.take()
    }

    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    #[must_use]
    pub const fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Evaluate group `g` over caller-provided dense feature vectors.
    ///
    /// The point count is the length of the first input vector (or first
    /// output vector for a group without inputs); every vector must hold at
    /// least that many points.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] for an unknown group, [`AmsError::ArityMismatch`],
    /// [`AmsError::ShortBuffer`], [`AmsError::PartitionBudget`] or
    /// [`AmsError::Allocation`].
    pub fn evaluate_group(
        &mut self,
        g: usize,
        inputs: &[&[Real]],
        outputs: &mut [&mut [Real]],
    ) -> Result<GroupReport> {
        let Self {
            ctx,
            config,
            groups,
            sink,
        } = self;
        let group = groups
            .get(g)
            .ok_or_else(|| AmsError::Config(format!("no group with index {g}")))?;
        let points = inputs
            .first()
            .map(|v| v.len())
            .or_else(|| outputs.first().map(|v| v.len()))
            .unwrap_or(0);
        let chunks = run_group(ctx, config, group, sink, points, inputs, outputs)?;
        Ok(GroupReport {
            group: g,
            layout: Layout::Dense,
            points,
            chunks,
        })
    }

    /// Full dispatch over the global sparse buffers.
    ///
    /// `inputs` and `outputs` are planar global buffers of
    /// `shape.total_points()` values each; `ranges` delimits each group's
    /// active elements in `index_list`.
    ///
    /// # Errors
    ///
    /// Any configuration or allocation error of the groups' evaluation; the
    /// dispatch stops at the first one.
    pub fn evaluate(
        &mut self,
        shape: &MeshShape,
        index_list: &[usize],
        ranges: &GroupRanges,
        inputs: &[&[Real]],
        outputs: &mut [&mut [Real]],
    ) -> Result<DispatchReport> {
        if self.groups.len() > shape.num_groups {
            return Err(AmsError::Config(format!(
                "{} groups registered but the mesh has {}",
                self.groups.len(),
                shape.num_groups
            )));
        }
        let total = shape.total_points();
        check_len("global input buffer", inputs.iter().map(|v| v.len()), total)?;
        check_len("global output buffer", outputs.iter().map(|v| v.len()), total)?;

        let mut reports = Vec::with_capacity(self.groups.len());
        for g in 0..self.groups.len() {
            let range = ranges.range(g).ok_or(AmsError::GroupRange {
                group: g,
                start: 0,
                end: 0,
                len: index_list.len(),
            })?;
            if range.end > index_list.len() {
                return Err(AmsError::GroupRange {
                    group: g,
                    start: range.start,
                    end: range.end,
                    len: index_list.len(),
                });
            }
            let elements = &index_list[range];
            reports.push(self.evaluate_sparse_group(shape, g, elements, inputs, outputs)?);
        }
        flush_sink(&mut self.sink);
        Ok(DispatchReport {
            mode: self.ctx.mode(),
            groups: reports,
        })
    }

    fn evaluate_sparse_group(
        &mut self,
        shape: &MeshShape,
        g: usize,
        elements: &[usize],
        inputs: &[&[Real]],
        outputs: &mut [&mut [Real]],
    ) -> Result<GroupReport> {
        if elements.is_empty() {
            debug!(group = g, "no active elements, skipped");
            return Ok(GroupReport::skipped(g));
        }
        let Self {
            ctx,
            config,
            groups,
            sink,
        } = self;
        let group = &groups[g];
        check_arity(group, inputs.len(), outputs.len())?;

        let gather_first = !ctx.is_accelerator_execution()
            && config.pack_sparse_groups
            && elements.len() < shape.num_elems;

        if gather_first {
            let points = elements.len() * shape.num_qpts;
            info!(group = g, layout = %Layout::Gathered, points, "layout");
            let mut dense_in = ctx.allocate_many::<Real>(inputs.len(), points)?;
            let mut dense_out = ctx.allocate_many::<Real>(outputs.len(), points)?;
            gather(shape, g, elements, inputs, &mut views_mut(&mut dense_in))?;
            let chunks = run_group(
                ctx,
                config,
                group,
                sink,
                points,
                &views(&dense_in),
                &mut views_mut(&mut dense_out),
            )?;
            scatter(shape, g, elements, &views(&dense_out), outputs)?;
            Ok(GroupReport {
                group: g,
                layout: Layout::Gathered,
                points,
                chunks,
            })
        } else {
            let block = shape.group_block(g);
            let points = block.len();
            info!(group = g, layout = %Layout::Aliased, points, "layout");
            let block_in: Vec<&[Real]> = inputs.iter().map(|v| &v[block.clone()]).collect();
            let mut block_out: Vec<&mut [Real]> =
                outputs.iter_mut().map(|v| &mut v[block.clone()]).collect();
            let chunks = run_group(ctx, config, group, sink, points, &block_in, &mut block_out)?;
            Ok(GroupReport {
                group: g,
                layout: Layout::Aliased,
                points,
                chunks,
            })
        }
    }
}

fn check_arity(group: &Group, inputs: usize, outputs: usize) -> Result<()> {
    if inputs != group.arity.inputs {
        return Err(AmsError::ArityMismatch {
            group: group.id,
            expected: group.arity.inputs,
            actual: inputs,
        });
    }
    if outputs != group.arity.outputs {
        return Err(AmsError::ArityMismatch {
            group: group.id,
            expected: group.arity.outputs,
            actual: outputs,
        });
    }
    Ok(())
}

fn flush_sink(sink: &mut Option<Box<dyn SampleSink>>) {
    if let Some(sink) = sink.as_deref_mut() {
        if let Err(e) = sink.flush() {
            warn!(error = %e, "sample sink flush failed");
        }
    }
}

/// Points per chunk for `arity` under `budget` bytes.
///
/// A chunk that records a reverse index never exceeds what [`ReverseIndex`]
/// can address.
fn chunk_size(arity: Arity, with_index: bool, budget: usize) -> Result<usize> {
    let chunk = compute_partition_size::<Real>(arity.inputs, arity.outputs, with_index, budget);
    if chunk == 0 {
        return Err(AmsError::PartitionBudget {
            budget,
            per_point: per_point_bytes::<Real>(arity.inputs, arity.outputs, with_index),
        });
    }
    if with_index {
        return Ok(chunk.min(ReverseIndex::MAX as usize));
    }
    Ok(chunk)
}

/// Admission plus the chunk loop over `points` dense points.
fn run_group(
    ctx: &ExecutionContext,
    config: &WorkflowConfig,
    group: &Group,
    sink: &mut Option<Box<dyn SampleSink>>,
    points: usize,
    inputs: &[&[Real]],
    outputs: &mut [&mut [Real]],
) -> Result<Vec<ChunkReport>> {
    check_arity(group, inputs.len(), outputs.len())?;
    check_len("group input vector", inputs.iter().map(|v| v.len()), points)?;
    check_len("group output vector", outputs.iter().map(|v| v.len()), points)?;

    let span = info_span!("group", id = group.id, mode = %ctx.mode());
    let _entered = span.enter();
    if points == 0 {
        debug!("no points, skipped");
        return Ok(Vec::new());
    }

    let arity = group.arity;
    let with_index = config.unpack.records_reverse_index();
    let chunk = chunk_size(arity, with_index, config.partition_bytes)?;

    let compactor = ctx.compactor();
    let surrogate = group.surrogate.as_deref();
    let mut predicate = ctx.allocate::<bool>(points)?;
    if let (Some(gate), Some(_)) = (group.gate.as_deref(), surrogate) {
        let admission_view: Vec<&[Real]> = inputs.iter().map(|v| &v[..points]).collect();
        gate.evaluate(&admission_view, &mut predicate);
    }

    let mut reports = Vec::with_capacity(points.div_ceil(chunk.min(points)));
    for range in ChunkRanges::new(points, chunk) {
        let len = range.len();
        let chunk_in: Vec<&[Real]> = inputs.iter().map(|v| &v[range.clone()]).collect();
        let mut chunk_out: Vec<&mut [Real]> =
            outputs.iter_mut().map(|v| &mut v[range.clone()]).collect();
        let chunk_predicate = &predicate[range.clone()];

        if let Some(surrogate) = surrogate {
            surrogate.eval(&chunk_in, &mut chunk_out);
        }

        let mut packed_in = ctx.allocate_many::<Real>(arity.inputs, len)?;
        let mut packed_out = ctx.allocate_many::<Real>(arity.outputs, len)?;
        let mut reverse_index = if with_index {
            Some(ctx.allocate::<ReverseIndex>(len)?)
        } else {
            None
        };

        let packed = match reverse_index.as_mut() {
            Some(index) => compactor.pack_indexed(
                chunk_predicate,
                index,
                len,
                &chunk_in,
                &mut views_mut(&mut packed_in),
                NOT_ADMITTED,
            )?,
            None => compactor.pack(
                chunk_predicate,
                len,
                &chunk_in,
                &mut views_mut(&mut packed_in),
                NOT_ADMITTED,
            )?,
        };

        if packed > 0 {
            let physics_in: Vec<&[Real]> = packed_in.iter().map(|b| &b[..packed]).collect();
            let mut physics_out: Vec<&mut [Real]> =
                packed_out.iter_mut().map(|b| &mut b[..packed]).collect();
            group.physics.eval(&physics_in, &mut physics_out);

            let evaluated: Vec<&[Real]> = packed_out.iter().map(|b| &b[..packed]).collect();
            if let Some(sink) = sink.as_deref_mut() {
                if let Err(e) = sink.append(&physics_in, &evaluated) {
                    warn!(error = %e, offset = range.start, packed, "sample sink append failed");
                }
            }
            match reverse_index.as_deref() {
                Some(index) => compactor.unpack_indexed(index, packed, &evaluated, &mut chunk_out)?,
                None => compactor.unpack(
                    chunk_predicate,
                    len,
                    &evaluated,
                    &mut chunk_out,
                    NOT_ADMITTED,
                )?,
            }
        }

        debug!(offset = range.start, len, packed, "chunk");
        reports.push(ChunkReport {
            offset: range.start,
            len,
            packed,
        });
    }

    let physics: usize = reports.iter().map(|c| c.packed).sum();
    info!(
        points,
        chunks = reports.len(),
        physics,
        physics_fraction = physics as f64 / points as f64,
        "group evaluated"
    );
    Ok(reports)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::FnModel;

    fn squares() -> Group {
        let physics = FnModel(|inputs: &[&[Real]], outputs: &mut [&mut [Real]]| {
            for (o, &x) in outputs[0].iter_mut().zip(inputs[0]) {
                *o = x * x;
            }
        });
        let surrogate = FnModel(|_: &[&[Real]], outputs: &mut [&mut [Real]]| {
            outputs[0].fill(0.0);
        });
        let gate = |inputs: &[&[Real]], predicate: &mut [bool]| {
            for (p, &x) in predicate.iter_mut().zip(inputs[0]) {
                *p = x < 2.0;
            }
        };
        Group::new(0, Arity::new(1, 1), Box::new(physics))
            .with_surrogate(Box::new(surrogate))
            .with_gate(Box::new(gate))
    }

    #[test]
    fn closures_plug_in_as_backends() {
        let mut wf = Workflow::new(WorkflowConfig::default())
            .unwrap()
            .with_group(squares());
        let x = [0.0, 1.0, 2.0, 3.0];
        let mut y = [9.0; 4];
        let report = wf.evaluate_group(0, &[&x[..]], &mut [&mut y[..]]).unwrap();
        assert_eq!(y, [0.0, 0.0, 4.0, 9.0]);
        assert_eq!(report.layout, Layout::Dense);
        assert_eq!(report.physics_points(), 2);
        assert_eq!(report.surrogate_points(), 2);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn indexed_chunks_stay_addressable() {
        let arity = Arity::new(2, 4);
        let indexed = chunk_size(arity, true, usize::MAX).unwrap();
        assert_eq!(indexed, ReverseIndex::MAX as usize);
        let plain = chunk_size(arity, false, usize::MAX).unwrap();
        assert_eq!(plain, usize::MAX / 48);
        assert_eq!(chunk_size(arity, true, 52 * 100).unwrap(), 100);
        assert_eq!(chunk_size(Arity::new(0, 0), false, 1).unwrap(), usize::MAX);
        assert!(matches!(
            chunk_size(arity, true, 51),
            Err(AmsError::PartitionBudget { budget: 51, per_point: 52 })
        ));
    }

    #[test]
    fn unknown_group_is_config_error() {
        let mut wf = Workflow::new(WorkflowConfig::default()).unwrap();
        let err = wf.evaluate_group(3, &[], &mut []).unwrap_err();
        assert!(matches!(err, AmsError::Config(_)));
    }

    #[test]
    fn more_groups_than_mesh_is_rejected() {
        let mut wf = Workflow::new(WorkflowConfig::default())
            .unwrap()
            .with_group(squares())
            .with_group(squares());
        let shape = MeshShape::new(1, 1, 1);
        let ranges = GroupRanges::from_ranges(vec![0..1, 1..1], 1).unwrap();
        let x = [1.0];
        let mut y = [0.0];
        let err = wf
            .evaluate(&shape, &[0], &ranges, &[&x[..]], &mut [&mut y[..]])
            .unwrap_err();
        assert!(matches!(err, AmsError::Config(_)));
    }

    #[test]
    fn report_fractions() {
        let report = DispatchReport {
            mode: ExecutionMode::Host,
            groups: vec![GroupReport {
                group: 0,
                layout: Layout::Aliased,
                points: 8,
                chunks: vec![
                    ChunkReport {
                        offset: 0,
                        len: 4,
                        packed: 1,
                    },
                    ChunkReport {
                        offset: 4,
                        len: 4,
                        packed: 0,
                    },
                ],
            }],
        };
        assert_eq!(report.total_points(), 8);
        assert_eq!(report.physics_points(), 1);
        assert_eq!(report.groups[0].physics_calls(), 1);
        assert!((report.physics_fraction() - 0.125).abs() < 1e-12);
        assert_eq!(DispatchReport { mode: ExecutionMode::Host, groups: vec![] }.physics_fraction(), 0.0);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"layout\":\"aliased\""));
    }
}
