// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! ams-wf: surrogate/physics dispatch core.
//!
//! An expensive per-point model (an equation of state, say) is accelerated
//! by a cheap surrogate wherever an admission gate trusts it. This crate
//! moves the data: it decides per group how points are laid out, packs the
//! points the gate rejects into bounded chunks for the physics backend, and
//! puts every answer back where it came from. Each point is computed exactly
//! once, by exactly one backend.
//!
//! # Architecture
//!
//! ```text
//!    ┌─────────────────────────────┐
//!    │  dispatch::Workflow         │  per-group state machine
//!    └──┬──────────┬───────────┬───┘
//!       │          │           │
//!  ┌────▼────┐ ┌───▼──────┐ ┌──▼───────────┐
//!  │ layout  │ │partition │ │ compaction   │  gather/scatter, chunk sizing,
//!  └────┬────┘ └───┬──────┘ └──┬───────────┘  pack/unpack/linearize
//!       └──────────┼───────────┘
//!    ┌─────────────▼───────────────┐
//!    │  resource::ExecutionContext │  host vs accelerator, scoped buffers
//!    └─────────────────────────────┘
//! ```
//!
//! Backends plug in through the traits of [`backend`]; reference sample
//! sinks live in [`sink`].

pub mod backend;
pub mod compaction;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod partition;
pub mod resource;
pub mod sink;

pub use backend::{AdmissionGate, Arity, FnModel, Group, Physics, SampleSink, Surrogate};
pub use compaction::cast::Real;
pub use compaction::{Compactor, NOT_ADMITTED};
pub use config::{UnpackStrategy, WorkflowConfig};
pub use dispatch::{ChunkReport, DispatchReport, GroupReport, Layout, Workflow};
pub use error::{AmsError, ErrorKind, Result};
pub use layout::{GroupRanges, MeshShape};
pub use resource::{ExecutionContext, ExecutionMode};
