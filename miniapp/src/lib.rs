// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! ams-miniapp: multi-material ideal-gas mini-application on `ams-wf`.
//!
//! ## Modules
//!   - `eos`: ideal-gas equation of state (the physics backend)
//!   - `surrogate`: bilinear table sampled from the physics
//!   - `uq`: admission gates: domain bounds, seeded random
//!   - `mesh`: synthetic mixed-material mesh in the global sparse layout
//!   - `app`: wires one group per material and scores the run
//!
//! ## Binary
//!   - `miniapp`: run one configuration and print the dispatch summary

pub mod app;
pub mod eos;
pub mod mesh;
pub mod surrogate;
pub mod uq;

pub use app::{GateChoice, MiniApp, RunOutcome, RunSettings};
