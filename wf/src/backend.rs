// SPDX-License-Identifier: AGPL-3.0-only

//! Backend capabilities: the collaborators a group dispatches to.
//!
//! Every group has an expensive [`Physics`] backend. A cheap [`Surrogate`]
//! and an [`AdmissionGate`] are optional; a group without them simply
//! routes every point to physics. Point count is always the length of the
//! feature vectors handed in.

use crate::compaction::cast::Real;
use std::fmt;
use std::io;

/// Decides per point whether the surrogate's answer can be trusted.
pub trait AdmissionGate: Send + Sync {
    /// Fill `predicate[i]` with `true` where point `i` is admitted.
    /// `predicate.len()` equals the length of every input vector.
    fn evaluate(&self, inputs: &[&[Real]], predicate: &mut [bool]);
}

/// Cheap approximate model; must accept any point count, including zero.
pub trait Surrogate: Send + Sync {
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]);
}

/// Expensive ground-truth model.
///
/// The orchestrator never calls it with an empty batch, but an empty batch
/// must be a no-op.
pub trait Physics: Send + Sync {
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]);
}

/// Append-only store of physics-evaluated samples. Best effort: the
/// orchestrator logs failures and carries on.
pub trait SampleSink: Send {
    /// # Errors
    ///
    /// Any I/O failure of the underlying store.
    fn append(&mut self, inputs: &[&[Real]], outputs: &[&[Real]]) -> io::Result<()>;

    /// # Errors
    ///
    /// Any I/O failure of the underlying store.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Number of input and output feature vectors of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub inputs: usize,
    pub outputs: usize,
}

impl Arity {
    #[must_use]
    pub const fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }
}

/// One material: its backends and the shape of its feature vectors.
pub struct Group {
    pub id: usize,
    pub arity: Arity,
    pub gate: Option<Box<dyn AdmissionGate>>,
    pub surrogate: Option<Box<dyn Surrogate>>,
    pub physics: Box<dyn Physics>,
}

impl Group {
    /// A physics-only group.
    #[must_use]
    pub fn new(id: usize, arity: Arity, physics: Box<dyn Physics>) -> Self {
        Self {
            id,
            arity,
            gate: None,
            surrogate: None,
            physics,
        }
    }

    #[must_use]
    pub fn with_surrogate(mut self, surrogate: Box<dyn Surrogate>) -> Self {
        self.surrogate = Some(surrogate);
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Box<dyn AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// True when both a surrogate and a gate are configured, i.e. some
    /// points may bypass physics.
    #[must_use]
    pub const fn can_admit(&self) -> bool {
        self.gate.is_some() && self.surrogate.is_some()
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .field("gate", &self.gate.is_some())
            .field("surrogate", &self.surrogate.is_some())
            .finish_non_exhaustive()
    }
}

// Closures are handy backends for tests and small drivers.

impl<F> AdmissionGate for F
where
    F: Fn(&[&[Real]], &mut [bool]) + Send + Sync,
{
    fn evaluate(&self, inputs: &[&[Real]], predicate: &mut [bool]) {
        self(inputs, predicate);
    }
}

/// Adapter turning a closure into a [`Physics`] or [`Surrogate`].
pub struct FnModel<F>(pub F);

impl<F> Physics for FnModel<F>
where
    F: Fn(&[&[Real]], &mut [&mut [Real]]) + Send + Sync,
{
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]) {
        (self.0)(inputs, outputs);
    }
}

impl<F> Surrogate for FnModel<F>
where
    F: Fn(&[&[Real]], &mut [&mut [Real]]) + Send + Sync,
{
    fn eval(&self, inputs: &[&[Real]], outputs: &mut [&mut [Real]]) {
        (self.0)(inputs, outputs);
    }
}
