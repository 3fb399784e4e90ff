// SPDX-License-Identifier: AGPL-3.0-only

//! Execution context: where scans run and where temporaries live.
//!
//! The whole call graph of one dispatch runs in a single [`ExecutionMode`]:
//! either sequentially on the host, or as data-parallel kernels on the
//! accelerator substrate (the rayon worker pool). The mode is read by the
//! core, never changed by it.
//!
//! Temporaries are [`Buffer`]s: allocation is fallible and reported as
//! [`AmsError::Allocation`], release happens on drop. Every buffer reports
//! its bytes to an [`AllocationTracker`] so peak temporary memory can be
//! checked against the partition budget.

use crate::compaction::Compactor;
use crate::error::{AmsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Environment variable consulted when no global mode was installed.
pub const EXECUTION_ENV: &str = "AMS_EXECUTION";

static GLOBAL_MODE: OnceLock<ExecutionMode> = OnceLock::new();

/// How the core executes its scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Sequential, single-threaded, deterministic by construction.
    #[default]
    Host,
    /// Data-parallel kernels on the accelerator substrate.
    Accelerator,
}

impl ExecutionMode {
    /// Residency of buffers allocated in this mode.
    #[must_use]
    pub const fn residency(self) -> Residency {
        match self {
            Self::Host => Residency::Host,
            Self::Accelerator => Residency::Accelerator,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = AmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" | "sequential" => Ok(Self::Host),
            "accelerator" | "device" | "gpu" | "parallel" => Ok(Self::Accelerator),
            other => Err(AmsError::Config(format!("unknown execution mode '{other}'"))),
        }
    }
}

/// Install the process-wide execution mode.
///
/// The first call wins; later calls return the mode already in force.
pub fn install_global_mode(mode: ExecutionMode) -> ExecutionMode {
    *GLOBAL_MODE.get_or_init(|| mode)
}

/// The process-wide execution mode.
///
/// Falls back to `AMS_EXECUTION`, then [`ExecutionMode::Host`], when nothing
/// was installed. An unparsable variable is treated as unset. Reading never
/// installs, so a later [`install_global_mode`] still takes effect.
#[must_use]
pub fn global_mode() -> ExecutionMode {
    GLOBAL_MODE.get().copied().unwrap_or_else(|| {
        std::env::var(EXECUTION_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    })
}

/// Where a buffer's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    Host,
    Accelerator,
}

/// Anything that can report its residency.
pub trait Resident {
    fn residency(&self) -> Residency;
}

impl<T> Resident for [T] {
    fn residency(&self) -> Residency {
        Residency::Host
    }
}

impl<T> Resident for Vec<T> {
    fn residency(&self) -> Residency {
        Residency::Host
    }
}

// ═══════════════════════════════════════════════════════════════════
// Allocation accounting
// ═══════════════════════════════════════════════════════════════════

/// Live and peak bytes held by [`Buffer`]s of one context.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

impl AllocationTracker {
    fn acquire(&self, bytes: usize) {
        let live = self.live.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(live, Ordering::AcqRel);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, bytes: usize) {
        self.live.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Bytes currently held.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// High-water mark since creation or the last [`Self::reset_peak`].
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Number of allocations served.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Restart peak tracking from the current live size.
    pub fn reset_peak(&self) {
        self.peak.store(self.live_bytes(), Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════

/// Execution mode plus the allocator bookkeeping that goes with it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    mode: ExecutionMode,
    tracker: Arc<AllocationTracker>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(global_mode())
    }
}

impl ExecutionContext {
    /// Context for an explicit mode.
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            tracker: Arc::new(AllocationTracker::default()),
        }
    }

    /// Sequential host context.
    #[must_use]
    pub fn host() -> Self {
        Self::new(ExecutionMode::Host)
    }

    /// Data-parallel accelerator context.
    #[must_use]
    pub fn accelerator() -> Self {
        Self::new(ExecutionMode::Accelerator)
    }

    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// True when scans run as parallel kernels.
    #[must_use]
    pub const fn is_accelerator_execution(&self) -> bool {
        matches!(self.mode, ExecutionMode::Accelerator)
    }

    /// Inspect where an arbitrary buffer lives.
    #[must_use]
    pub fn is_resident_on_accelerator<R: Resident + ?Sized>(&self, buf: &R) -> bool {
        buf.residency() == Residency::Accelerator
    }

    /// The compaction strategy for this context's mode.
    #[must_use]
    pub const fn compactor(&self) -> Compactor {
        Compactor::for_mode(self.mode)
    }

    #[must_use]
    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    /// Allocate `n` default-initialized elements resident in this mode.
    ///
    /// # Errors
    ///
    /// Returns [`AmsError::Allocation`] when the request cannot be satisfied.
    pub fn allocate<T: Copy + Default>(&self, n: usize) -> Result<Buffer<T>> {
        let bytes = n.saturating_mul(std::mem::size_of::<T>());
        let mut data = Vec::new();
        data.try_reserve_exact(n)
            .map_err(|_| AmsError::Allocation { elements: n, bytes })?;
        data.resize(n, T::default());
        self.tracker.acquire(bytes);
        Ok(Buffer {
            data,
            bytes,
            residency: self.mode.residency(),
            tracker: Arc::clone(&self.tracker),
        })
    }

    /// Allocate one buffer of `n` elements per feature vector.
    ///
    /// # Errors
    ///
    /// Returns [`AmsError::Allocation`] when any request cannot be satisfied;
    /// buffers already obtained are released.
    pub fn allocate_many<T: Copy + Default>(
        &self,
        count: usize,
        n: usize,
    ) -> Result<Vec<Buffer<T>>> {
        (0..count).map(|_| self.allocate(n)).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Scoped buffers
// ═══════════════════════════════════════════════════════════════════

/// Owned temporary storage, released on drop.
pub struct Buffer<T> {
    data: Vec<T>,
    bytes: usize,
    residency: Residency,
    tracker: Arc<AllocationTracker>,
}

impl<T> Buffer<T> {
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Resident for Buffer<T> {
    fn residency(&self) -> Residency {
        self.residency
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

impl<T: fmt::Debug> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("residency", &self.residency)
            .finish_non_exhaustive()
    }
}

/// Borrow a set of buffers as read-only feature vectors.
#[must_use]
pub fn views<T>(buffers: &[Buffer<T>]) -> Vec<&[T]> {
    buffers.iter().map(|b| b.as_slice()).collect()
}

/// Borrow a set of buffers as writable feature vectors.
#[must_use]
pub fn views_mut<T>(buffers: &mut [Buffer<T>]) -> Vec<&mut [T]> {
    buffers.iter_mut().map(|b| b.as_mut_slice()).collect()
}
