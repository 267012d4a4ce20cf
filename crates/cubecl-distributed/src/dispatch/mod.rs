//! Multi-target kernel dispatch.
//!
//! A dispatch call takes one [`Kernel`] and a list of [`TileTask`]s (the
//! operand tiles of each kernel invocation) and runs them with the strategy
//! of a [`Target`]:
//!
//! | Target | Execution |
//! |--------|-----------|
//! | `HostTask` | one pool task per tile task, ordered by guards, scoped join |
//! | `HostNest` | data-parallel loop over independent tasks |
//! | `HostBatch` | one batched host call per operand shape |
//! | `Devices` | one queued batch per (device, shape); completes at [`TargetDispatcher::synchronize`] |
//!
//! Everything is validated before the first task runs.

mod device;
mod host;
mod kernel;

pub use kernel::*;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::DeviceSet;
use crate::error::{DistError, DistResult};
use crate::matrix::DistributedMatrix;
use crate::options::{Options, Target};
use crate::scalar::Scalar;

use device::Release;
use host::TaskPool;

/// Global identity of a tile: (matrix storage, global row, global column).
pub(crate) type TileKey = (u64, usize, usize);

/// Reference to tile (i, j) of a matrix view.
#[derive(Debug)]
pub struct TileRef<'a, T> {
    /// Matrix view the indices refer to
    pub matrix: &'a DistributedMatrix<T>,
    /// Tile row
    pub i: usize,
    /// Tile column
    pub j: usize,
}

impl<T> Clone for TileRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TileRef<'_, T> {}

impl<'a, T: Scalar> TileRef<'a, T> {
    /// Tile (i, j) of `matrix`.
    pub fn new(matrix: &'a DistributedMatrix<T>, i: usize, j: usize) -> Self {
        Self { matrix, i, j }
    }

    pub(crate) fn key(&self) -> TileKey {
        let (gi, gj) = self.matrix.global_index(self.i, self.j);
        (self.matrix.id(), gi, gj)
    }

    fn shape(&self) -> (usize, usize) {
        (self.matrix.tile_mb(self.i), self.matrix.tile_nb(self.j))
    }
}

/// Operands of one kernel invocation.
#[derive(Debug, Clone)]
pub struct TileTask<'a, T> {
    /// Tiles read
    pub reads: Vec<TileRef<'a, T>>,
    /// Tiles written
    pub writes: Vec<TileRef<'a, T>>,
    /// Higher runs earlier under `HostTask`
    pub priority: i32,
}

impl<'a, T: Scalar> TileTask<'a, T> {
    /// Task with priority 0.
    pub fn new(reads: Vec<TileRef<'a, T>>, writes: Vec<TileRef<'a, T>>) -> Self {
        Self {
            reads,
            writes,
            priority: 0,
        }
    }

    /// Builder-style priority override.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Shapes of all operands, reads first.
    pub(crate) fn shape(&self) -> Vec<(usize, usize)> {
        self.reads.iter().chain(&self.writes).map(TileRef::shape).collect()
    }
}

/// Outcome of a dispatch call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// All tasks finished.
    Done,
    /// Work was queued on devices; call [`TargetDispatcher::synchronize`].
    Pending,
}

/// Counters of batched execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Tile tasks accepted
    pub tasks: usize,
    /// Batched host calls (`HostBatch`)
    pub host_batch_calls: usize,
    /// Batches enqueued on devices (`Devices`)
    pub device_batch_launches: usize,
}

/// Runs tile kernels on a [`Target`].
pub struct TargetDispatcher {
    pool: TaskPool,
    releases: Mutex<Vec<Release>>,
    devices: Mutex<Vec<Arc<DeviceSet>>>,
    tasks: AtomicUsize,
    host_batch_calls: AtomicUsize,
    device_batch_launches: AtomicUsize,
}

impl core::fmt::Debug for TargetDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TargetDispatcher")
            .field("threads", &self.pool.threads())
            .field("stats", &self.stats())
            .finish()
    }
}

impl TargetDispatcher {
    /// Dispatcher whose task pool width follows `options.max_threads`.
    pub fn new(options: &Options) -> DistResult<Self> {
        Ok(Self {
            pool: TaskPool::new(options.max_threads)?,
            releases: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
            tasks: AtomicUsize::new(0),
            host_batch_calls: AtomicUsize::new(0),
            device_batch_launches: AtomicUsize::new(0),
        })
    }

    /// Run `kernel` over `tasks` on `target`.
    ///
    /// Tasks of one call must be independent apart from shared reads; under
    /// `HostTask` conflicting tasks are serialized by their tile guards.
    #[tracing::instrument(
        level = "debug",
        skip(self, kernel, tasks),
        fields(kernel = kernel.name(), tasks = tasks.len())
    )]
    pub fn dispatch<T: Scalar>(
        &self,
        target: Target,
        kernel: &Kernel<T>,
        tasks: &[TileTask<'_, T>],
    ) -> DistResult<Completion> {
        validate(target, kernel, tasks)?;
        self.tasks.fetch_add(tasks.len(), Ordering::Relaxed);
        if tasks.is_empty() {
            return Ok(Completion::Done);
        }

        match target {
            Target::HostTask => host::run_task_pool(&self.pool, kernel, tasks)?,
            Target::HostNest => host::run_nested(&self.pool, kernel, tasks)?,
            Target::HostBatch => {
                let calls = host::run_batched(kernel, tasks)?;
                self.host_batch_calls.fetch_add(calls, Ordering::Relaxed);
            }
            Target::Devices => {
                let mut releases = Vec::new();
                let mut devices = Vec::new();
                let launched = device::launch(kernel, tasks, &mut releases, &mut devices);
                lock(&self.releases)?.extend(releases);
                let mut known = lock(&self.devices)?;
                for set in devices {
                    if !known.iter().any(|k| Arc::ptr_eq(k, &set)) {
                        known.push(set);
                    }
                }
                self.device_batch_launches.fetch_add(launched?, Ordering::Relaxed);
                return Ok(Completion::Pending);
            }
        }
        Ok(Completion::Done)
    }

    /// Wait for all device batches and release the tiles they held.
    ///
    /// Every hold is released even if a batch failed; the first error is returned.
    pub fn synchronize(&self) -> DistResult<()> {
        let devices = core::mem::take(&mut *lock(&self.devices)?);
        let releases = core::mem::take(&mut *lock(&self.releases)?);

        let mut result = Ok(());
        for set in devices {
            result = result.and(set.synchronize());
        }
        for release in releases {
            result = result.and(release());
        }
        result
    }

    /// Batching counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            tasks: self.tasks.load(Ordering::Relaxed),
            host_batch_calls: self.host_batch_calls.load(Ordering::Relaxed),
            device_batch_launches: self.device_batch_launches.load(Ordering::Relaxed),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> DistResult<MutexGuard<'_, V>> {
    mutex
        .lock()
        .map_err(|_| DistError::Poisoned("dispatcher pending work"))
}

impl Drop for TargetDispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.synchronize() {
            tracing::warn!(error = %err, "pending device work failed");
        }
    }
}

/// Check target support, operand counts and operand aliasing.
fn validate<T: Scalar>(
    target: Target,
    kernel: &Kernel<T>,
    tasks: &[TileTask<'_, T>],
) -> DistResult<()> {
    let kind = kernel.kind();
    if !supports(kind, target) {
        return Err(DistError::UnsupportedTarget {
            kernel: kind.name(),
            target,
        });
    }
    let (reads, writes) = kind.arity();
    for task in tasks {
        if task.reads.len() != reads || task.writes.len() != writes {
            return Err(arity_error(kind, task.reads.len(), task.writes.len()));
        }
        // A tile may be read twice, but an output must not alias any other operand.
        let reads: BTreeSet<_> = task.reads.iter().map(TileRef::key).collect();
        let mut writes = BTreeSet::new();
        for tile in &task.writes {
            if reads.contains(&tile.key()) || !writes.insert(tile.key()) {
                return Err(DistError::kernel(
                    kind.name(),
                    format!("output tile ({}, {}) aliases another operand", tile.i, tile.j),
                ));
            }
        }
    }
    Ok(())
}
