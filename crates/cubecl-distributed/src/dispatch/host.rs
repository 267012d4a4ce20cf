//! Host execution: task pool, nested-parallel loop and batched calls.

use core::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use rayon::prelude::*;

use super::kernel::{Kernel, TaskOperands};
use super::{TileKey, TileRef, TileTask};
use crate::coherency::{Access, TileReadGuard, TileWriteGuard};
use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::Location;

/// Pool running host tasks: a dedicated rayon pool when the width is
/// configured, the global one otherwise.
pub(crate) struct TaskPool {
    pool: Option<rayon::ThreadPool>,
}

impl TaskPool {
    pub(crate) fn new(max_threads: Option<usize>) -> DistResult<Self> {
        let pool = match max_threads {
            None => None,
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("dist-task-{index}"))
                    .build()
                    .map_err(|err| DistError::config(format!("cannot build task pool: {err}")))?,
            ),
        };
        Ok(Self { pool })
    }

    pub(crate) fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

/// Keep the first failure reported by concurrent tasks.
fn record(failure: &Mutex<Option<DistError>>, err: DistError) {
    match failure.lock() {
        Ok(mut slot) => {
            slot.get_or_insert(err);
        }
        Err(poisoned) => {
            poisoned.into_inner().get_or_insert(err);
        }
    }
}

fn take(failure: Mutex<Option<DistError>>) -> DistResult<()> {
    let slot = match failure.into_inner() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    slot.map_or(Ok(()), Err)
}

/// Host guards over the distinct tiles of a set of tasks.
///
/// Each tile is locked once, even when several operands name it, and guards
/// are taken in global tile order so that concurrent tasks sharing tiles
/// cannot deadlock; conflicting accesses serialize on the guards.
struct Operands<'g, T> {
    reads: BTreeMap<TileKey, TileReadGuard<'g, T>>,
    writes: BTreeMap<TileKey, TileWriteGuard<'g, T>>,
}

impl<'g, T: Scalar> Operands<'g, T> {
    fn acquire(tasks: &[&TileTask<'g, T>]) -> DistResult<Self> {
        let mut wanted: BTreeMap<TileKey, (Access, TileRef<'g, T>)> = BTreeMap::new();
        for task in tasks {
            for tile in &task.reads {
                wanted.entry(tile.key()).or_insert((Access::Read, *tile));
            }
            for tile in &task.writes {
                wanted.insert(tile.key(), (Access::Write, *tile));
            }
        }

        let mut operands = Self {
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        };
        for (key, (access, tile)) in wanted {
            let matrix = tile.matrix;
            match access {
                Access::Read => {
                    let guard = matrix.tile_get_for_reading(tile.i, tile.j, Location::Host)?;
                    operands.reads.insert(key, guard);
                }
                Access::Write => {
                    let guard = matrix.tile_get_for_writing(tile.i, tile.j, Location::Host)?;
                    operands.writes.insert(key, guard);
                }
            }
        }
        Ok(operands)
    }

    /// Kernel operands of each task, in task order. A tile written by one
    /// task must not appear anywhere else in `tasks`.
    fn views<'s>(&'s mut self, tasks: &[&TileTask<'_, T>]) -> DistResult<Vec<TaskOperands<'s, T>>> {
        let Self { reads, writes } = self;
        let reads = reads
            .iter()
            .map(|(key, guard)| Ok((*key, (guard.view()?, guard.op()))))
            .collect::<DistResult<BTreeMap<_, _>>>()?;
        let mut writes = writes
            .iter_mut()
            .map(|(key, guard)| {
                let op = guard.op();
                Ok((*key, (guard.view_mut()?, op)))
            })
            .collect::<DistResult<BTreeMap<_, _>>>()?;

        tasks
            .iter()
            .map(|task| -> DistResult<TaskOperands<'s, T>> {
                let task_reads = task
                    .reads
                    .iter()
                    .map(|tile| reads.get(&tile.key()).copied().ok_or_else(|| aliased(tile)))
                    .collect::<DistResult<Vec<_>>>()?;
                let task_writes = task
                    .writes
                    .iter()
                    .map(|tile| writes.remove(&tile.key()).ok_or_else(|| aliased(tile)))
                    .collect::<DistResult<Vec<_>>>()?;
                Ok((task_reads, task_writes))
            })
            .collect()
    }
}

fn aliased<T: Scalar>(tile: &TileRef<'_, T>) -> DistError {
    DistError::config(format!(
        "tile ({}, {}) is written while another operand of the batch uses it",
        tile.i, tile.j
    ))
}

/// Acquire the operands of `tasks` in host memory and run them as one call.
fn run_group<T: Scalar>(kernel: &Kernel<T>, tasks: &[&TileTask<'_, T>]) -> DistResult<()> {
    let mut operands = Operands::acquire(tasks)?;
    let mut batch = operands.views(tasks)?;
    kernel.apply_batch(&mut batch)
}

/// Acquire the operands of one task in host memory and run the kernel.
pub(crate) fn run_task<T: Scalar>(kernel: &Kernel<T>, task: &TileTask<'_, T>) -> DistResult<()> {
    run_group(kernel, &[task])
}

/// One pool task per tile task, started by descending priority; the call
/// returns when all of them finished.
pub(crate) fn run_task_pool<T: Scalar>(
    pool: &TaskPool,
    kernel: &Kernel<T>,
    tasks: &[TileTask<'_, T>],
) -> DistResult<()> {
    let mut ordered: Vec<&TileTask<'_, T>> = tasks.iter().collect();
    ordered.sort_by_key(|task| Reverse(task.priority));

    let failure = Mutex::new(None);
    pool.install(|| {
        rayon::scope_fifo(|scope| {
            for task in ordered {
                let failure = &failure;
                scope.spawn_fifo(move |_| {
                    if let Err(err) = run_task(kernel, task) {
                        record(failure, err);
                    }
                });
            }
        })
    });
    take(failure)
}

/// Data-parallel loop over independent tasks.
pub(crate) fn run_nested<T: Scalar>(
    pool: &TaskPool,
    kernel: &Kernel<T>,
    tasks: &[TileTask<'_, T>],
) -> DistResult<()> {
    let mut outputs = BTreeSet::new();
    for tile in tasks.iter().flat_map(|task| &task.writes) {
        if !outputs.insert(tile.key()) {
            let (_, i, j) = tile.key();
            return Err(DistError::config(format!(
                "tile ({i}, {j}) is written by more than one task of a nested loop"
            )));
        }
    }
    pool.install(|| tasks.par_iter().try_for_each(|task| run_task(kernel, task)))
}

/// Split `tasks` into consecutive runs in which no tile is written twice or
/// both read and written, so that a run can hold all its guards at once.
fn independent_runs<'t, 'r, 'a, T: Scalar>(
    tasks: &'t [&'r TileTask<'a, T>],
) -> Vec<&'t [&'r TileTask<'a, T>]> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut reads = BTreeSet::new();
    let mut writes = BTreeSet::new();
    for (index, task) in tasks.iter().enumerate() {
        let conflict = task.writes.iter().any(|tile| {
            let key = tile.key();
            reads.contains(&key) || writes.contains(&key)
        }) || task.reads.iter().any(|tile| writes.contains(&tile.key()));
        if conflict {
            runs.push(&tasks[start..index]);
            start = index;
            reads.clear();
            writes.clear();
        }
        reads.extend(task.reads.iter().map(TileRef::key));
        writes.extend(task.writes.iter().map(TileRef::key));
    }
    if start < tasks.len() {
        runs.push(&tasks[start..]);
    }
    runs
}

/// Group tasks by operand shapes. Each group runs as batched calls over
/// independent tasks, one call unless tasks of the group share an output.
///
/// Returns the number of batched calls made.
pub(crate) fn run_batched<T: Scalar>(
    kernel: &Kernel<T>,
    tasks: &[TileTask<'_, T>],
) -> DistResult<usize> {
    let mut groups: BTreeMap<Vec<(usize, usize)>, Vec<&TileTask<'_, T>>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.shape()).or_default().push(task);
    }
    let mut calls = 0;
    for (shape, group) in &groups {
        for run in independent_runs(group) {
            tracing::trace!(kernel = kernel.name(), ?shape, count = run.len(), "host batch");
            run_group(kernel, run)?;
            calls += 1;
        }
    }
    Ok(calls)
}
