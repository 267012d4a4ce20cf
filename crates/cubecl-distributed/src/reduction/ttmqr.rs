use std::collections::BTreeSet;

use super::{Direction, Level, Pairing, ParticipationSet, ReductionSchedule};
use crate::comm::Communicator;
use crate::dispatch::{
    supports, Completion, Kernel, KernelKind, TargetDispatcher, TileRef, TileTask,
};
use crate::error::{DistError, DistResult, Tag};
use crate::matrix::DistributedMatrix;
use crate::options::Options;
use crate::scalar::Scalar;
use crate::types::{Layout, Op, Side};

/// Operands of one reduction and the ranks' shared view of the tree.
struct TreeUpdate<'a, T> {
    side: Side,
    op: Op,
    v: &'a DistributedMatrix<T>,
    t: &'a DistributedMatrix<T>,
    c: &'a DistributedMatrix<T>,
    tag: Tag,
    options: &'a Options,
    participants: ParticipationSet,
}

/// A tile of C touched by one node application.
#[derive(Debug, Clone, Copy)]
struct Exchange {
    /// Tile of the accumulating participant, updated in place by its owner
    acc: (usize, usize),
    /// Tile of the eliminated participant, shipped out and back
    snd: (usize, usize),
    acc_owner: usize,
    snd_owner: usize,
}

impl<T: Scalar> TreeUpdate<'_, T> {
    /// Tile of C at representative `rep` and trailing position `k`.
    fn c_tile(&self, rep: usize, k: usize) -> (usize, usize) {
        match self.side {
            Side::Left => (rep, k),
            Side::Right => (k, rep),
        }
    }

    fn trailing(&self) -> usize {
        match self.side {
            Side::Left => self.c.nt(),
            Side::Right => self.c.mt(),
        }
    }

    /// Representative panel rows of a pairing: (receiver, sender).
    fn reps(&self, pair: &Pairing) -> (usize, usize) {
        (
            self.participants[pair.receiver].index,
            self.participants[pair.sender].index,
        )
    }

    fn exchanges(&self, pair: &Pairing) -> impl Iterator<Item = Exchange> + '_ {
        let (rep_a, rep_s) = self.reps(pair);
        (0..self.trailing()).map(move |k| {
            let (acc, snd) = (self.c_tile(rep_a, k), self.c_tile(rep_s, k));
            Exchange {
                acc,
                snd,
                acc_owner: self.c.tile_rank(acc.0, acc.1),
                snd_owner: self.c.tile_rank(snd.0, snd.1),
            }
        })
    }

    fn ticks(&self) -> bool {
        self.options.tile_release_strategy.ticks()
    }

    /// Run one level. Every rank walks the same pairings in the same order,
    /// so matching sends and receives are issued in the same sequence.
    fn run_level(&self, dispatcher: &TargetDispatcher, level: &Level) -> DistResult<()> {
        let rank = self.c.rank();

        // Node factors go to every rank applying them.
        for pair in &level.pairs {
            let (_, rep_s) = self.reps(pair);
            let computing: BTreeSet<usize> =
                self.exchanges(pair).map(|x| x.acc_owner).collect();
            let uses = self.exchanges(pair).filter(|x| x.acc_owner == rank).count();
            self.v.tile_bcast(rep_s, 0, &computing, self.tag, uses)?;
            self.t.tile_bcast(rep_s, 0, &computing, self.tag, uses)?;
        }

        // Sender tiles to the accumulating ranks.
        for pair in &level.pairs {
            for x in self.exchanges(pair).filter(|x| x.acc_owner != x.snd_owner) {
                let (i, j) = x.snd;
                if rank == x.snd_owner {
                    self.c.tile_send(i, j, x.acc_owner, self.tag)?;
                } else if rank == x.acc_owner {
                    self.c
                        .tile_recv(i, j, x.snd_owner, Layout::ColMajor, self.tag, 1)?;
                }
            }
        }

        // Local applications, all in one scoped join.
        let kernel = Kernel::Tpmqrt {
            side: self.side,
            op: self.op,
            ib: self.options.inner_blocking.min(self.v.nb()),
        };
        let mut tasks = Vec::new();
        let mut factors = Vec::new();
        for pair in &level.pairs {
            let (_, rep_s) = self.reps(pair);
            for x in self.exchanges(pair).filter(|x| x.acc_owner == rank) {
                tasks.push(TileTask::new(
                    vec![TileRef::new(self.v, rep_s, 0), TileRef::new(self.t, rep_s, 0)],
                    vec![
                        TileRef::new(self.c, x.acc.0, x.acc.1),
                        TileRef::new(self.c, x.snd.0, x.snd.1),
                    ],
                ));
                factors.push(rep_s);
            }
        }
        if dispatcher.dispatch(self.options.target, &kernel, &tasks)? == Completion::Pending {
            dispatcher.synchronize()?;
        }
        if self.ticks() {
            for rep_s in factors {
                self.v.tile_tick(rep_s, 0)?;
                self.t.tile_tick(rep_s, 0)?;
            }
        }

        // Residuals back to their owners.
        for pair in &level.pairs {
            for x in self.exchanges(pair).filter(|x| x.acc_owner != x.snd_owner) {
                let (i, j) = x.snd;
                if rank == x.acc_owner {
                    self.c.tile_send(i, j, x.snd_owner, self.tag)?;
                    if self.ticks() {
                        self.c.tile_tick(i, j)?;
                    }
                } else if rank == x.snd_owner {
                    self.c
                        .tile_recv(i, j, x.acc_owner, Layout::ColMajor, self.tag, 0)?;
                }
            }
        }
        Ok(())
    }
}

/// Close the collective through rank 0: every other rank reports, then rank 0
/// acknowledges each report. No rank returns before all ranks left the tree,
/// so an abort raised anywhere during the levels fails this step everywhere.
fn complete(comm: &dyn Communicator, tag: Tag) -> DistResult<()> {
    if comm.rank() == 0 {
        for peer in 1..comm.size() {
            comm.recv(peer, tag)?;
        }
        for peer in 1..comm.size() {
            comm.send(peer, tag, Vec::new())?;
        }
    } else {
        comm.send(0, tag, Vec::new())?;
        comm.recv(0, tag)?;
    }
    Ok(())
}

/// Reject inconsistent operands before any message is sent. Every rank sees
/// the same shapes and options, so every rank reaches the same verdict.
fn validate<T: Scalar>(
    side: Side,
    v: &DistributedMatrix<T>,
    t: &DistributedMatrix<T>,
    c: &DistributedMatrix<T>,
    options: &Options,
) -> DistResult<()> {
    if !supports(KernelKind::Tpmqrt, options.target) {
        return Err(DistError::UnsupportedTarget {
            kernel: KernelKind::Tpmqrt.name(),
            target: options.target,
        });
    }
    if v.nt() != 1 || t.nt() != 1 || t.mt() != v.mt() {
        return Err(DistError::config(format!(
            "panel factors must be single tile columns of equal height, got V {}x{} and T {}x{} tiles",
            v.mt(),
            v.nt(),
            t.mt(),
            t.nt()
        )));
    }
    let (extent, tiles) = match side {
        Side::Left => (c.m(), c.mt()),
        Side::Right => (c.n(), c.nt()),
    };
    if extent != v.m() || tiles != v.mt() || c.nb() != v.nb() {
        return Err(DistError::config(format!(
            "{side:?} update of a {}x{} matrix by a panel of {} rows (tile sizes {} and {})",
            c.m(),
            c.n(),
            v.m(),
            c.nb(),
            v.nb()
        )));
    }
    let ranks = [v.rank(), t.rank(), c.rank()];
    if ranks.iter().any(|&r| r != ranks[0]) {
        return Err(DistError::config("V, T and C belong to different ranks"));
    }
    Ok(())
}

/// Apply the orthogonal transform of a tree-reduced panel factorization to `c`.
///
/// `v` and `t` hold, at each eliminated participant's representative tile
/// row, the reflectors and triangular factors of the tree node that
/// eliminated it (as produced by [`tpqrt`](crate::kernels::tpqrt)). `c` is
/// updated as `op(Q) C` (`Side::Left`) or `C op(Q)` (`Side::Right`).
///
/// Must be called collectively by every rank of the communicator, with the
/// same arguments. No rank returns before every rank has finished the last
/// level. Any failure aborts the communicator and is reported on each rank as
/// [`DistError::ReductionFailure`].
#[tracing::instrument(level = "debug", skip_all, fields(rank = c.rank(), side = ?side, op = ?op, tag = tag))]
pub fn ttmqr<T: Scalar>(
    side: Side,
    op: Op,
    v: &DistributedMatrix<T>,
    t: &DistributedMatrix<T>,
    c: &DistributedMatrix<T>,
    tag: Tag,
    options: &Options,
) -> DistResult<()> {
    validate(side, v, t, c, options)?;

    let update = TreeUpdate {
        side,
        op,
        v,
        t,
        c,
        tag,
        options,
        participants: ParticipationSet::from_column(v, 0),
    };
    let schedule = ReductionSchedule::new(update.participants.len(), Direction::of(side, op));
    if schedule.levels().is_empty() {
        tracing::debug!("single participant, nothing to exchange");
        return Ok(());
    }
    let rank = c.rank();
    let abort = |level: usize, source: DistError| {
        c.comm().abort();
        tracing::warn!(rank, level, error = %source, "reduction tree aborted");
        DistError::ReductionFailure {
            rank,
            level,
            source: Box::new(source),
        }
    };
    let dispatcher = TargetDispatcher::new(options).map_err(|source| abort(0, source))?;

    for (index, level) in schedule.levels().iter().enumerate() {
        tracing::debug!(level = index, step = level.step, pairs = level.pairs.len(), "tree level");
        update
            .run_level(&dispatcher, level)
            .map_err(|source| abort(index, source))?;
    }

    let last = schedule.levels().len() - 1;
    complete(c.comm().as_ref(), tag).map_err(|source| abort(last, source))
}
