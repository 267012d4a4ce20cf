//! Multi-rank harness and reduction-tree fixtures.

use std::sync::Arc;
use std::time::Duration;

use super::reference::{cpu_apply, cpu_tree_q, dense_tile, sample, NodeFactors};
use crate::comm::{Communicator, LocalFabric};
use crate::device::DeviceSet;
use crate::error::DistResult;
use crate::matrix::{DistributedMatrix, ProcessGrid};
use crate::options::Options;
use crate::reduction::{Direction, ParticipationSet, ReductionSchedule};
use crate::types::{Op, Side};

/// Receive timeout of harness endpoints.
pub const HARNESS_TIMEOUT: Duration = Duration::from_secs(20);

/// Send tracing output of the current test to the test writer.
#[cfg(test)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Run `f` once per rank, each on its own thread with its own endpoint.
///
/// Results come back in rank order. A panic on any rank is re-raised.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Arc<dyn Communicator>) -> R + Sync,
{
    let options = Options::default().with_comm_timeout(HARNESS_TIMEOUT);
    let endpoints = LocalFabric::with_options(size, &options).endpoints();
    std::thread::scope(|s| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(Arc::new(comm)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(value) => value,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

/// Process grids, in column-major numbering, of the panel and of C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLayout {
    /// Communicator size
    pub ranks: usize,
    /// Grid of V and T
    pub panel: (usize, usize),
    /// Grid of C
    pub c: (usize, usize),
}

impl TreeLayout {
    /// Panel on `ranks × 1`; C on `ranks × 1` (Left) or `1 × ranks` (Right),
    /// so tile `rep` of C along the tree dimension has the panel tile's owner.
    pub fn aligned(side: Side, ranks: usize) -> Self {
        let c = match side {
            Side::Left => (ranks, 1),
            Side::Right => (1, ranks),
        };
        Self {
            ranks,
            panel: (ranks, 1),
            c,
        }
    }

    /// Panel and C on one `p × q` grid. Only the first grid column owns panel
    /// tiles, so ranks of the other columns apply nodes they take no part in.
    pub fn grid(p: usize, q: usize) -> Self {
        Self {
            ranks: p * q,
            panel: (p, q),
            c: (p, q),
        }
    }
}

/// Dense description of one reduction-tree update and its operands.
///
/// V and T are `mt` tiles tall and one tile wide. C is `mt*nb × extra`
/// (Left) or `extra × mt*nb` (Right). Where each lives is set by the
/// [`TreeLayout`].
#[derive(Debug, Clone)]
pub struct TreeFixture {
    pub side: Side,
    pub op: Op,
    pub ranks: usize,
    pub layout: TreeLayout,
    pub mt: usize,
    pub nb: usize,
    pub ib: usize,
    pub extra: usize,
    /// Node factors by level, finest level first
    pub levels: Vec<Vec<NodeFactors>>,
    /// Dense `mt*nb × nb` reflectors
    pub v: Vec<f64>,
    /// Dense `mt*nb × nb` triangular factors
    pub t: Vec<f64>,
    /// Dense C before the update
    pub c: Vec<f64>,
}

impl TreeFixture {
    /// Fixture on the [`TreeLayout::aligned`] layout.
    pub fn new(
        side: Side,
        op: Op,
        ranks: usize,
        mt: usize,
        nb: usize,
        ib: usize,
        extra: usize,
    ) -> Self {
        Self::with_layout(side, op, TreeLayout::aligned(side, ranks), mt, nb, ib, extra)
    }

    pub fn with_layout(
        side: Side,
        op: Op,
        layout: TreeLayout,
        mt: usize,
        nb: usize,
        ib: usize,
        extra: usize,
    ) -> Self {
        let n = mt * nb;
        // Panel tile i sits in grid row i mod p of the first grid column.
        let p = layout.panel.0;
        let participants = ParticipationSet::from_owners((0..mt).map(|i| (i, i % p)));
        let schedule = ReductionSchedule::new(participants.len(), Direction::Ascending);

        let mut v = vec![0.0; n * nb];
        let mut t = vec![0.0; n * nb];
        let levels: Vec<Vec<NodeFactors>> = schedule
            .levels()
            .iter()
            .map(|level| {
                level
                    .pairs
                    .iter()
                    .map(|pair| {
                        let rep_a = participants[pair.receiver].index;
                        let rep_s = participants[pair.sender].index;
                        let node = NodeFactors::random(rep_a, rep_s, nb, ib, 31 * rep_s + 3);
                        for c in 0..nb {
                            for r in 0..nb {
                                v[rep_s * nb + r + c * n] = node.v[r + c * nb];
                                t[rep_s * nb + r + c * n] = node.t[r + c * nb];
                            }
                        }
                        node
                    })
                    .collect()
            })
            .collect();

        let fixture = Self {
            side,
            op,
            ranks: layout.ranks,
            layout,
            mt,
            nb,
            ib,
            extra,
            levels,
            v,
            t,
            c: Vec::new(),
        };
        let (rows, cols) = fixture.c_shape();
        Self {
            c: sample(97, rows * cols),
            ..fixture
        }
    }

    /// Rows and columns of C.
    pub fn c_shape(&self) -> (usize, usize) {
        match self.side {
            Side::Left => (self.mt * self.nb, self.extra),
            Side::Right => (self.extra, self.mt * self.nb),
        }
    }

    /// This rank's V, T and C, with local tiles filled from the dense arrays.
    pub fn matrices(&self, comm: Arc<dyn Communicator>) -> DistResult<[DistributedMatrix<f64>; 3]> {
        let n = self.mt * self.nb;
        let panel_grid = ProcessGrid::new(self.layout.panel.0, self.layout.panel.1)?;
        let c_grid = ProcessGrid::new(self.layout.c.0, self.layout.c.1)?;
        let devices = DeviceSet::host_only();
        let (rows, cols) = self.c_shape();

        let panel = || {
            DistributedMatrix::new(n, self.nb, self.nb, panel_grid, comm.clone(), devices.clone())
        };
        let (v, t) = (panel()?, panel()?);
        let c = DistributedMatrix::new(rows, cols, self.nb, c_grid, comm, devices)?;
        for (matrix, dense, height) in [(&v, &self.v, n), (&t, &self.t, n), (&c, &self.c, rows)] {
            matrix.insert_local_tiles()?;
            matrix.fill_local(|r, col| dense[r + col * height])?;
        }
        Ok([v, t, c])
    }

    /// Dense `op(Q) C` or `C op(Q)`.
    pub fn expected(&self) -> Vec<f64> {
        let n = self.mt * self.nb;
        let q = cpu_tree_q(&self.levels, n, self.nb, self.ib);
        let (rows, cols) = self.c_shape();
        cpu_apply(self.side, self.op, &q, &self.c, rows, cols)
    }

    /// Largest deviation between the local tiles of `c` and `expected`.
    pub fn max_error(&self, c: &DistributedMatrix<f64>, expected: &[f64]) -> DistResult<f64> {
        let (rows, cols) = self.c_shape();
        let mut worst = 0.0_f64;
        for (i, j) in c.local_tiles() {
            let got = c.tile_to_vec(i, j)?;
            let want = dense_tile(expected, rows, cols, self.nb, i, j);
            for (x, y) in got.iter().zip(&want) {
                worst = worst.max((x - y).abs());
            }
        }
        Ok(worst)
    }
}
