//! Interchange with the ScaLAPACK 2D block-cyclic layout.
//!
//! A rank's local array is column-major with leading dimension `lld`; global
//! tile (i, j) sits on grid cell (i mod p, j mod q) at local element offset
//! `(i / p) * nb + (j / q) * nb * lld`. Only `rsrc = csrc = 0` is produced.

use std::sync::Arc;

use super::{DistributedMatrix, ProcessGrid};
use crate::comm::Communicator;
use crate::device::DeviceSet;
use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{Location, Tile, TileKind};

/// The 9-integer ScaLAPACK array descriptor
/// `[dtype, ctxt, m, n, mb, nb, rsrc, csrc, lld]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ScalapackDesc(pub [i32; 9]);

impl ScalapackDesc {
    /// Descriptor type of dense block-cyclic matrices.
    pub const DTYPE_DENSE: i32 = 1;

    /// Context handle
    pub fn ctxt(&self) -> i32 {
        self.0[1]
    }

    /// Global rows
    pub fn m(&self) -> usize {
        self.0[2] as usize
    }

    /// Global columns
    pub fn n(&self) -> usize {
        self.0[3] as usize
    }

    /// Row block size
    pub fn mb(&self) -> usize {
        self.0[4] as usize
    }

    /// Column block size
    pub fn nb(&self) -> usize {
        self.0[5] as usize
    }

    /// Local leading dimension
    pub fn lld(&self) -> usize {
        self.0[8] as usize
    }
}

fn to_i32(name: &str, value: usize) -> DistResult<i32> {
    i32::try_from(value).map_err(|_| DistError::config(format!("{name} = {value} exceeds i32")))
}

/// Number of rows (or columns) of an `n`-long dimension, cut in blocks of
/// `nb`, that land on process `iproc` out of `nprocs` starting at `isrcproc`.
pub fn numroc(n: usize, nb: usize, iproc: usize, isrcproc: usize, nprocs: usize) -> usize {
    let mydist = (nprocs + iproc - isrcproc) % nprocs;
    let nblocks = n / nb;
    let mut num = (nblocks / nprocs) * nb;
    let extra = nblocks % nprocs;
    if mydist < extra {
        num += nb;
    } else if mydist == extra {
        num += n % nb;
    }
    num
}

/// Build and validate a descriptor for `rank` of `grid`.
///
/// `lld` must cover the local rows of the calling rank.
#[allow(clippy::too_many_arguments)]
pub fn descinit(
    m: usize,
    n: usize,
    mb: usize,
    nb: usize,
    ctxt: i32,
    lld: usize,
    grid: &ProcessGrid,
    rank: usize,
) -> DistResult<ScalapackDesc> {
    if mb == 0 || nb == 0 {
        return Err(DistError::config(format!("block size {mb}x{nb} must be positive")));
    }
    let (myrow, _) = grid.coords_of(rank);
    let local_rows = numroc(m, mb, myrow, 0, grid.p());
    if lld < local_rows.max(1) {
        return Err(DistError::config(format!(
            "lld = {lld} smaller than the {local_rows} local rows"
        )));
    }
    Ok(ScalapackDesc([
        ScalapackDesc::DTYPE_DENSE,
        ctxt,
        to_i32("m", m)?,
        to_i32("n", n)?,
        to_i32("mb", mb)?,
        to_i32("nb", nb)?,
        0,
        0,
        to_i32("lld", lld)?,
    ]))
}

impl<T: Scalar> DistributedMatrix<T> {
    /// Build a matrix whose local tiles are copied from this rank's
    /// block-cyclic local array.
    #[allow(clippy::too_many_arguments)]
    pub fn from_scalapack(
        m: usize,
        n: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        devices: Arc<DeviceSet>,
        local: &[T],
        lld: usize,
    ) -> DistResult<Self> {
        let matrix = Self::new(m, n, nb, grid, comm, devices)?;
        matrix.check_local_array(local.len(), lld)?;

        for (i, j) in matrix.local_tiles() {
            let (mb, tnb) = (matrix.tile_mb(i), matrix.tile_nb(j));
            let offset = matrix.local_offset(i, j, lld);
            let mut tile = Tile::host(mb, tnb, TileKind::Origin);
            let mut view = tile.view_mut()?;
            for c in 0..tnb {
                let start = offset + c * lld;
                view.col_mut(c).copy_from_slice(&local[start..start + mb]);
            }
            let (gi, gj) = matrix.global_index(i, j);
            matrix.storage.directory.insert_origin(gi, gj, tile)?;
        }
        Ok(matrix)
    }

    /// Descriptor of this matrix's layout as seen by this rank.
    pub fn scalapack_desc(&self, ctxt: i32) -> DistResult<ScalapackDesc> {
        let grid = self.grid();
        let (myrow, _) = grid.coords_of(self.rank());
        let lld = numroc(self.storage.m, self.nb(), myrow, 0, grid.p()).max(1);
        descinit(
            self.storage.m,
            self.storage.n,
            self.nb(),
            self.nb(),
            ctxt,
            lld,
            &grid,
            self.rank(),
        )
    }

    /// Copy every local tile of this view into the block-cyclic local array.
    pub fn copy_to_scalapack(&self, local: &mut [T], lld: usize) -> DistResult<()> {
        self.check_local_array(local.len(), lld)?;
        for (i, j) in self.local_tiles() {
            let offset = self.local_offset(i, j, lld);
            let tile = self.tile_get_for_reading(i, j, Location::Host)?;
            let view = tile.view()?;
            for c in 0..view.nb() {
                let start = offset + c * lld;
                local[start..start + view.mb()].copy_from_slice(view.col(c));
            }
        }
        Ok(())
    }

    fn local_offset(&self, i: usize, j: usize, lld: usize) -> usize {
        let (gi, gj) = self.global_index(i, j);
        let grid = self.grid();
        let nb = self.nb();
        (gi / grid.p()) * nb + (gj / grid.q()) * nb * lld
    }

    fn check_local_array(&self, len: usize, lld: usize) -> DistResult<()> {
        let grid = self.grid();
        let (myrow, mycol) = grid.coords_of(self.rank());
        let rows = numroc(self.storage.m, self.nb(), myrow, 0, grid.p());
        let cols = numroc(self.storage.n, self.nb(), mycol, 0, grid.q());
        if lld < rows.max(1) || len < lld * cols {
            return Err(DistError::config(format!(
                "local array of {len} elements with lld {lld} cannot hold {rows}x{cols}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalFabric;
    use std::time::Duration;

    #[test]
    fn test_numroc() {
        // 10 rows in blocks of 3 over 2 processes: blocks 0,2 | 1,3(ragged)
        assert_eq!(numroc(10, 3, 0, 0, 2), 6);
        assert_eq!(numroc(10, 3, 1, 0, 2), 4);
        assert_eq!(numroc(9, 3, 1, 0, 2), 3);
        assert_eq!(numroc(5, 8, 1, 0, 3), 0);
    }

    #[test]
    fn test_descinit_layout() {
        let grid = ProcessGrid::new(2, 2).unwrap();
        let desc = descinit(10, 7, 3, 3, 42, 6, &grid, 0).unwrap();
        assert_eq!(desc.0, [1, 42, 10, 7, 3, 3, 0, 0, 6]);
        assert!(descinit(10, 7, 3, 3, 42, 5, &grid, 0).is_err());
        assert!(descinit(10, 7, 0, 3, 42, 6, &grid, 0).is_err());
    }

    #[test]
    fn test_block_cyclic_round_trip() {
        let (m, n, nb) = (10, 7, 3);
        let grid = ProcessGrid::new(2, 2).unwrap();
        let global = |r: usize, c: usize| (r * 31 + c * 7) as f64;

        for comm in LocalFabric::new(4, Duration::from_secs(1)).endpoints() {
            let rank = comm.rank();
            let (myrow, mycol) = grid.coords_of(rank);
            let rows = numroc(m, nb, myrow, 0, 2);
            let cols = numroc(n, nb, mycol, 0, 2);
            let lld = rows.max(1);

            // Local array built straight from the block-cyclic definition.
            let mut local = vec![0.0; lld * cols];
            for lc in 0..cols {
                for lr in 0..rows {
                    let gr = ((lr / nb) * 2 + myrow) * nb + lr % nb;
                    let gc = ((lc / nb) * 2 + mycol) * nb + lc % nb;
                    local[lr + lc * lld] = global(gr, gc);
                }
            }

            let a = DistributedMatrix::from_scalapack(
                m,
                n,
                nb,
                grid,
                Arc::new(comm),
                DeviceSet::host_only(),
                &local,
                lld,
            )
            .unwrap();
            for (i, j) in a.local_tiles() {
                let tile = a.tile_to_vec(i, j).unwrap();
                assert_eq!(tile[0], global(i * nb, j * nb));
            }
            assert_eq!(a.scalapack_desc(0).unwrap().lld(), lld);

            let mut back = vec![-1.0; lld * cols];
            a.copy_to_scalapack(&mut back, lld).unwrap();
            assert_eq!(back, local);
        }
    }
}
