//! Distributed matrices.
//!
//! A [`DistributedMatrix`] is a logical `m × n` matrix cut into `nb × nb`
//! tiles (ragged in the last row and column) spread block-cyclically over a
//! [`ProcessGrid`]. Each rank holds the same handle shape; only its own tiles
//! and the workspace copies it received are backed by memory.

mod grid;
mod scalapack;
mod transfer;

pub use grid::*;
pub use scalapack::*;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::coherency::{
    Access, CoherencyDirectory, CopyStats, TileReadGuard, TileState, TileWriteGuard,
};
use crate::comm::Communicator;
use crate::device::{DeviceBuffer, DeviceSet};
use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{Location, Tile, TileKind};
use crate::types::ceildiv;

static NEXT_MATRIX_ID: AtomicU64 = AtomicU64::new(0);

struct MatrixStorage<T> {
    id: u64,
    m: usize,
    n: usize,
    nb: usize,
    mt: usize,
    nt: usize,
    grid: ProcessGrid,
    comm: Arc<dyn Communicator>,
    directory: CoherencyDirectory<T>,
}

/// Shallow handle to a tiled, block-cyclically distributed matrix.
///
/// Cloning and [`DistributedMatrix::sub`] share storage; tile indices of a
/// handle are relative to its offset.
pub struct DistributedMatrix<T> {
    storage: Arc<MatrixStorage<T>>,
    ioffset: usize,
    joffset: usize,
    mt: usize,
    nt: usize,
}

impl<T> Clone for DistributedMatrix<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            ioffset: self.ioffset,
            joffset: self.joffset,
            mt: self.mt,
            nt: self.nt,
        }
    }
}

impl<T> core::fmt::Debug for DistributedMatrix<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistributedMatrix")
            .field("id", &self.storage.id)
            .field("m", &self.storage.m)
            .field("n", &self.storage.n)
            .field("nb", &self.storage.nb)
            .field("offset", &(self.ioffset, self.joffset))
            .field("tiles", &(self.mt, self.nt))
            .finish()
    }
}

impl<T: Scalar> DistributedMatrix<T> {
    /// Describe an `m × n` matrix with `nb × nb` tiles on `grid`.
    ///
    /// No tile is allocated; see [`Self::insert_local_tiles`].
    pub fn new(
        m: usize,
        n: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        devices: Arc<DeviceSet>,
    ) -> DistResult<Self> {
        if nb == 0 {
            return Err(DistError::config("tile size must be positive"));
        }
        if grid.size() != comm.size() {
            return Err(DistError::config(format!(
                "process grid {}x{} does not match communicator of {} ranks",
                grid.p(),
                grid.q(),
                comm.size()
            )));
        }
        let (mt, nt) = (ceildiv(m, nb), ceildiv(n, nb));
        let storage = MatrixStorage {
            id: NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed),
            m,
            n,
            nb,
            mt,
            nt,
            grid,
            directory: CoherencyDirectory::new(comm.rank(), mt, nt, devices),
            comm,
        };
        Ok(Self {
            storage: Arc::new(storage),
            ioffset: 0,
            joffset: 0,
            mt,
            nt,
        })
    }

    /// View of tile rows `i1..=i2` and tile columns `j1..=j2`, sharing storage.
    pub fn sub(&self, i1: usize, i2: usize, j1: usize, j2: usize) -> DistResult<Self> {
        if i1 > i2 || j1 > j2 || i2 >= self.mt || j2 >= self.nt {
            return Err(DistError::config(format!(
                "sub({i1}, {i2}, {j1}, {j2}) outside {}x{} tiles",
                self.mt, self.nt
            )));
        }
        Ok(Self {
            storage: Arc::clone(&self.storage),
            ioffset: self.ioffset + i1,
            joffset: self.joffset + j1,
            mt: i2 - i1 + 1,
            nt: j2 - j1 + 1,
        })
    }

    /// Identity of the underlying storage, shared by every view.
    pub fn id(&self) -> u64 {
        self.storage.id
    }

    /// Global tile coordinates of local tile (i, j) of this view.
    pub fn global_index(&self, i: usize, j: usize) -> (usize, usize) {
        (self.ioffset + i, self.joffset + j)
    }

    /// Tile rows of this view.
    pub fn mt(&self) -> usize {
        self.mt
    }

    /// Tile columns of this view.
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// Tile size.
    pub fn nb(&self) -> usize {
        self.storage.nb
    }

    /// Rows of this view.
    pub fn m(&self) -> usize {
        (0..self.mt).map(|i| self.tile_mb(i)).sum()
    }

    /// Columns of this view.
    pub fn n(&self) -> usize {
        (0..self.nt).map(|j| self.tile_nb(j)).sum()
    }

    /// Rows of tile row `i`, accounting for the ragged last block.
    pub fn tile_mb(&self, i: usize) -> usize {
        let gi = self.ioffset + i;
        let nb = self.storage.nb;
        if gi + 1 == self.storage.mt {
            self.storage.m - gi * nb
        } else {
            nb
        }
    }

    /// Columns of tile column `j`, accounting for the ragged last block.
    pub fn tile_nb(&self, j: usize) -> usize {
        let gj = self.joffset + j;
        let nb = self.storage.nb;
        if gj + 1 == self.storage.nt {
            self.storage.n - gj * nb
        } else {
            nb
        }
    }

    /// Process grid.
    pub fn grid(&self) -> ProcessGrid {
        self.storage.grid
    }

    /// Transport shared with the other ranks.
    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.storage.comm
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.storage.comm.rank()
    }

    /// Devices of this rank.
    pub fn devices(&self) -> &Arc<DeviceSet> {
        self.storage.directory.devices()
    }

    /// Owner of tile (i, j).
    pub fn tile_rank(&self, i: usize, j: usize) -> usize {
        let (gi, gj) = self.global_index(i, j);
        self.storage.grid.tile_rank(gi, gj)
    }

    /// Whether this rank owns tile (i, j).
    pub fn tile_is_local(&self, i: usize, j: usize) -> bool {
        self.tile_rank(i, j) == self.rank()
    }

    /// Device a local tile is assigned to, cycling over devices by local tile column.
    pub fn tile_device(&self, i: usize, j: usize) -> Option<usize> {
        let ndev = self.devices().len();
        if ndev == 0 {
            return None;
        }
        let (_, gj) = self.global_index(i, j);
        Some((gj / self.storage.grid.q()) % ndev)
    }

    /// Ranks owning at least one tile of this view.
    pub fn get_ranks(&self) -> BTreeSet<usize> {
        self.tile_coords()
            .map(|(i, j)| self.tile_rank(i, j))
            .collect()
    }

    /// Devices holding local tiles of this view.
    pub fn get_local_devices(&self) -> BTreeSet<usize> {
        self.local_tiles()
            .filter_map(|(i, j)| self.tile_device(i, j))
            .collect()
    }

    fn tile_coords(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.nt).flat_map(move |j| (0..self.mt).map(move |i| (i, j)))
    }

    /// Coordinates of the tiles owned by this rank, column by column.
    pub fn local_tiles(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.tile_coords().filter(|(i, j)| self.tile_is_local(*i, *j))
    }

    /// Allocate zeroed origin tiles for every local tile, in host memory.
    pub fn insert_local_tiles(&self) -> DistResult<()> {
        for (i, j) in self.local_tiles() {
            let (gi, gj) = self.global_index(i, j);
            let tile = Tile::host(self.tile_mb(i), self.tile_nb(j), TileKind::Origin);
            self.storage.directory.insert_origin(gi, gj, tile)?;
        }
        Ok(())
    }

    /// Allocate zeroed origin tiles for every local tile on its assigned device.
    pub fn insert_local_tiles_on_devices(&self) -> DistResult<()> {
        for (i, j) in self.local_tiles() {
            let device = self.tile_device(i, j).ok_or_else(|| {
                DistError::config(format!("rank {} has no devices", self.rank()))
            })?;
            let (mb, nb) = (self.tile_mb(i), self.tile_nb(j));
            let buffer = self.devices().device(device)?.pool().allocate(mb * nb)?;
            let (gi, gj) = self.global_index(i, j);
            self.storage
                .directory
                .insert_origin(gi, gj, Tile::device(mb, nb, buffer, TileKind::Origin))?;
        }
        Ok(())
    }

    /// Overwrite every local tile with `f(row, col)` of global element indices.
    pub fn fill_local(&self, f: impl Fn(usize, usize) -> T) -> DistResult<()> {
        let nb = self.storage.nb;
        for (i, j) in self.local_tiles() {
            let (gi, gj) = self.global_index(i, j);
            let location = self.tile_origin(i, j)?.unwrap_or(Location::Host);
            let mut tile = self.tile_get_for_writing(i, j, location)?;
            tile.write(|mut view| {
                for c in 0..view.nb() {
                    for r in 0..view.mb() {
                        view.set(r, c, f(gi * nb + r, gj * nb + c));
                    }
                }
            });
        }
        Ok(())
    }

    /// Packed host copy of a tile's elements.
    pub fn tile_to_vec(&self, i: usize, j: usize) -> DistResult<Vec<T>> {
        let tile = self.tile_get_for_reading(i, j, Location::Host)?;
        Ok(tile.view()?.to_packed())
    }

    /// Shared access to tile (i, j) at `location`.
    pub fn tile_get_for_reading(
        &self,
        i: usize,
        j: usize,
        location: Location,
    ) -> DistResult<TileReadGuard<'_, T>> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.acquire_for_reading(gi, gj, location)
    }

    /// Exclusive access to tile (i, j) at `location`.
    pub fn tile_get_for_writing(
        &self,
        i: usize,
        j: usize,
        location: Location,
    ) -> DistResult<TileWriteGuard<'_, T>> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.acquire_for_writing(gi, gj, location)
    }

    /// Acquire tile (i, j) at `location` and pin it until [`Self::tile_release`].
    pub fn tile_acquire_and_hold(
        &self,
        i: usize,
        j: usize,
        location: Location,
        access: Access,
    ) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage
            .directory
            .acquire_and_hold(gi, gj, location, access)
    }

    /// Device pointer and stored shape of tile (i, j) on `device`.
    pub fn tile_device_buffer(
        &self,
        i: usize,
        j: usize,
        device: usize,
    ) -> DistResult<(DeviceBuffer<T>, usize, usize)> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.device_buffer(gi, gj, device)
    }

    /// Clear the hold on tile (i, j) at `location`.
    pub fn tile_release(&self, i: usize, j: usize, location: Location) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.release(gi, gj, location)
    }

    /// Count down one use of a workspace tile.
    pub fn tile_tick(&self, i: usize, j: usize) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.tick(gi, gj)
    }

    /// Remaining uses of a workspace tile.
    pub fn tile_life(&self, i: usize, j: usize) -> DistResult<usize> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.life(gi, gj)
    }

    /// Set the remaining uses of a workspace tile.
    pub fn tile_set_life(&self, i: usize, j: usize, life: usize) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.set_life(gi, gj, life)
    }

    /// Coherency state of tile (i, j) at `location`.
    pub fn tile_state(&self, i: usize, j: usize, location: Location) -> DistResult<TileState> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.state(gi, gj, location)
    }

    /// Coherency states of tile (i, j) at every location.
    pub fn tile_states(&self, i: usize, j: usize) -> DistResult<Vec<(Location, TileState)>> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.states(gi, gj)
    }

    /// Whether tile (i, j) satisfies the single-writer invariant.
    pub fn tile_is_coherent(&self, i: usize, j: usize) -> DistResult<bool> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.is_coherent(gi, gj)
    }

    /// Origin location of tile (i, j), if it is local.
    pub fn tile_origin(&self, i: usize, j: usize) -> DistResult<Option<Location>> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.origin(gi, gj)
    }

    /// Evict the cached copy of tile (i, j) at `location`.
    pub fn tile_evict(&self, i: usize, j: usize, location: Location) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.evict(gi, gj, location)
    }

    /// Make the origin of tile (i, j) valid again after work elsewhere.
    pub fn tile_update_origin(&self, i: usize, j: usize) -> DistResult<()> {
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.update_origin(gi, gj)
    }

    /// Update every local origin and free all workspace copies not on hold.
    pub fn clear_workspace(&self) -> DistResult<()> {
        self.storage.directory.clear_workspace()
    }

    /// Copies performed by the directory.
    pub fn copy_stats(&self) -> CopyStats {
        self.storage.directory.copy_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;

    fn matrix(m: usize, n: usize, nb: usize) -> DistributedMatrix<f64> {
        DistributedMatrix::new(
            m,
            n,
            nb,
            ProcessGrid::new(1, 1).unwrap(),
            Arc::new(SelfComm::new()),
            DeviceSet::host_only(),
        )
        .unwrap()
    }

    #[test]
    fn test_ragged_tiles() {
        let a = matrix(10, 7, 4);
        assert_eq!((a.mt(), a.nt()), (3, 2));
        assert_eq!(a.tile_mb(0), 4);
        assert_eq!(a.tile_mb(2), 2);
        assert_eq!(a.tile_nb(1), 3);
        assert_eq!((a.m(), a.n()), (10, 7));
    }

    #[test]
    fn test_sub_shares_storage() {
        let a = matrix(12, 12, 4);
        a.insert_local_tiles().unwrap();
        a.fill_local(|r, c| (r * 100 + c) as f64).unwrap();

        let s = a.sub(1, 2, 2, 2).unwrap();
        assert_eq!((s.mt(), s.nt()), (2, 1));
        assert_eq!(s.id(), a.id());
        assert_eq!(s.global_index(1, 0), (2, 2));
        assert_eq!(s.tile_to_vec(0, 0).unwrap()[0], 408.0);

        {
            let mut tile = s.tile_get_for_writing(1, 0, Location::Host).unwrap();
            tile.view_mut().unwrap().set(0, 0, -1.0);
        }
        assert_eq!(a.tile_to_vec(2, 2).unwrap()[0], -1.0);
        assert!(a.sub(0, 3, 0, 0).is_err());
    }

    #[test]
    fn test_rejects_mismatched_grid() {
        let err = DistributedMatrix::<f32>::new(
            8,
            8,
            4,
            ProcessGrid::new(2, 1).unwrap(),
            Arc::new(SelfComm::new()),
            DeviceSet::host_only(),
        )
        .unwrap_err();
        assert!(matches!(err, DistError::Configuration { .. }));
    }

    #[test]
    fn test_device_origin_tiles() {
        let a = DistributedMatrix::<f64>::new(
            8,
            8,
            4,
            ProcessGrid::new(1, 1).unwrap(),
            Arc::new(SelfComm::new()),
            DeviceSet::new(2, 1 << 16).unwrap(),
        )
        .unwrap();
        a.insert_local_tiles_on_devices().unwrap();
        assert_eq!(a.tile_device(0, 1), Some(1));
        assert_eq!(
            a.get_local_devices().into_iter().collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(a.tile_origin(0, 1).unwrap(), Some(Location::Device(1)));

        a.fill_local(|r, c| (r + c) as f64).unwrap();
        assert_eq!(a.tile_to_vec(1, 1).unwrap()[0], 8.0);
        assert_eq!(a.copy_stats().device_to_host, 1);
        assert_eq!(a.get_ranks().len(), 1);
    }
}
