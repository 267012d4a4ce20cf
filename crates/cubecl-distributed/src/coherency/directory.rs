use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::node::{Instance, TileNode};
use super::{Mosi, TileState};
use crate::device::DeviceBuffer;
use crate::device::DeviceSet;
use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;
use crate::tile::{Location, Tile, TileKind};

/// Access mode of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Shared, read-only
    Read,
    /// Exclusive, read-write
    Write,
}

/// Number of tile copies performed by the directory, by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyStats {
    /// Host to device copies
    pub host_to_device: usize,
    /// Device to host copies
    pub device_to_host: usize,
    /// Device to device copies
    pub device_to_device: usize,
}

impl CopyStats {
    /// Total number of copies.
    pub fn total(&self) -> usize {
        self.host_to_device + self.device_to_host + self.device_to_device
    }
}

#[derive(Default)]
struct CopyCounters {
    host_to_device: AtomicUsize,
    device_to_host: AtomicUsize,
    device_to_device: AtomicUsize,
}

impl CopyCounters {
    fn record(&self, src: Location, dst: Location) {
        let counter = match (src, dst) {
            (Location::Host, _) => &self.host_to_device,
            (_, Location::Host) => &self.device_to_host,
            _ => &self.device_to_device,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CopyStats {
        CopyStats {
            host_to_device: self.host_to_device.load(Ordering::Relaxed),
            device_to_host: self.device_to_host.load(Ordering::Relaxed),
            device_to_device: self.device_to_device.load(Ordering::Relaxed),
        }
    }
}

/// Per-matrix map from tile coordinate to the instances of that tile.
///
/// Storage is an arena with one slot per coordinate, fixed at construction.
/// Each slot sits behind its own `RwLock`: read guards are shared and write
/// guards exclusive, which is how concurrent tasks of a rank are ordered.
pub struct CoherencyDirectory<T> {
    rank: usize,
    mt: usize,
    nt: usize,
    nodes: Vec<RwLock<TileNode<T>>>,
    devices: Arc<DeviceSet>,
    counters: CopyCounters,
}

/// Shared access to a valid tile instance.
pub struct TileReadGuard<'a, T> {
    node: RwLockReadGuard<'a, TileNode<T>>,
    slot: usize,
}

/// Exclusive access to a modified tile instance.
pub struct TileWriteGuard<'a, T> {
    node: RwLockWriteGuard<'a, TileNode<T>>,
    slot: usize,
}

impl<T> Deref for TileReadGuard<'_, T> {
    type Target = Tile<T>;

    fn deref(&self) -> &Tile<T> {
        match self.node.tile(self.slot) {
            Some(tile) => tile,
            None => unreachable!("read guard over an empty slot"),
        }
    }
}

impl<T> Deref for TileWriteGuard<'_, T> {
    type Target = Tile<T>;

    fn deref(&self) -> &Tile<T> {
        match self.node.tile(self.slot) {
            Some(tile) => tile,
            None => unreachable!("write guard over an empty slot"),
        }
    }
}

impl<T> DerefMut for TileWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Tile<T> {
        match self.node.tile_mut(self.slot) {
            Some(tile) => tile,
            None => unreachable!("write guard over an empty slot"),
        }
    }
}

impl<T> fmt::Debug for TileReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileReadGuard").field("tile", &**self).finish()
    }
}

impl<T> fmt::Debug for TileWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileWriteGuard").field("tile", &**self).finish()
    }
}

fn poisoned(_: impl Sized) -> DistError {
    DistError::Poisoned("tile node")
}

impl<T: Scalar> CoherencyDirectory<T> {
    /// Empty directory for an `mt × nt` tile grid.
    pub fn new(rank: usize, mt: usize, nt: usize, devices: Arc<DeviceSet>) -> Self {
        let slots = devices.len() + 1;
        Self {
            rank,
            mt,
            nt,
            nodes: (0..mt * nt)
                .map(|_| RwLock::new(TileNode::new(slots)))
                .collect(),
            devices,
            counters: CopyCounters::default(),
        }
    }

    /// Devices backing the non-host locations.
    pub fn devices(&self) -> &Arc<DeviceSet> {
        &self.devices
    }

    /// Copies performed so far.
    pub fn copy_stats(&self) -> CopyStats {
        self.counters.snapshot()
    }

    fn node(&self, i: usize, j: usize) -> DistResult<&RwLock<TileNode<T>>> {
        if i >= self.mt || j >= self.nt {
            return Err(DistError::config(format!(
                "tile ({i}, {j}) outside the {}x{} tile grid",
                self.mt, self.nt
            )));
        }
        Ok(&self.nodes[i + j * self.mt])
    }

    fn slot(&self, location: Location) -> DistResult<usize> {
        if let Location::Device(d) = location {
            self.devices.device(d)?;
        }
        Ok(location.slot())
    }

    fn read_node(&self, i: usize, j: usize) -> DistResult<RwLockReadGuard<'_, TileNode<T>>> {
        self.node(i, j)?.read().map_err(poisoned)
    }

    fn write_node(&self, i: usize, j: usize) -> DistResult<RwLockWriteGuard<'_, TileNode<T>>> {
        self.node(i, j)?.write().map_err(poisoned)
    }

    /// Insert the origin instance of a local tile. Its data is the only valid copy.
    pub fn insert_origin(&self, i: usize, j: usize, mut tile: Tile<T>) -> DistResult<()> {
        let slot = self.slot(tile.location())?;
        let mut node = self.write_node(i, j)?;
        tile.set_kind(TileKind::Origin);
        node.instances[slot] = Some(Instance {
            tile,
            state: TileState::INVALID,
        });
        node.origin = Some(slot);
        node.make_exclusive(slot);
        Ok(())
    }

    /// Location of the origin instance, if the tile is local.
    pub fn origin(&self, i: usize, j: usize) -> DistResult<Option<Location>> {
        Ok(self.read_node(i, j)?.origin.map(Location::from_slot))
    }

    fn allocate(
        &self,
        location: Location,
        mb: usize,
        nb: usize,
        kind: TileKind,
    ) -> DistResult<Tile<T>> {
        match location {
            Location::Host => Ok(Tile::host(mb, nb, kind)),
            Location::Device(d) => {
                let buffer = self.devices.device(d)?.pool().allocate(mb.max(1) * nb)?;
                Ok(Tile::device(mb, nb, buffer, kind))
            }
        }
    }

    fn sync_location(&self, location: Location) -> DistResult<()> {
        match location {
            Location::Host => Ok(()),
            Location::Device(d) => self.devices.device(d)?.queue().synchronize(),
        }
    }

    /// Make the instance at `slot` valid, copying from a valid location if needed.
    fn promote(&self, i: usize, j: usize, node: &mut TileNode<T>, slot: usize) -> DistResult<()> {
        if node.state(slot).is_valid() {
            return Ok(());
        }
        let src = node.valid_source(slot).ok_or(DistError::NotOwned {
            i,
            j,
            rank: self.rank,
        })?;
        let (src_loc, dst_loc) = (Location::from_slot(src), Location::from_slot(slot));

        let (mb, nb) = match node.tile(src) {
            Some(tile) => (tile.stored_mb(), tile.stored_nb()),
            None => return Err(DistError::NotOwned { i, j, rank: self.rank }),
        };
        let reusable = node
            .tile(slot)
            .is_some_and(|tile| (tile.stored_mb(), tile.stored_nb()) == (mb, nb));
        if !reusable {
            let kind = if node.origin == Some(slot) {
                TileKind::Origin
            } else {
                TileKind::Workspace
            };
            let on_hold = node.state(slot).on_hold;
            node.instances[slot] = Some(Instance {
                tile: self.allocate(dst_loc, mb, nb, kind)?,
                state: TileState {
                    mosi: Mosi::Invalid,
                    on_hold,
                },
            });
        }

        // Copy-out waits for kernels producing the source; copy-in must not
        // overtake kernels still reading the destination.
        self.sync_location(src_loc)?;
        self.sync_location(dst_loc)?;

        let (source, dest) = node
            .pair_mut(src, slot)
            .ok_or(DistError::NotOwned { i, j, rank: self.rank })?;
        dest.tile.copy_from(&source.tile);
        if source.state.mosi == Mosi::Modified {
            source.state.mosi = Mosi::Shared;
        }
        dest.state.mosi = Mosi::Shared;
        self.counters.record(src_loc, dst_loc);
        tracing::trace!(i, j, from = %src_loc, to = %dst_loc, "tile copy");
        Ok(())
    }

    fn prepare_write(
        &self,
        i: usize,
        j: usize,
        node: &mut TileNode<T>,
        slot: usize,
    ) -> DistResult<()> {
        if let Some(held) = node.held_elsewhere(slot) {
            return Err(DistError::StaleCopy {
                i,
                j,
                held: Location::from_slot(held),
                requested: Location::from_slot(slot),
            });
        }
        self.promote(i, j, node, slot)?;
        node.make_exclusive(slot);
        Ok(())
    }

    /// Shared access at `location`, copying in from a valid location if needed.
    ///
    /// The only change made to other locations is that a modified copy source
    /// becomes shared.
    pub fn acquire_for_reading(
        &self,
        i: usize,
        j: usize,
        location: Location,
    ) -> DistResult<TileReadGuard<'_, T>> {
        let slot = self.slot(location)?;
        let lock = self.node(i, j)?;
        loop {
            let node = lock.read().map_err(poisoned)?;
            if node.state(slot).is_valid() {
                return Ok(TileReadGuard { node, slot });
            }
            drop(node);

            let mut node = lock.write().map_err(poisoned)?;
            self.promote(i, j, &mut node, slot)?;
        }
    }

    /// Exclusive access at `location`: the instance becomes modified and every
    /// other location invalid.
    pub fn acquire_for_writing(
        &self,
        i: usize,
        j: usize,
        location: Location,
    ) -> DistResult<TileWriteGuard<'_, T>> {
        let slot = self.slot(location)?;
        let mut node = self.write_node(i, j)?;
        self.prepare_write(i, j, &mut node, slot)?;
        Ok(TileWriteGuard { node, slot })
    }

    /// Acquire at `location` and pin the instance until [`Self::release`].
    pub fn acquire_and_hold(
        &self,
        i: usize,
        j: usize,
        location: Location,
        access: Access,
    ) -> DistResult<()> {
        let slot = self.slot(location)?;
        let mut node = self.write_node(i, j)?;
        match access {
            Access::Read => self.promote(i, j, &mut node, slot)?,
            Access::Write => self.prepare_write(i, j, &mut node, slot)?,
        }
        if let Some(inst) = node.instances[slot].as_mut() {
            inst.state.on_hold = true;
        }
        Ok(())
    }

    /// Device pointer of the instance on `device`.
    pub fn device_buffer(
        &self,
        i: usize,
        j: usize,
        device: usize,
    ) -> DistResult<(DeviceBuffer<T>, usize, usize)> {
        let slot = self.slot(Location::Device(device))?;
        let node = self.read_node(i, j)?;
        node.tile(slot)
            .and_then(|tile| {
                tile.device_buffer()
                    .map(|buffer| (buffer.clone(), tile.stored_mb(), tile.stored_nb()))
            })
            .ok_or(DistError::NotOwned { i, j, rank: self.rank })
    }

    /// Clear the hold at `location`.
    ///
    /// A cached copy that is not modified is freed, unless the origin lost its
    /// data and the copy may be the last valid one.
    pub fn release(&self, i: usize, j: usize, location: Location) -> DistResult<()> {
        let slot = self.slot(location)?;
        let mut node = self.write_node(i, j)?;
        let disposable = node.origin != Some(slot) && origin_covers(&node);
        if let Some(inst) = node.instances[slot].as_mut() {
            inst.state.on_hold = false;
            if disposable && inst.state.mosi != Mosi::Modified {
                node.instances[slot] = None;
            }
        }
        Ok(())
    }

    /// Workspace life counter of a tile.
    pub fn life(&self, i: usize, j: usize) -> DistResult<usize> {
        Ok(self.read_node(i, j)?.life)
    }

    /// Set the workspace life counter of a tile.
    pub fn set_life(&self, i: usize, j: usize, life: usize) -> DistResult<()> {
        self.write_node(i, j)?.life = life;
        Ok(())
    }

    /// Count down one use of a workspace tile; the last use frees its copies.
    pub fn tick(&self, i: usize, j: usize) -> DistResult<()> {
        let mut node = self.write_node(i, j)?;
        if node.life == 0 {
            return Ok(());
        }
        node.life -= 1;
        if node.life == 0 {
            drop_workspace(&mut node);
        }
        Ok(())
    }

    /// State of the instance at `location`.
    pub fn state(&self, i: usize, j: usize, location: Location) -> DistResult<TileState> {
        let slot = self.slot(location)?;
        Ok(self.read_node(i, j)?.state(slot))
    }

    /// States of every location.
    pub fn states(&self, i: usize, j: usize) -> DistResult<Vec<(Location, TileState)>> {
        Ok(self.read_node(i, j)?.states())
    }

    /// Whether the tile satisfies the single-writer invariant.
    pub fn is_coherent(&self, i: usize, j: usize) -> DistResult<bool> {
        Ok(self.read_node(i, j)?.is_coherent())
    }

    /// Drop the instance at `location`, writing modified data back to the origin.
    ///
    /// Held instances and origin instances are never evicted.
    pub fn evict(&self, i: usize, j: usize, location: Location) -> DistResult<()> {
        let slot = self.slot(location)?;
        let mut node = self.write_node(i, j)?;
        let state = match node.instances[slot].as_ref() {
            Some(inst) => inst.state,
            None => return Ok(()),
        };
        if state.on_hold {
            return Err(DistError::StaleCopy {
                i,
                j,
                held: location,
                requested: location,
            });
        }
        if node.origin == Some(slot) {
            return Err(DistError::config(format!(
                "tile ({i}, {j}): the origin instance at {location} cannot be evicted"
            )));
        }
        if state.mosi == Mosi::Modified {
            if let Some(origin) = node.origin {
                self.promote(i, j, &mut node, origin)?;
                node.make_exclusive(origin);
            }
        }
        node.instances[slot] = None;
        Ok(())
    }

    /// Bring the origin instance up to date after work at another location.
    pub fn update_origin(&self, i: usize, j: usize) -> DistResult<()> {
        let mut node = self.write_node(i, j)?;
        match node.origin {
            Some(origin) => self.promote(i, j, &mut node, origin),
            None => Ok(()),
        }
    }

    /// Free every workspace instance that is not on hold, updating origins first.
    pub fn clear_workspace(&self) -> DistResult<()> {
        for index in 0..self.nodes.len() {
            let (i, j) = (index % self.mt, index / self.mt);
            let mut node = self.write_node(i, j)?;
            if let Some(origin) = node.origin {
                if node.valid_source(origin).is_some() {
                    self.promote(i, j, &mut node, origin)?;
                }
            }
            node.life = 0;
            drop_workspace(&mut node);
        }
        Ok(())
    }

    /// Store a payload into the host instance, which becomes shared while every
    /// other location is invalidated.
    ///
    /// Coordinates without an origin get a workspace instance with `life` uses.
    pub fn store_host(
        &self,
        i: usize,
        j: usize,
        mb: usize,
        nb: usize,
        life: usize,
        fill: impl FnOnce(&mut Tile<T>) -> DistResult<()>,
    ) -> DistResult<()> {
        let slot = Location::Host.slot();
        let mut node = self.write_node(i, j)?;
        if let Some(held) = node.held_elsewhere(slot) {
            return Err(DistError::StaleCopy {
                i,
                j,
                held: Location::from_slot(held),
                requested: Location::Host,
            });
        }
        let reusable = node
            .tile(slot)
            .is_some_and(|tile| (tile.stored_mb(), tile.stored_nb()) == (mb, nb));
        if !reusable {
            let kind = if node.origin == Some(slot) {
                TileKind::Origin
            } else {
                TileKind::Workspace
            };
            node.instances[slot] = Some(Instance {
                tile: Tile::host(mb, nb, kind),
                state: TileState::INVALID,
            });
        }
        if let Some(tile) = node.tile_mut(slot) {
            fill(tile)?;
        }
        node.make_exclusive(slot);
        if let Some(inst) = node.instances[slot].as_mut() {
            inst.state.mosi = Mosi::Shared;
        }
        if node.origin.is_none() {
            node.life = life;
        }
        Ok(())
    }
}

/// Whether dropping a non-origin copy cannot lose data: the tile is pure
/// workspace, or its origin is valid.
fn origin_covers<T>(node: &TileNode<T>) -> bool {
    node.origin.map_or(true, |origin| node.state(origin).is_valid())
}

fn drop_workspace<T>(node: &mut TileNode<T>) {
    let origin = node.origin;
    let covered = origin_covers(node);
    for (slot, inst) in node.instances.iter_mut().enumerate() {
        let keep = match inst {
            None => continue,
            Some(inst) => Some(slot) == origin || inst.state.on_hold || !covered,
        };
        if !keep {
            *inst = None;
        }
    }
}
