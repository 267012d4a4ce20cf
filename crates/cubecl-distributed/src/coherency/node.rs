use super::{Mosi, TileState};
use crate::tile::{Location, Tile};

pub(crate) struct Instance<T> {
    pub(crate) tile: Tile<T>,
    pub(crate) state: TileState,
}

/// Directory entry of one tile coordinate: one optional instance per location.
pub struct TileNode<T> {
    pub(crate) instances: Vec<Option<Instance<T>>>,
    pub(crate) origin: Option<usize>,
    pub(crate) life: usize,
}

impl<T> TileNode<T> {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            instances: (0..slots).map(|_| None).collect(),
            origin: None,
            life: 0,
        }
    }

    /// State at `slot` (`Invalid` when there is no instance).
    pub(crate) fn state(&self, slot: usize) -> TileState {
        self.instances
            .get(slot)
            .and_then(Option::as_ref)
            .map_or(TileState::INVALID, |inst| inst.state)
    }

    pub(crate) fn tile(&self, slot: usize) -> Option<&Tile<T>> {
        self.instances
            .get(slot)
            .and_then(Option::as_ref)
            .map(|inst| &inst.tile)
    }

    pub(crate) fn tile_mut(&mut self, slot: usize) -> Option<&mut Tile<T>> {
        self.instances
            .get_mut(slot)
            .and_then(Option::as_mut)
            .map(|inst| &mut inst.tile)
    }

    /// Best location to copy from: the modified copy, else host, else the first device.
    pub(crate) fn valid_source(&self, exclude: usize) -> Option<usize> {
        let valid = |slot: &usize| *slot != exclude && self.state(*slot).is_valid();
        let slots = 0..self.instances.len();
        slots
            .clone()
            .filter(valid)
            .find(|slot| self.state(*slot).mosi == Mosi::Modified)
            .or_else(|| slots.filter(valid).next())
    }

    /// A location other than `slot` that is on hold.
    pub(crate) fn held_elsewhere(&self, slot: usize) -> Option<usize> {
        (0..self.instances.len()).find(|other| *other != slot && self.state(*other).on_hold)
    }

    /// Mark `slot` modified and every other instance invalid.
    pub(crate) fn make_exclusive(&mut self, slot: usize) {
        for (index, inst) in self.instances.iter_mut().enumerate() {
            if let Some(inst) = inst {
                inst.state.mosi = if index == slot {
                    Mosi::Modified
                } else {
                    Mosi::Invalid
                };
            }
        }
    }

    /// Source and destination instances of a copy.
    pub(crate) fn pair_mut(
        &mut self,
        src: usize,
        dst: usize,
    ) -> Option<(&mut Instance<T>, &mut Instance<T>)> {
        if src == dst {
            return None;
        }
        let (low, high) = (src.min(dst), src.max(dst));
        let (head, tail) = self.instances.split_at_mut(high);
        let (a, b) = (head[low].as_mut()?, tail[0].as_mut()?);
        Some(if src < dst { (a, b) } else { (b, a) })
    }

    /// Every location with its state.
    pub fn states(&self) -> Vec<(Location, TileState)> {
        (0..self.instances.len())
            .map(|slot| (Location::from_slot(slot), self.state(slot)))
            .collect()
    }

    /// At most one location is modified, and then every other is invalid.
    pub fn is_coherent(&self) -> bool {
        let states: Vec<_> = (0..self.instances.len()).map(|s| self.state(s)).collect();
        let modified = states.iter().filter(|s| s.mosi == Mosi::Modified).count();
        let valid = states.iter().filter(|s| s.is_valid()).count();
        modified == 0 || (modified == 1 && valid == 1)
    }
}
