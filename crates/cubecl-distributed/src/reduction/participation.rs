use crate::matrix::DistributedMatrix;
use crate::scalar::Scalar;

/// A rank taking part in a reduction, with its representative tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Participant {
    /// Owning rank
    pub rank: usize,
    /// First tile index owned by the rank along the panel
    pub index: usize,
}

/// Distinct ranks owning tiles of a panel, ordered by their first tile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipationSet {
    participants: Vec<Participant>,
}

impl ParticipationSet {
    /// Build from `(tile index, owning rank)` pairs; the first index seen for a
    /// rank is its representative.
    pub fn from_owners(owners: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut participants: Vec<Participant> = Vec::new();
        for (index, rank) in owners {
            match participants.iter_mut().find(|p| p.rank == rank) {
                Some(known) if known.index <= index => {}
                Some(known) => known.index = index,
                None => participants.push(Participant { rank, index }),
            }
        }
        participants.sort_by_key(|p| p.index);
        Self { participants }
    }

    /// Participants of the tile column `j` of `panel`.
    pub fn from_column<T: Scalar>(panel: &DistributedMatrix<T>, j: usize) -> Self {
        Self::from_owners((0..panel.mt()).map(|i| (i, panel.tile_rank(i, j))))
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no rank participates.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participant at position `index`.
    pub fn get(&self, index: usize) -> Option<&Participant> {
        self.participants.get(index)
    }

    /// Position of `rank`, if it participates.
    pub fn position_of(&self, rank: usize) -> Option<usize> {
        self.participants.iter().position(|p| p.rank == rank)
    }

    /// Participants in order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }
}

impl core::ops::Index<usize> for ParticipationSet {
    type Output = Participant;

    fn index(&self, index: usize) -> &Participant {
        &self.participants[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tile_is_representative() {
        // Block-cyclic column over 3 ranks, listed out of order.
        let set = ParticipationSet::from_owners([(4, 1), (0, 0), (1, 1), (2, 2), (3, 0)]);
        let ranks: Vec<_> = set.iter().map(|p| (p.rank, p.index)).collect();
        assert_eq!(ranks, vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(set.position_of(2), Some(2));
        assert_eq!(set.position_of(7), None);
    }
}
