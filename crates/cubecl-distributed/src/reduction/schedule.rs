use crate::types::{Op, Side};

/// Order in which tree levels are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Coarsest pairing first, step halving each level.
    Descending,
    /// Finest pairing first, step doubling each level.
    Ascending,
}

impl Direction {
    /// Applying `Q` from the left or `Q^T` from the right undoes the
    /// factorization order and descends; the other two combinations ascend.
    pub fn of(side: Side, op: Op) -> Self {
        if (side == Side::Left) == (op == Op::NoTrans) {
            Direction::Descending
        } else {
            Direction::Ascending
        }
    }
}

/// One exchange: `sender` ships its tiles to `receiver`, which applies the
/// node's transform and ships the residual back. Both are participant positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pairing {
    /// Accumulating participant
    pub receiver: usize,
    /// Eliminated participant whose factors define the node
    pub sender: usize,
}

/// All pairings of one tree level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    /// Distance between partners
    pub step: usize,
    /// Pairings, by ascending receiver
    pub pairs: Vec<Pairing>,
}

/// Deterministic binary tree over `n` participants.
///
/// At step `s`, position `i` with `i mod 2s == 0` receives from `i + s` when
/// that position exists; unpaired positions sit the level out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionSchedule {
    participants: usize,
    direction: Direction,
    levels: Vec<Level>,
}

/// `ceil(log2(n))`, with 0 for `n <= 1`.
fn tree_depth(n: usize) -> usize {
    let mut depth = 0;
    while (1usize << depth) < n {
        depth += 1;
    }
    depth
}

impl ReductionSchedule {
    /// Schedule for `participants` positions visited in `direction`.
    pub fn new(participants: usize, direction: Direction) -> Self {
        let depth = tree_depth(participants);
        let steps: Vec<usize> = match direction {
            Direction::Descending => (0..depth).rev().map(|d| 1 << d).collect(),
            Direction::Ascending => (0..depth).map(|d| 1 << d).collect(),
        };
        let levels = steps
            .into_iter()
            .map(|step| Level {
                step,
                pairs: (0..participants)
                    .step_by(2 * step)
                    .filter(|index| index + step < participants)
                    .map(|index| Pairing {
                        receiver: index,
                        sender: index + step,
                    })
                    .collect(),
            })
            .collect();
        Self {
            participants,
            direction,
            levels,
        }
    }

    /// Number of positions.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Traversal order.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Levels in execution order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Number of levels in which `position` exchanges tiles.
    pub fn rounds(&self, position: usize) -> usize {
        self.levels
            .iter()
            .filter(|level| {
                level
                    .pairs
                    .iter()
                    .any(|pair| pair.receiver == position || pair.sender == position)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(schedule: &ReductionSchedule) -> Vec<Vec<(usize, usize)>> {
        schedule
            .levels()
            .iter()
            .map(|level| level.pairs.iter().map(|p| (p.receiver, p.sender)).collect())
            .collect()
    }

    #[test]
    fn test_tree_depth() {
        assert_eq!(tree_depth(0), 0);
        assert_eq!(tree_depth(1), 0);
        assert_eq!(tree_depth(2), 1);
        assert_eq!(tree_depth(3), 2);
        assert_eq!(tree_depth(8), 3);
        assert_eq!(tree_depth(9), 4);
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::of(Side::Left, Op::NoTrans), Direction::Descending);
        assert_eq!(Direction::of(Side::Right, Op::Trans), Direction::Descending);
        assert_eq!(Direction::of(Side::Left, Op::Trans), Direction::Ascending);
        assert_eq!(Direction::of(Side::Right, Op::NoTrans), Direction::Ascending);
    }

    #[test]
    fn test_descending_four() {
        let schedule = ReductionSchedule::new(4, Direction::Descending);
        assert_eq!(pairs(&schedule), vec![vec![(0, 2)], vec![(0, 1), (2, 3)]]);
        assert_eq!(schedule.rounds(0), 2);
        assert_eq!(schedule.rounds(1), 1);
        assert_eq!(schedule.rounds(2), 2);
        assert_eq!(schedule.rounds(3), 1);
    }

    #[test]
    fn test_non_power_of_two() {
        let down = ReductionSchedule::new(3, Direction::Descending);
        assert_eq!(pairs(&down), vec![vec![(0, 2)], vec![(0, 1)]]);
        let up = ReductionSchedule::new(3, Direction::Ascending);
        assert_eq!(pairs(&up), vec![vec![(0, 1)], vec![(0, 2)]]);
    }

    #[test]
    fn test_single_participant_has_no_levels() {
        assert!(ReductionSchedule::new(1, Direction::Ascending).levels().is_empty());
    }

    #[test]
    fn test_every_sender_eliminated_once() {
        for n in 1..20 {
            let schedule = ReductionSchedule::new(n, Direction::Ascending);
            let mut senders: Vec<usize> = schedule
                .levels()
                .iter()
                .flat_map(|level| level.pairs.iter().map(|p| p.sender))
                .collect();
            senders.sort_unstable();
            assert_eq!(senders, (1..n).collect::<Vec<_>>());
        }
    }
}
