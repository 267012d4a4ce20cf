use crate::error::{DistError, DistResult};

/// Order in which grid cells are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GridOrder {
    /// rank = row + col * p
    #[default]
    ColMajor,
    /// rank = row * q + col
    RowMajor,
}

/// `p × q` process grid of the 2D block-cyclic distribution.
///
/// Tile (i, j) belongs to grid cell (i mod p, j mod q). Ownership is a pure
/// function of the coordinates and the grid shape, so every rank computes it
/// without communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessGrid {
    p: usize,
    q: usize,
    order: GridOrder,
}

impl ProcessGrid {
    /// Column-major `p × q` grid.
    pub fn new(p: usize, q: usize) -> DistResult<Self> {
        Self::with_order(p, q, GridOrder::ColMajor)
    }

    /// `p × q` grid with an explicit numbering order.
    pub fn with_order(p: usize, q: usize, order: GridOrder) -> DistResult<Self> {
        if p == 0 || q == 0 {
            return Err(DistError::config(format!("invalid process grid {p}x{q}")));
        }
        Ok(Self { p, q, order })
    }

    /// Grid rows.
    pub fn p(&self) -> usize {
        self.p
    }

    /// Grid columns.
    pub fn q(&self) -> usize {
        self.q
    }

    /// Numbering order.
    pub fn order(&self) -> GridOrder {
        self.order
    }

    /// Number of ranks in the grid.
    pub fn size(&self) -> usize {
        self.p * self.q
    }

    /// Rank of grid cell (row, col).
    pub fn rank_of(&self, row: usize, col: usize) -> usize {
        match self.order {
            GridOrder::ColMajor => row + col * self.p,
            GridOrder::RowMajor => row * self.q + col,
        }
    }

    /// Grid cell of `rank`.
    pub fn coords_of(&self, rank: usize) -> (usize, usize) {
        match self.order {
            GridOrder::ColMajor => (rank % self.p, rank / self.p),
            GridOrder::RowMajor => (rank / self.q, rank % self.q),
        }
    }

    /// Owner of global tile (i, j).
    pub fn tile_rank(&self, i: usize, j: usize) -> usize {
        self.rank_of(i % self.p, j % self.q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_cyclic_ownership() {
        let grid = ProcessGrid::new(2, 3).unwrap();
        assert_eq!(grid.size(), 6);
        assert_eq!(grid.tile_rank(0, 0), 0);
        assert_eq!(grid.tile_rank(1, 0), 1);
        assert_eq!(grid.tile_rank(0, 1), 2);
        assert_eq!(grid.tile_rank(3, 4), 3);
        for rank in 0..6 {
            let (r, c) = grid.coords_of(rank);
            assert_eq!(grid.rank_of(r, c), rank);
        }
    }

    #[test]
    fn test_row_major_order() {
        let grid = ProcessGrid::with_order(2, 3, GridOrder::RowMajor).unwrap();
        assert_eq!(grid.tile_rank(0, 1), 1);
        assert_eq!(grid.tile_rank(1, 0), 3);
        assert_eq!(grid.coords_of(5), (1, 2));
    }

    #[test]
    fn test_rejects_empty_grid() {
        assert!(matches!(
            ProcessGrid::new(0, 2),
            Err(DistError::Configuration { .. })
        ));
    }
}
