//! Borrowed column-major views over tile storage.
//!
//! Kernels never see [`Tile`](super::Tile) directly: they work on views so that
//! the same code runs on host buffers and on locked device buffers.

use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;

/// Read-only view of an `mb × nb` column-major block with leading dimension `stride`.
#[derive(Clone, Copy)]
pub struct TileView<'a, T> {
    data: &'a [T],
    mb: usize,
    nb: usize,
    stride: usize,
}

/// Mutable view of an `mb × nb` column-major block with leading dimension `stride`.
pub struct TileViewMut<'a, T> {
    data: &'a mut [T],
    mb: usize,
    nb: usize,
    stride: usize,
}

fn required_len(mb: usize, nb: usize, stride: usize) -> usize {
    if mb == 0 || nb == 0 {
        0
    } else {
        stride * (nb - 1) + mb
    }
}

/// Check that `len` elements with leading dimension `stride` hold an `mb × nb` block.
pub(crate) fn check_block(len: usize, mb: usize, nb: usize, stride: usize) -> DistResult<()> {
    if stride < mb.max(1) {
        return Err(DistError::config(format!("stride {stride} < rows {mb}")));
    }
    if len < required_len(mb, nb, stride) {
        return Err(DistError::config(format!(
            "buffer of {len} elements too small for {mb}x{nb} (ld {stride})"
        )));
    }
    Ok(())
}

impl<'a, T: Scalar> TileView<'a, T> {
    /// Wrap a slice. Fails if the slice cannot hold the block.
    pub fn new(data: &'a [T], mb: usize, nb: usize, stride: usize) -> DistResult<Self> {
        check_block(data.len(), mb, nb, stride)?;
        Ok(Self::from_parts(data, mb, nb, stride))
    }

    /// Wrap storage whose shape was checked when it was allocated.
    pub(crate) fn from_parts(data: &'a [T], mb: usize, nb: usize, stride: usize) -> Self {
        debug_assert!(check_block(data.len(), mb, nb, stride).is_ok());
        Self {
            data,
            mb,
            nb,
            stride,
        }
    }

    /// Rows
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Columns
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Leading dimension
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Element (i, j).
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        debug_assert!(i < self.mb && j < self.nb);
        self.data[i + j * self.stride]
    }

    /// Column `j` as a contiguous slice of `mb` elements.
    pub fn col(&self, j: usize) -> &'a [T] {
        let start = j * self.stride;
        &self.data[start..start + self.mb]
    }

    /// Packed column-major copy (leading dimension = `mb`).
    pub fn to_packed(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.mb * self.nb);
        for j in 0..self.nb {
            out.extend_from_slice(self.col(j));
        }
        out
    }
}

impl<'a, T: Scalar> TileViewMut<'a, T> {
    /// Wrap a mutable slice. Fails if the slice cannot hold the block.
    pub fn new(data: &'a mut [T], mb: usize, nb: usize, stride: usize) -> DistResult<Self> {
        check_block(data.len(), mb, nb, stride)?;
        Ok(Self::from_parts(data, mb, nb, stride))
    }

    pub(crate) fn from_parts(data: &'a mut [T], mb: usize, nb: usize, stride: usize) -> Self {
        debug_assert!(check_block(data.len(), mb, nb, stride).is_ok());
        Self {
            data,
            mb,
            nb,
            stride,
        }
    }

    /// Rows
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Columns
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Reborrow as a read-only view.
    pub fn as_view(&self) -> TileView<'_, T> {
        TileView {
            data: self.data,
            mb: self.mb,
            nb: self.nb,
            stride: self.stride,
        }
    }

    /// Element (i, j).
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        debug_assert!(i < self.mb && j < self.nb);
        self.data[i + j * self.stride]
    }

    /// Overwrite element (i, j).
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        debug_assert!(i < self.mb && j < self.nb);
        self.data[i + j * self.stride] = value;
    }

    /// Mutable reference to element (i, j).
    #[inline]
    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut T {
        debug_assert!(i < self.mb && j < self.nb);
        &mut self.data[i + j * self.stride]
    }

    /// Column `j` as a mutable slice of `mb` elements.
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        let start = j * self.stride;
        &mut self.data[start..start + self.mb]
    }

    /// Set every element of the block to `value`.
    pub fn fill(&mut self, value: T) {
        for j in 0..self.nb {
            self.col_mut(j).fill(value);
        }
    }

    /// Copy an equally shaped block.
    pub fn copy_from(&mut self, src: &TileView<'_, T>) {
        assert_eq!((self.mb, self.nb), (src.mb(), src.nb()), "shape mismatch");
        for j in 0..self.nb {
            self.col_mut(j).copy_from_slice(src.col(j));
        }
    }

    /// Fill from a packed column-major slice of `mb * nb` elements.
    pub fn copy_from_packed(&mut self, packed: &[T]) {
        assert_eq!(packed.len(), self.mb * self.nb, "packed length mismatch");
        let mb = self.mb;
        for j in 0..self.nb {
            self.col_mut(j).copy_from_slice(&packed[j * mb..(j + 1) * mb]);
        }
    }
}
