//! Tiles: the unit of distribution, coherency and scheduling.

mod view;

pub use view::*;

use core::fmt;

use crate::device::DeviceBuffer;
use crate::error::{DistError, DistResult, TransportFailure};
use crate::scalar::Scalar;
use crate::types::{Op, Uplo};

/// Memory location that may hold a tile instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// Host memory of the rank
    Host,
    /// Memory of device `k`
    Device(usize),
}

impl Location {
    /// Dense slot index: host is 0, device `k` is `k + 1`.
    pub fn slot(&self) -> usize {
        match self {
            Location::Host => 0,
            Location::Device(k) => k + 1,
        }
    }

    /// Inverse of [`Location::slot`].
    pub fn from_slot(slot: usize) -> Self {
        match slot {
            0 => Location::Host,
            k => Location::Device(k - 1),
        }
    }

    /// Device index, if any.
    pub fn device(&self) -> Option<usize> {
        match self {
            Location::Host => None,
            Location::Device(k) => Some(*k),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => write!(f, "host"),
            Location::Device(k) => write!(f, "device {k}"),
        }
    }
}

/// Role of a tile instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileKind {
    /// The instance at the tile's origin location; lives as long as the matrix.
    Origin,
    /// A cached or received copy; released by tick, release or workspace clearing.
    Workspace,
}

/// Backing storage of a tile instance.
pub enum TileBuffer<T> {
    /// Host-owned elements
    Host(Vec<T>),
    /// Device allocation
    Device(DeviceBuffer<T>),
}

/// Column-major block of matrix data at one location.
///
/// Element (i, j) of the stored block lives at `i + j * stride`. The `op` flag
/// records a logical transposition: [`Tile::mb`] and [`Tile::nb`] report the
/// transposed dimensions while the storage stays untouched.
pub struct Tile<T> {
    mb: usize,
    nb: usize,
    stride: usize,
    op: Op,
    uplo: Uplo,
    kind: TileKind,
    location: Location,
    buffer: TileBuffer<T>,
}

impl<T: Scalar> Tile<T> {
    /// Zeroed host tile with packed stride.
    pub fn host(mb: usize, nb: usize, kind: TileKind) -> Self {
        let stride = mb.max(1);
        Self::host_unchecked(mb, nb, stride, vec![T::zero(); stride * nb], kind)
    }

    /// Host tile over existing column-major data.
    pub fn from_vec(
        mb: usize,
        nb: usize,
        stride: usize,
        data: Vec<T>,
        kind: TileKind,
    ) -> DistResult<Self> {
        view::check_block(data.len(), mb, nb, stride)?;
        Ok(Self::host_unchecked(mb, nb, stride, data, kind))
    }

    fn host_unchecked(mb: usize, nb: usize, stride: usize, data: Vec<T>, kind: TileKind) -> Self {
        Self {
            mb,
            nb,
            stride,
            op: Op::NoTrans,
            uplo: Uplo::General,
            kind,
            location: Location::Host,
            buffer: TileBuffer::Host(data),
        }
    }

    /// Packed tile in device memory.
    pub fn device(mb: usize, nb: usize, buffer: DeviceBuffer<T>, kind: TileKind) -> Self {
        let location = Location::Device(buffer.device());
        Self {
            mb,
            nb,
            stride: mb.max(1),
            op: Op::NoTrans,
            uplo: Uplo::General,
            kind,
            location,
            buffer: TileBuffer::Device(buffer),
        }
    }

    /// Rows, after applying `op`.
    pub fn mb(&self) -> usize {
        if self.op.is_trans() {
            self.nb
        } else {
            self.mb
        }
    }

    /// Columns, after applying `op`.
    pub fn nb(&self) -> usize {
        if self.op.is_trans() {
            self.mb
        } else {
            self.nb
        }
    }

    /// Rows of the stored block.
    pub fn stored_mb(&self) -> usize {
        self.mb
    }

    /// Columns of the stored block.
    pub fn stored_nb(&self) -> usize {
        self.nb
    }

    /// Leading dimension.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Transposition flag.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Mark the tile as (conjugate-)transposed.
    pub fn set_op(&mut self, op: Op) {
        self.op = op;
    }

    /// Flip the transposition flag.
    pub fn transpose(&mut self) {
        self.op = self.op.compose(Op::Trans);
    }

    /// Triangle the tile represents.
    pub fn uplo(&self) -> Uplo {
        self.uplo
    }

    /// Set the triangle the tile represents.
    pub fn set_uplo(&mut self, uplo: Uplo) {
        self.uplo = uplo;
    }

    /// Origin or workspace.
    pub fn kind(&self) -> TileKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: TileKind) {
        self.kind = kind;
    }

    /// Where the instance lives.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Size of the packed payload.
    pub fn payload_bytes(&self) -> usize {
        self.mb * self.nb * core::mem::size_of::<T>()
    }

    /// Device pointer of a device tile.
    pub fn device_buffer(&self) -> Option<&DeviceBuffer<T>> {
        match &self.buffer {
            TileBuffer::Device(buffer) => Some(buffer),
            TileBuffer::Host(_) => None,
        }
    }

    /// Host elements of a host tile.
    pub fn host_data(&self) -> DistResult<&[T]> {
        match &self.buffer {
            TileBuffer::Host(data) => Ok(data),
            TileBuffer::Device(_) => Err(not_host(self.location)),
        }
    }

    /// Mutable host elements of a host tile.
    pub fn host_data_mut(&mut self) -> DistResult<&mut [T]> {
        match &mut self.buffer {
            TileBuffer::Host(data) => Ok(data),
            TileBuffer::Device(_) => Err(not_host(self.location)),
        }
    }

    /// Borrow a host tile as a view of the stored block.
    pub fn view(&self) -> DistResult<TileView<'_, T>> {
        let (mb, nb, stride) = (self.mb, self.nb, self.stride);
        Ok(TileView::from_parts(self.host_data()?, mb, nb, stride))
    }

    /// Borrow a host tile as a mutable view of the stored block.
    pub fn view_mut(&mut self) -> DistResult<TileViewMut<'_, T>> {
        let (mb, nb, stride) = (self.mb, self.nb, self.stride);
        Ok(TileViewMut::from_parts(self.host_data_mut()?, mb, nb, stride))
    }

    /// Run `f` on a read view, wherever the tile lives.
    pub fn read<R>(&self, f: impl FnOnce(TileView<'_, T>) -> R) -> R {
        match &self.buffer {
            TileBuffer::Host(data) => f(TileView::from_parts(data, self.mb, self.nb, self.stride)),
            TileBuffer::Device(buffer) => {
                let data = buffer.lock();
                f(TileView::from_parts(&data, self.mb, self.nb, self.stride))
            }
        }
    }

    /// Run `f` on a mutable view, wherever the tile lives.
    pub fn write<R>(&mut self, f: impl FnOnce(TileViewMut<'_, T>) -> R) -> R {
        let (mb, nb, stride) = (self.mb, self.nb, self.stride);
        match &mut self.buffer {
            TileBuffer::Host(data) => f(TileViewMut::from_parts(data, mb, nb, stride)),
            TileBuffer::Device(buffer) => {
                let mut data = buffer.lock();
                f(TileViewMut::from_parts(&mut data, mb, nb, stride))
            }
        }
    }

    /// Copy the elements of an equally shaped instance, across locations.
    pub fn copy_from(&mut self, src: &Tile<T>) {
        src.read(|from| self.write(|mut to| to.copy_from(&from)));
        self.op = src.op;
        self.uplo = src.uplo;
    }

    /// Packed column-major payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.read(|view| {
            let packed = view.to_packed();
            bytemuck::cast_slice::<T, u8>(&packed).to_vec()
        })
    }

    /// Overwrite the elements from a packed payload.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportFailure> {
        let expected = self.payload_bytes();
        if bytes.len() != expected {
            return Err(TransportFailure::Malformed {
                expected,
                got: bytes.len(),
            });
        }
        // The payload is not guaranteed to be aligned for T.
        let packed: Vec<T> = bytes
            .chunks_exact(core::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        self.write(|mut view| view.copy_from_packed(&packed));
        Ok(())
    }
}

fn not_host(location: Location) -> DistError {
    DistError::kernel("host access", format!("tile lives on {location}"))
}

impl<T> fmt::Debug for Tile<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("mb", &self.mb)
            .field("nb", &self.nb)
            .field("stride", &self.stride)
            .field("op", &self.op)
            .field("kind", &self.kind)
            .field("location", &self.location)
            .finish()
    }
}
