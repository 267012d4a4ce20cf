//! Sequential tile kernels.
//!
//! Every kernel works on column-major [`TileView`](crate::tile::TileView)s and
//! runs on the calling thread; parallelism and placement are decided by the
//! [`TargetDispatcher`](crate::dispatch::TargetDispatcher).

mod elementwise;
mod gemm;
mod householder;

pub use elementwise::*;
pub use gemm::*;
pub use householder::*;
