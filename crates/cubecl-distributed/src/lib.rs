//! # CubeCL Distributed
//!
//! Runtime layer for tiled dense linear algebra over many ranks and devices.
//!
//! ## Features
//!
//! - **Coherency**: per-tile MOSI directory across host and device copies,
//!   with holds, workspace lifetimes and on-demand copies
//! - **Distribution**: block-cyclic matrices on a process grid, tile
//!   send/receive/broadcast, ScaLAPACK descriptors
//! - **Dispatch**: one kernel call over many tiles on the host task pool, a
//!   nested loop, batched host calls or device queues
//! - **Reduction trees**: application of a tree-reduced panel factorization to
//!   a trailing block with at most `ceil(log2(ranks))` exchange rounds
//!
//! ## Example
//!
//! ```ignore
//! use cubecl_distributed::{ttmqr, Op, Options, Side, Target};
//!
//! // Every rank calls this with its own handles of the same matrices.
//! let options = Options::default().with_target(Target::HostTask);
//! ttmqr(Side::Left, Op::Trans, &v, &t, &c, tag, &options)?;
//! ```

mod error;
mod options;
mod scalar;
mod types;

/// Tile coherency directory
pub mod coherency;

/// Rank-to-rank transport
pub mod comm;

/// Emulated devices
pub mod device;

/// Multi-target kernel dispatch
pub mod dispatch;

/// Tile kernels
pub mod kernels;

/// Distributed matrices
pub mod matrix;

/// Reduction-tree updates
pub mod reduction;

/// Tiles and tile views
pub mod tile;

/// Tests for distributed operations
#[cfg(any(test, feature = "export_tests"))]
pub mod tests;

// Re-export public API
pub use error::*;
pub use options::*;
pub use scalar::*;
pub use types::*;

// Re-export key components
pub use comm::{ChannelComm, CommStats, Communicator, LocalFabric, SelfComm};
pub use device::DeviceSet;
pub use dispatch::{Completion, Kernel, KernelKind, TargetDispatcher, TileRef, TileTask};
pub use matrix::{DistributedMatrix, GridOrder, ProcessGrid};
pub use reduction::*;
pub use tile::Location;
