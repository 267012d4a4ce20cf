//! Error types for distributed tile operations.
//!
//! Every variant is fatal to the enclosing distributed operation except
//! [`DistError::OutOfDeviceMemory`], which the caller may recover from by
//! releasing holds or lowering concurrency. Nothing here is retried internally.

use thiserror::Error;

use crate::options::Target;
use crate::tile::Location;

/// Message tag used to separate concurrently in-flight communication phases.
pub type Tag = u64;

/// Errors that can occur while managing, moving or computing on tiles.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistError {
    /// Invalid grid shape, dimensions or option value. Raised at construction.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// Description of the rejected configuration
        reason: String,
    },

    /// The directory holds no valid copy of a tile that was sent or acquired.
    #[error("Tile ({i}, {j}) has no valid copy on rank {rank}")]
    NotOwned {
        /// Global tile row
        i: usize,
        /// Global tile column
        j: usize,
        /// Rank that attempted the access
        rank: usize,
    },

    /// A write acquisition or eviction was blocked by a hold at another location.
    #[error("Tile ({i}, {j}) is on hold at {held} and cannot be invalidated for {requested}")]
    StaleCopy {
        /// Global tile row
        i: usize,
        /// Global tile column
        j: usize,
        /// Location holding the pin
        held: Location,
        /// Location that requested exclusive access
        requested: Location,
    },

    /// The kernel has no implementation for the requested execution target.
    #[error("Kernel {kernel} has no implementation for target {target}")]
    UnsupportedTarget {
        /// Kernel name
        kernel: &'static str,
        /// Requested target
        target: Target,
    },

    /// Aggregated failure of a reduction-tree collective.
    #[error("Reduction tree aborted on rank {rank} at level {level}: {source}")]
    ReductionFailure {
        /// Rank reporting the failure
        rank: usize,
        /// Tree level that was executing
        level: usize,
        /// First error observed on this rank
        source: Box<DistError>,
    },

    /// A device allocation exceeded the remaining device memory.
    #[error(
        "Out of device memory on device {device}: requested {requested} bytes, {available} available"
    )]
    OutOfDeviceMemory {
        /// Device index
        device: usize,
        /// Requested allocation in bytes
        requested: usize,
        /// Bytes still free on the device
        available: usize,
    },

    /// A single point-to-point message failed.
    #[error("Transport failure between rank {rank} and rank {peer} (tag {tag}): {failure}")]
    Transport {
        /// Local rank
        rank: usize,
        /// Remote rank
        peer: usize,
        /// Message tag
        tag: Tag,
        /// What went wrong
        failure: TransportFailure,
    },

    /// Kernel arguments are inconsistent (operand count, shapes, access modes).
    #[error("Invalid arguments for kernel {kernel}: {reason}")]
    Kernel {
        /// Kernel name
        kernel: &'static str,
        /// Description of the mismatch
        reason: String,
    },

    /// A lock was poisoned by a panicking task.
    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

/// Reason a point-to-point message could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// No message arrived within the configured timeout.
    #[error("timed out")]
    Timeout,
    /// The peer endpoint is gone.
    #[error("peer disconnected")]
    Disconnected,
    /// The collective was aborted by some rank.
    #[error("operation aborted")]
    Aborted,
    /// The payload does not match the receiving tile.
    #[error("payload of {got} bytes, expected {expected}")]
    Malformed {
        /// Expected payload size in bytes
        expected: usize,
        /// Received payload size in bytes
        got: usize,
    },
    /// The peer rank does not exist in the communicator.
    #[error("no such rank")]
    InvalidPeer,
}

impl DistError {
    /// Shorthand for a [`DistError::Configuration`] error.
    pub fn config(reason: impl Into<String>) -> Self {
        DistError::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`DistError::Kernel`] error.
    pub fn kernel(kernel: &'static str, reason: impl Into<String>) -> Self {
        DistError::Kernel {
            kernel,
            reason: reason.into(),
        }
    }

    /// Whether this error came from the transport (directly or aggregated).
    pub fn is_transport(&self) -> bool {
        match self {
            DistError::Transport { .. } => true,
            DistError::ReductionFailure { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

/// Result type for distributed tile operations.
pub type DistResult<T> = Result<T, DistError>;
