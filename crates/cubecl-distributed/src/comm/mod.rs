//! Message transport between ranks.
//!
//! Ranks share nothing but a [`Communicator`]. Messages are opaque byte
//! payloads addressed by (peer, tag); a receive matches on both and leaves
//! messages with other tags queued, so for a fixed (source, tag) pair messages
//! are received in the order they were sent.

mod channel;
mod single;

pub use channel::*;
pub use single::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{DistResult, Tag};

/// Point-to-point transport used by distributed matrices.
///
/// Implementations: [`SelfComm`] (one rank) and [`ChannelComm`] (in-process
/// endpoints created by [`LocalFabric`]).
pub trait Communicator: Send + Sync {
    /// This endpoint's rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Queue a message for `dst`. Returns once the payload is in flight.
    fn send(&self, dst: usize, tag: Tag, payload: Vec<u8>) -> DistResult<()>;

    /// Block until the next message from `src` with `tag` arrives.
    fn recv(&self, src: usize, tag: Tag) -> DistResult<Vec<u8>>;

    /// Abort every rank's pending and future operations.
    fn abort(&self);

    /// Whether some rank aborted.
    fn is_aborted(&self) -> bool;

    /// Traffic of this endpoint.
    fn stats(&self) -> CommStats;
}

/// Traffic counters of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommStats {
    /// Messages sent
    pub messages_sent: usize,
    /// Messages received
    pub messages_received: usize,
    /// Payload bytes sent
    pub bytes_sent: usize,
    /// Payload bytes received
    pub bytes_received: usize,
}

#[derive(Default)]
pub(crate) struct CommCounters {
    messages_sent: AtomicUsize,
    messages_received: AtomicUsize,
    bytes_sent: AtomicUsize,
    bytes_received: AtomicUsize,
}

impl CommCounters {
    pub(crate) fn sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CommStats {
        CommStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
