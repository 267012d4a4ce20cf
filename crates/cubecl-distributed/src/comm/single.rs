use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{CommCounters, CommStats, Communicator};
use crate::error::{DistError, DistResult, Tag, TransportFailure};

/// Communicator of a single-rank run.
///
/// Messages to rank 0 are looped back; a receive with nothing queued fails
/// immediately, since no other rank could ever send it.
#[derive(Default)]
pub struct SelfComm {
    queue: Mutex<VecDeque<(Tag, Vec<u8>)>>,
    aborted: AtomicBool,
    counters: CommCounters,
}

impl SelfComm {
    /// New single-rank communicator.
    pub fn new() -> Self {
        Self::default()
    }

    fn failure(&self, peer: usize, tag: Tag, failure: TransportFailure) -> DistError {
        DistError::Transport {
            rank: 0,
            peer,
            tag,
            failure,
        }
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dst: usize, tag: Tag, payload: Vec<u8>) -> DistResult<()> {
        if self.is_aborted() {
            return Err(self.failure(dst, tag, TransportFailure::Aborted));
        }
        if dst != 0 {
            return Err(self.failure(dst, tag, TransportFailure::InvalidPeer));
        }
        self.counters.sent(payload.len());
        self.queue
            .lock()
            .map_err(|_| DistError::Poisoned("self communicator queue"))?
            .push_back((tag, payload));
        Ok(())
    }

    fn recv(&self, src: usize, tag: Tag) -> DistResult<Vec<u8>> {
        if self.is_aborted() {
            return Err(self.failure(src, tag, TransportFailure::Aborted));
        }
        if src != 0 {
            return Err(self.failure(src, tag, TransportFailure::InvalidPeer));
        }
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| DistError::Poisoned("self communicator queue"))?;
        let position = queue
            .iter()
            .position(|(t, _)| *t == tag)
            .ok_or_else(|| self.failure(src, tag, TransportFailure::Timeout))?;
        let (_, payload) = queue
            .remove(position)
            .ok_or_else(|| self.failure(src, tag, TransportFailure::Timeout))?;
        self.counters.received(payload.len());
        Ok(payload)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn stats(&self) -> CommStats {
        self.counters.snapshot()
    }
}
