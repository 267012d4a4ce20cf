use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{CommCounters, CommStats, Communicator};
use crate::error::{DistError, DistResult, Tag, TransportFailure};
use crate::options::Options;

/// How often a blocked receive re-checks the abort flag and lets other
/// receivers of the same endpoint look at the mailbox.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

struct Envelope {
    src: usize,
    tag: Tag,
    payload: Vec<u8>,
}

struct Mailbox {
    inbox: Receiver<Envelope>,
    /// Arrived messages nobody asked for yet, in arrival order.
    stash: Vec<Envelope>,
}

impl Mailbox {
    fn take(&mut self, src: usize, tag: Tag) -> Option<Vec<u8>> {
        let position = self
            .stash
            .iter()
            .position(|env| env.src == src && env.tag == tag)?;
        Some(self.stash.remove(position).payload)
    }
}

/// In-process fabric connecting `size` ranks through channels.
///
/// # Example
///
/// ```ignore
/// use cubecl_distributed::{Communicator, LocalFabric, Options};
///
/// let endpoints = LocalFabric::with_options(2, &Options::default()).endpoints();
/// std::thread::scope(|s| {
///     for comm in endpoints {
///         s.spawn(move || comm.rank());
///     }
/// });
/// ```
pub struct LocalFabric {
    size: usize,
    timeout: Duration,
}

impl LocalFabric {
    /// Fabric of `size` ranks whose receives give up after `timeout`.
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self { size, timeout }
    }

    /// Fabric of `size` ranks using the receive timeout of `options`.
    pub fn with_options(size: usize, options: &Options) -> Self {
        Self::new(size, options.comm_timeout)
    }

    /// One endpoint per rank, in rank order. All share one abort flag.
    pub fn endpoints(self) -> Vec<ChannelComm> {
        let aborted = Arc::new(AtomicBool::new(false));
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| mpsc::channel::<Envelope>()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelComm {
                rank,
                peers: senders.clone(),
                mailbox: Mutex::new(Mailbox {
                    inbox,
                    stash: Vec::new(),
                }),
                aborted: Arc::clone(&aborted),
                timeout: self.timeout,
                counters: CommCounters::default(),
            })
            .collect()
    }
}

/// Endpoint of a [`LocalFabric`].
pub struct ChannelComm {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Mutex<Mailbox>,
    aborted: Arc<AtomicBool>,
    timeout: Duration,
    counters: CommCounters,
}

impl ChannelComm {
    fn failure(&self, peer: usize, tag: Tag, failure: TransportFailure) -> DistError {
        DistError::Transport {
            rank: self.rank,
            peer,
            tag,
            failure,
        }
    }

    /// Receive timeout of this endpoint.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dst: usize, tag: Tag, payload: Vec<u8>) -> DistResult<()> {
        if self.is_aborted() {
            return Err(self.failure(dst, tag, TransportFailure::Aborted));
        }
        let peer = self
            .peers
            .get(dst)
            .ok_or_else(|| self.failure(dst, tag, TransportFailure::InvalidPeer))?;
        let bytes = payload.len();
        peer.send(Envelope {
            src: self.rank,
            tag,
            payload,
        })
        .map_err(|_| self.failure(dst, tag, TransportFailure::Disconnected))?;
        self.counters.sent(bytes);
        tracing::trace!(rank = self.rank, dst, tag, bytes, "send");
        Ok(())
    }

    fn recv(&self, src: usize, tag: Tag) -> DistResult<Vec<u8>> {
        if src >= self.size() {
            return Err(self.failure(src, tag, TransportFailure::InvalidPeer));
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.is_aborted() {
                return Err(self.failure(src, tag, TransportFailure::Aborted));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.failure(src, tag, TransportFailure::Timeout));
            }

            // Hold the mailbox for one poll only, so concurrent receivers on
            // this endpoint can pick their messages out of the stash.
            let mut mailbox = self
                .mailbox
                .lock()
                .map_err(|_| DistError::Poisoned("channel mailbox"))?;
            if let Some(payload) = mailbox.take(src, tag) {
                self.counters.received(payload.len());
                tracing::trace!(rank = self.rank, src, tag, bytes = payload.len(), "recv");
                return Ok(payload);
            }
            match mailbox.inbox.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(envelope) => mailbox.stash.push(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.failure(src, tag, TransportFailure::Disconnected));
                }
            }
        }
    }

    fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            tracing::warn!(rank = self.rank, "aborting fabric");
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn stats(&self) -> CommStats {
        self.counters.snapshot()
    }
}
