//! Point-to-point tile transfers.

use std::collections::BTreeSet;

use super::DistributedMatrix;
use crate::error::{DistError, DistResult, Tag};
use crate::scalar::Scalar;
use crate::tile::Location;
use crate::types::Layout;

impl<T: Scalar> DistributedMatrix<T> {
    /// Send tile (i, j) to rank `dst`.
    ///
    /// The payload is taken from the host instance, copied in from a device if
    /// needed. A tile without a valid copy on this rank is [`DistError::NotOwned`].
    /// Sending to oneself does nothing.
    #[tracing::instrument(level = "trace", skip(self), fields(rank = self.rank()))]
    pub fn tile_send(&self, i: usize, j: usize, dst: usize, tag: Tag) -> DistResult<()> {
        if dst == self.rank() {
            return Ok(());
        }
        let payload = {
            let tile = self.tile_get_for_reading(i, j, Location::Host)?;
            tile.to_bytes()
        };
        self.comm().send(dst, tag, payload)
    }

    /// Receive tile (i, j) from rank `src` into host memory.
    ///
    /// The host instance becomes shared and every other location invalid. When
    /// the tile is not local the copy is a workspace tile good for `life` uses.
    /// Receiving from oneself does nothing.
    #[tracing::instrument(level = "trace", skip(self), fields(rank = self.rank()))]
    pub fn tile_recv(
        &self,
        i: usize,
        j: usize,
        src: usize,
        layout: Layout,
        tag: Tag,
        life: usize,
    ) -> DistResult<()> {
        let rank = self.rank();
        if src == rank {
            return Ok(());
        }
        match layout {
            Layout::ColMajor => {}
        }
        let payload = self.comm().recv(src, tag)?;
        let (mb, nb) = (self.tile_mb(i), self.tile_nb(j));
        let (gi, gj) = self.global_index(i, j);
        self.storage.directory.store_host(gi, gj, mb, nb, life, |tile| {
            tile.copy_from_bytes(&payload)
                .map_err(|failure| DistError::Transport {
                    rank,
                    peer: src,
                    tag,
                    failure,
                })
        })
    }

    /// Broadcast tile (i, j) from its owner to `dst_ranks`.
    ///
    /// Every rank involved calls this with the same arguments except `life`,
    /// which applies to the receiving rank's workspace copy.
    #[tracing::instrument(level = "trace", skip(self, dst_ranks), fields(rank = self.rank()))]
    pub fn tile_bcast(
        &self,
        i: usize,
        j: usize,
        dst_ranks: &BTreeSet<usize>,
        tag: Tag,
        life: usize,
    ) -> DistResult<()> {
        let (owner, rank) = (self.tile_rank(i, j), self.rank());
        if owner == rank {
            for &dst in dst_ranks.iter().filter(|dst| **dst != rank) {
                self.tile_send(i, j, dst, tag)?;
            }
        } else if dst_ranks.contains(&rank) {
            self.tile_recv(i, j, owner, Layout::ColMajor, tag, life)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coherency::Mosi;
    use crate::comm::{ChannelComm, Communicator, LocalFabric};
    use crate::device::DeviceSet;
    use crate::error::TransportFailure;
    use crate::matrix::ProcessGrid;
    use std::sync::Arc;
    use std::time::Duration;

    fn matrices(p: usize, q: usize) -> Vec<DistributedMatrix<f64>> {
        let grid = ProcessGrid::new(p, q).unwrap();
        LocalFabric::new(p * q, Duration::from_secs(5))
            .endpoints()
            .into_iter()
            .map(|comm: ChannelComm| {
                let a = DistributedMatrix::new(
                    8,
                    8,
                    4,
                    grid,
                    Arc::new(comm) as Arc<dyn Communicator>,
                    DeviceSet::host_only(),
                )
                .unwrap();
                a.insert_local_tiles().unwrap();
                a.fill_local(|r, c| (r * 8 + c) as f64).unwrap();
                a
            })
            .collect()
    }

    #[test]
    fn test_send_recv_workspace_tile() {
        let mats = matrices(2, 1);
        std::thread::scope(|s| {
            s.spawn(|| mats[1].tile_send(1, 0, 0, 5).unwrap());
            s.spawn(|| {
                let a = &mats[0];
                a.tile_recv(1, 0, 1, Layout::ColMajor, 5, 2).unwrap();
                assert_eq!(a.tile_life(1, 0).unwrap(), 2);
                assert_eq!(a.tile_state(1, 0, Location::Host).unwrap().mosi, Mosi::Shared);
                assert_eq!(a.tile_to_vec(1, 0).unwrap()[0], 32.0);
                a.tile_tick(1, 0).unwrap();
                a.tile_tick(1, 0).unwrap();
                assert!(!a.tile_state(1, 0, Location::Host).unwrap().is_valid());
            });
        });
    }

    #[test]
    fn test_send_without_copy_is_not_owned() {
        let mats = matrices(2, 1);
        let err = mats[0].tile_send(1, 0, 1, 0).unwrap_err();
        assert!(matches!(err, DistError::NotOwned { i: 1, j: 0, rank: 0 }));
        // Self transfers are no-ops.
        mats[0].tile_send(0, 0, 0, 0).unwrap();
        mats[0].tile_recv(0, 0, 0, Layout::ColMajor, 0, 1).unwrap();
        assert_eq!(mats[0].comm().stats().messages_sent, 0);
    }

    #[test]
    fn test_bcast_to_row() {
        let mats = matrices(1, 3);
        let dsts: BTreeSet<usize> = [1, 2].into_iter().collect();
        std::thread::scope(|s| {
            for a in &mats {
                let dsts = &dsts;
                s.spawn(move || {
                    a.tile_bcast(0, 0, dsts, 9, 1).unwrap();
                    assert_eq!(a.tile_to_vec(0, 0).unwrap()[1], 8.0);
                });
            }
        });
        assert_eq!(mats[0].comm().stats().messages_sent, 2);
    }

    #[test]
    fn test_malformed_payload() {
        let mats = matrices(2, 1);
        mats[1].comm().send(0, 3, vec![0u8; 7]).unwrap();
        let err = mats[0]
            .tile_recv(1, 0, 1, Layout::ColMajor, 3, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            DistError::Transport {
                failure: TransportFailure::Malformed { expected: 128, got: 7 },
                ..
            }
        ));
    }
}
