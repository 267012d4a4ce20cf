//! Emulated accelerators.
//!
//! A device is a byte-limited [`MemoryPool`] plus an in-order [`CommandQueue`].
//! Device memory is only reachable through [`DeviceBuffer`] pointers, and
//! kernels reach it only through queued batches, so host/device traffic is
//! explicit the same way it is with real accelerators.

mod pool;
mod queue;

pub use pool::*;
pub use queue::*;

use std::sync::Arc;

use crate::error::{DistError, DistResult};

/// One device: memory plus command queue.
pub struct Device {
    pool: Arc<MemoryPool>,
    queue: CommandQueue,
}

impl Device {
    /// Device index within its set.
    pub fn id(&self) -> usize {
        self.pool.device()
    }

    /// Memory of the device.
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Command queue of the device.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

/// Devices visible to one rank.
///
/// Shared (`Arc`) by every matrix of the rank.
pub struct DeviceSet {
    devices: Vec<Device>,
}

impl DeviceSet {
    /// `count` devices of `capacity` bytes each.
    pub fn new(count: usize, capacity: usize) -> DistResult<Arc<Self>> {
        let devices = (0..count)
            .map(|id| {
                Ok(Device {
                    pool: Arc::new(MemoryPool::new(id, capacity)),
                    queue: CommandQueue::new(id)?,
                })
            })
            .collect::<DistResult<Vec<_>>>()?;
        Ok(Arc::new(Self { devices }))
    }

    /// A rank without accelerators.
    pub fn host_only() -> Arc<Self> {
        Arc::new(Self {
            devices: Vec::new(),
        })
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the rank has no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device `id`.
    pub fn device(&self, id: usize) -> DistResult<&Device> {
        self.devices
            .get(id)
            .ok_or_else(|| DistError::config(format!("no device {id} (have {})", self.len())))
    }

    /// Iterate devices.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Wait for every device queue.
    pub fn synchronize(&self) -> DistResult<()> {
        for device in &self.devices {
            device.queue.synchronize()?;
        }
        Ok(())
    }
}
