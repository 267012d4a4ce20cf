//! Byte-accounted device memory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DistError, DistResult};
use crate::scalar::Scalar;

/// Fixed-capacity memory of one device.
///
/// The pool only accounts bytes; allocations never trigger eviction. When a
/// request does not fit, the caller gets [`DistError::OutOfDeviceMemory`] and
/// must release holds itself.
#[derive(Debug)]
pub struct MemoryPool {
    device: usize,
    capacity: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
}

/// Usage snapshot of a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    /// Total bytes of the device
    pub capacity: usize,
    /// Bytes currently allocated
    pub used: usize,
    /// High-water mark
    pub peak: usize,
}

impl MemoryPool {
    /// Create a pool of `capacity` bytes for device `device`.
    pub fn new(device: usize, capacity: usize) -> Self {
        Self {
            device,
            capacity,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Device index.
    pub fn device(&self) -> usize {
        self.device
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.capacity
            .saturating_sub(self.used.load(Ordering::Acquire))
    }

    /// Current usage.
    pub fn usage(&self) -> PoolUsage {
        PoolUsage {
            capacity: self.capacity,
            used: self.used.load(Ordering::Acquire),
            peak: self.peak.load(Ordering::Acquire),
        }
    }

    fn reserve(&self, bytes: usize) -> DistResult<()> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.capacity {
                return Err(DistError::OutOfDeviceMemory {
                    device: self.device,
                    requested: bytes,
                    available: self.capacity.saturating_sub(current),
                });
            }
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::AcqRel);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn free(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Allocate a zeroed buffer of `len` elements charged against this pool.
    pub fn allocate<T: Scalar>(self: &Arc<Self>, len: usize) -> DistResult<DeviceBuffer<T>> {
        let bytes = len * core::mem::size_of::<T>();
        self.reserve(bytes)?;
        Ok(DeviceBuffer {
            inner: Arc::new(DeviceAllocation {
                data: Mutex::new(vec![T::zero(); len]),
                bytes,
                pool: Arc::clone(self),
            }),
        })
    }
}

struct DeviceAllocation<T> {
    data: Mutex<Vec<T>>,
    bytes: usize,
    pool: Arc<MemoryPool>,
}

impl<T> Drop for DeviceAllocation<T> {
    fn drop(&mut self) {
        self.pool.free(self.bytes);
    }
}

/// Reference-counted device allocation.
///
/// Cloning yields another pointer to the same memory, which is how batched
/// launches receive their operands. The bytes return to the pool when the last
/// pointer is dropped.
pub struct DeviceBuffer<T> {
    inner: Arc<DeviceAllocation<T>>,
}

impl<T> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> core::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.inner.pool.device)
            .field("bytes", &self.inner.bytes)
            .finish()
    }
}

impl<T> DeviceBuffer<T> {
    /// Device owning the allocation.
    pub fn device(&self) -> usize {
        self.inner.pool.device
    }

    /// Size in bytes.
    pub fn bytes(&self) -> usize {
        self.inner.bytes
    }

    /// Lock the device memory for host-side emulation of a copy or kernel.
    pub fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        // Poisoning only records that a kernel panicked; the bytes are still there.
        self.inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether two pointers alias the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_accounting() {
        let pool = Arc::new(MemoryPool::new(0, 1024));
        let a = pool.allocate::<f64>(64).unwrap();
        assert_eq!(pool.usage().used, 512);
        let b = a.clone();
        drop(a);
        assert_eq!(pool.usage().used, 512);
        drop(b);
        assert_eq!(pool.usage().used, 0);
        assert_eq!(pool.usage().peak, 512);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = Arc::new(MemoryPool::new(3, 100));
        let _held = pool.allocate::<f32>(20).unwrap();
        let err = pool.allocate::<f32>(10).unwrap_err();
        assert_eq!(
            err,
            DistError::OutOfDeviceMemory {
                device: 3,
                requested: 40,
                available: 20,
            }
        );
    }
}
