//! Device execution: tasks are grouped by (device, shape) and each group is
//! enqueued as one batch on its device queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::kernel::Kernel;
use super::TileTask;
use crate::coherency::Access;
use crate::device::{DeviceBuffer, DeviceSet};
use crate::error::{DistError, DistResult};
use crate::matrix::DistributedMatrix;
use crate::scalar::Scalar;
use crate::tile::{Location, TileView, TileViewMut};
use crate::types::Op;

/// Deferred work run by [`TargetDispatcher::synchronize`](super::TargetDispatcher::synchronize).
pub(crate) type Release = Box<dyn FnOnce() -> DistResult<()> + Send>;

struct DeviceOperand<T> {
    buffer: DeviceBuffer<T>,
    mb: usize,
    nb: usize,
    op: Op,
}

struct DeviceTask<T> {
    reads: Vec<DeviceOperand<T>>,
    writes: Vec<DeviceOperand<T>>,
}

/// Tasks sharing a device and operand shapes.
struct DeviceBatch<T> {
    kernel: Kernel<T>,
    tasks: Vec<DeviceTask<T>>,
}

impl<T: Scalar> DeviceBatch<T> {
    fn run(self) -> DistResult<()> {
        for task in &self.tasks {
            // Read operands are staged one at a time; only the outputs stay locked.
            let staged: Vec<Vec<T>> = task
                .reads
                .iter()
                .map(|op| op.buffer.lock().clone())
                .collect();
            let reads: Vec<_> = staged
                .iter()
                .zip(&task.reads)
                .map(|(data, op)| (TileView::from_parts(data, op.mb, op.nb, op.mb.max(1)), op.op))
                .collect();
            let mut guards: Vec<_> = task.writes.iter().map(|op| op.buffer.lock()).collect();
            let mut writes: Vec<_> = guards
                .iter_mut()
                .zip(&task.writes)
                .map(|(data, op)| {
                    (
                        TileViewMut::from_parts(data.as_mut_slice(), op.mb, op.nb, op.mb.max(1)),
                        op.op,
                    )
                })
                .collect();
            self.kernel.apply(&reads, &mut writes)?;
        }
        Ok(())
    }
}

/// Hold one operand on `device` and describe its buffer.
///
/// The release of the hold is queued even if describing the buffer fails.
fn hold<T: Scalar>(
    matrix: &DistributedMatrix<T>,
    (i, j): (usize, usize),
    device: usize,
    access: Access,
    releases: &mut Vec<Release>,
) -> DistResult<DeviceOperand<T>> {
    let location = Location::Device(device);
    matrix.tile_acquire_and_hold(i, j, location, access)?;
    let owner = matrix.clone();
    releases.push(Box::new(move || owner.tile_release(i, j, location)));

    let op = matrix.tile_get_for_reading(i, j, location)?.op();
    let (buffer, mb, nb) = matrix.tile_device_buffer(i, j, device)?;
    Ok(DeviceOperand { buffer, mb, nb, op })
}

/// Enqueue the tasks as per-(device, shape) batches.
///
/// Holds taken on operands are appended to `releases`; the device sets whose
/// queues were used are appended to `devices`. Returns the number of batches.
pub(crate) fn launch<T: Scalar>(
    kernel: &Kernel<T>,
    tasks: &[TileTask<'_, T>],
    releases: &mut Vec<Release>,
    devices: &mut Vec<Arc<DeviceSet>>,
) -> DistResult<usize> {
    let mut groups: BTreeMap<(usize, Vec<(usize, usize)>), Vec<&TileTask<'_, T>>> = BTreeMap::new();
    for task in tasks {
        let first = &task.writes[0];
        let device = first.matrix.tile_device(first.i, first.j).ok_or_else(|| {
            DistError::config(format!(
                "target Devices needs devices on rank {}",
                first.matrix.rank()
            ))
        })?;
        groups.entry((device, task.shape())).or_default().push(task);
    }

    let mut launched = 0;
    for ((device, shape), group) in groups {
        let mut batch = DeviceBatch {
            kernel: *kernel,
            tasks: Vec::with_capacity(group.len()),
        };
        let set = Arc::clone(group[0].writes[0].matrix.devices());
        for task in &group {
            let reads = task
                .reads
                .iter()
                .map(|tile| hold(tile.matrix, (tile.i, tile.j), device, Access::Read, releases))
                .collect::<DistResult<Vec<_>>>()?;
            let writes = task
                .writes
                .iter()
                .map(|tile| hold(tile.matrix, (tile.i, tile.j), device, Access::Write, releases))
                .collect::<DistResult<Vec<_>>>()?;
            batch.tasks.push(DeviceTask { reads, writes });
        }

        tracing::trace!(
            kernel = kernel.name(),
            device,
            ?shape,
            count = group.len(),
            "device batch"
        );
        set.device(device)?.queue().enqueue(Box::new(move || batch.run()))?;
        if !devices.iter().any(|known| Arc::ptr_eq(known, &set)) {
            devices.push(set);
        }
        launched += 1;
    }
    Ok(launched)
}
