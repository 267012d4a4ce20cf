//! Element-wise kernels dispatched on every target, in single precision.

use crate::types::Uplo;

/// `B = alpha A + beta B` on the `uplo` part of every diagonal tile of
/// square `n × n` matrices cut in `nb` tiles; the rest of `B` is kept.
pub fn cpu_diag_tzadd(
    uplo: Uplo,
    alpha: f32,
    a: &[f32],
    beta: f32,
    b: &[f32],
    n: usize,
    nb: usize,
) -> Vec<f32> {
    let mut out = b.to_vec();
    for j in 0..n {
        for i in 0..n {
            let inside = match uplo {
                Uplo::General => true,
                Uplo::Upper => i <= j,
                Uplo::Lower => i >= j,
            };
            if i / nb == j / nb && inside {
                out[i + j * n] = alpha * a[i + j * n] + beta * b[i + j * n];
            }
        }
    }
    out
}

/// `A * (numer / denom)`, element by element.
pub fn cpu_gescale(numer: f32, denom: f32, a: &[f32]) -> Vec<f32> {
    a.iter().map(|x| *x * numer / denom).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use crate::comm::{Communicator, SelfComm};
    use crate::device::DeviceSet;
    use crate::dispatch::{Completion, Kernel, TargetDispatcher, TileRef, TileTask};
    use crate::matrix::{DistributedMatrix, ProcessGrid};
    use crate::options::{Options, Target};
    use crate::tests::reference::dense_tile;

    fn dense(n: usize, f: impl Fn(usize, usize) -> f32) -> Vec<f32> {
        let mut out = vec![0.0; n * n];
        for j in 0..n {
            for i in 0..n {
                out[i + j * n] = f(i, j);
            }
        }
        out
    }

    fn matrix(
        n: usize,
        nb: usize,
        devices: &Arc<DeviceSet>,
        values: &[f32],
    ) -> DistributedMatrix<f32> {
        let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
        let grid = ProcessGrid::new(1, 1).unwrap();
        let a = DistributedMatrix::new(n, n, nb, grid, comm, Arc::clone(devices)).unwrap();
        a.insert_local_tiles_on_devices().unwrap();
        a.fill_local(|r, c| values[r + c * n]).unwrap();
        a
    }

    fn assert_matches(a: &DistributedMatrix<f32>, expected: &[f32]) {
        let (n, nb) = (a.m(), a.nb());
        for (i, j) in a.local_tiles() {
            let got = a.tile_to_vec(i, j).unwrap();
            for (x, y) in got.iter().zip(&dense_tile(expected, n, n, nb, i, j)) {
                assert_relative_eq!(*x, *y, epsilon = 1e-6);
            }
            assert!(a.tile_is_coherent(i, j).unwrap());
        }
    }

    #[test]
    fn test_targets_agree_on_diagonal_tzadd() {
        let (n, nb) = (10, 4);
        let a0 = dense(n, |i, j| (i * n + j) as f32 * 0.25);
        let b0 = dense(n, |i, j| (i + 2 * j) as f32);
        let expected = cpu_diag_tzadd(Uplo::Lower, 2.0, &a0, -0.5, &b0, n, nb);

        for target in Target::ALL {
            let devices = DeviceSet::new(2, 1 << 20).unwrap();
            let a = matrix(n, nb, &devices, &a0);
            let b = matrix(n, nb, &devices, &b0);
            let dispatcher = TargetDispatcher::new(&Options::default()).unwrap();
            let kernel = Kernel::Tzadd {
                uplo: Uplo::Lower,
                alpha: 2.0,
                beta: -0.5,
            };
            let tasks: Vec<_> = (0..a.mt())
                .map(|k| TileTask::new(vec![TileRef::new(&a, k, k)], vec![TileRef::new(&b, k, k)]))
                .collect();
            let done = dispatcher.dispatch(target, &kernel, &tasks).unwrap();
            assert_eq!(done == Completion::Pending, target == Target::Devices);
            dispatcher.synchronize().unwrap();
            assert_matches(&b, &expected);
            assert_eq!(dispatcher.stats().tasks, 3, "{target}");
        }
    }

    #[test]
    fn test_device_groups_by_device_and_shape() {
        // Tile columns alternate between the two devices; 10 = 4 + 4 + 2 gives
        // four shapes on device 0 (columns 0 and 2) and two on device 1.
        let (n, nb) = (10, 4);
        let a0 = dense(n, |i, j| (i + j) as f32);
        let devices = DeviceSet::new(2, 1 << 20).unwrap();
        let a = matrix(n, nb, &devices, &a0);
        let dispatcher = TargetDispatcher::new(&Options::default()).unwrap();
        let kernel = Kernel::Gescale {
            numer: 3.0,
            denom: 4.0,
        };
        let tasks: Vec<_> = a
            .local_tiles()
            .map(|(i, j)| TileTask::new(vec![], vec![TileRef::new(&a, i, j)]))
            .collect();
        assert_eq!(
            dispatcher.dispatch(Target::Devices, &kernel, &tasks).unwrap(),
            Completion::Pending
        );
        assert_eq!(dispatcher.stats().device_batch_launches, 6);
        assert_eq!(devices.device(0).unwrap().queue().launches(), 4);
        assert_eq!(devices.device(1).unwrap().queue().launches(), 2);

        dispatcher.synchronize().unwrap();
        assert_matches(&a, &cpu_gescale(3.0, 4.0, &a0));
    }

    #[test]
    fn test_device_kernel_error_surfaces_on_synchronize() {
        let (n, nb) = (8, 4);
        let devices = DeviceSet::new(1, 1 << 20).unwrap();
        let a = matrix(n, nb, &devices, &dense(n, |_, _| 1.0));
        let dispatcher = TargetDispatcher::new(&Options::default()).unwrap();
        let kernel = Kernel::Gescale {
            numer: 1.0,
            denom: 0.0,
        };
        let tasks = [TileTask::new(vec![], vec![TileRef::new(&a, 0, 0)])];
        let _ = dispatcher.dispatch(Target::Devices, &kernel, &tasks).unwrap();
        let err = dispatcher.synchronize().unwrap_err();
        assert!(matches!(err, crate::error::DistError::Kernel { kernel: "gescale", .. }));
        // The hold was released even though the batch failed.
        assert!(a.tile_get_for_writing(0, 0, crate::tile::Location::Host).is_ok());
    }
}
