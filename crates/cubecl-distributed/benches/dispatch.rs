use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use cubecl_distributed::{
    Communicator, DeviceSet, DistributedMatrix, Kernel, Op, Options, ProcessGrid, SelfComm,
    Target, TargetDispatcher, TileRef, TileTask,
};

fn matrix(n: usize, nb: usize, devices: &Arc<DeviceSet>) -> DistributedMatrix<f64> {
    let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = DistributedMatrix::new(n, n, nb, grid, comm, Arc::clone(devices)).unwrap();
    if devices.is_empty() {
        a.insert_local_tiles().unwrap();
    } else {
        a.insert_local_tiles_on_devices().unwrap();
    }
    a.fill_local(|r, c| ((r * n + c) as f64 * 0.001).sin()).unwrap();
    a
}

/// Tile tasks of C += A * B, one list per inner index so outputs never repeat
/// within a dispatch call.
fn gemm_tasks<'a>(
    a: &'a DistributedMatrix<f64>,
    b: &'a DistributedMatrix<f64>,
    c: &'a DistributedMatrix<f64>,
) -> Vec<Vec<TileTask<'a, f64>>> {
    (0..a.nt())
        .map(|k| {
            c.local_tiles()
                .map(|(i, j)| {
                    TileTask::new(
                        vec![TileRef::new(a, i, k), TileRef::new(b, k, j)],
                        vec![TileRef::new(c, i, j)],
                    )
                })
                .collect()
        })
        .collect()
}

fn bench_gemm_targets(c: &mut Criterion) {
    let kernel = Kernel::Gemm {
        alpha: 1.0,
        beta: 1.0,
        op_a: Op::NoTrans,
        op_b: Op::NoTrans,
    };
    for target in Target::ALL {
        let mut group = c.benchmark_group(format!("gemm_{target}"));
        for &n in &[64, 128, 256] {
            let devices = if target == Target::Devices {
                DeviceSet::new(2, 64 << 20).unwrap()
            } else {
                DeviceSet::host_only()
            };
            let a = matrix(n, 32, &devices);
            let b = matrix(n, 32, &devices);
            let out = matrix(n, 32, &devices);
            let dispatcher = TargetDispatcher::new(&Options::default()).unwrap();
            let steps = gemm_tasks(&a, &b, &out);
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
                bench.iter(|| {
                    for tasks in &steps {
                        let _ = dispatcher.dispatch(target, &kernel, tasks).unwrap();
                        dispatcher.synchronize().unwrap();
                    }
                });
            });
        }
        group.finish();
    }
}

fn bench_gescale_batching(c: &mut Criterion) {
    let mut group = c.benchmark_group("gescale");
    let kernel = Kernel::Gescale {
        numer: 1.0,
        denom: 1.0,
    };
    let a = matrix(512, 16, &DeviceSet::host_only());
    let tasks: Vec<_> = a
        .local_tiles()
        .map(|(i, j)| TileTask::new(vec![], vec![TileRef::new(&a, i, j)]))
        .collect();
    let dispatcher = TargetDispatcher::new(&Options::default()).unwrap();
    for target in [Target::HostTask, Target::HostNest, Target::HostBatch] {
        group.bench_with_input(BenchmarkId::from_parameter(target), &target, |bench, &target| {
            bench.iter(|| {
                let _ = dispatcher.dispatch(target, &kernel, &tasks).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gemm_targets, bench_gescale_batching);
criterion_main!(benches);
