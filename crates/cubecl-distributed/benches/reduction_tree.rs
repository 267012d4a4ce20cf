use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use cubecl_distributed::{
    ttmqr, Communicator, DeviceSet, DistributedMatrix, LocalFabric, Op, Options, ProcessGrid,
    Side, Target,
};

/// V, T and C of one rank: a `ranks*nb × nb` panel and a `ranks*nb × cols` block.
fn operands(comm: Arc<dyn Communicator>, nb: usize, cols: usize) -> [DistributedMatrix<f64>; 3] {
    let m = comm.size() * nb;
    let grid = ProcessGrid::new(comm.size(), 1).unwrap();
    let devices = DeviceSet::host_only();
    let build = |n: usize| {
        let a = DistributedMatrix::new(m, n, nb, grid, comm.clone(), devices.clone()).unwrap();
        a.insert_local_tiles().unwrap();
        a.fill_local(|r, c| ((r * 31 + c * 7) as f64 * 0.01).sin() * 0.1).unwrap();
        a
    };
    [build(nb), build(nb), build(cols)]
}

fn bench_ttmqr(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttmqr");
    group.sample_size(10);
    let (nb, cols) = (64, 512);
    for &ranks in &[2, 4, 8] {
        for target in [Target::HostTask, Target::HostNest] {
            let options = Options {
                inner_blocking: 16,
                ..Options::default()
            }
            .with_target(target);
            let id = BenchmarkId::new(target.to_string(), ranks);
            group.bench_with_input(id, &ranks, |bench, &ranks| {
                bench.iter(|| {
                    let endpoints = LocalFabric::with_options(ranks, &options).endpoints();
                    std::thread::scope(|s| {
                        for comm in endpoints {
                            let options = &options;
                            s.spawn(move || {
                                let [v, t, c] = operands(Arc::new(comm), nb, cols);
                                ttmqr(Side::Left, Op::Trans, &v, &t, &c, 1, options).unwrap();
                            });
                        }
                    });
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_ttmqr);
criterion_main!(benches);
