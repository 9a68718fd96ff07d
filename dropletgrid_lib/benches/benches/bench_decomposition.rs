use criterion::{Criterion, criterion_group};
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::{Aabb3d, CellMap, Decomposition, GridDescription, GridShape, GridboxMap};
use std::hint::black_box;
use std::time::Duration;

fn description(ndims: [usize; 3]) -> GridDescription<f64> {
    let shape = GridShape::new_3d(ndims).unwrap();
    let domain = Aabb3d::new(Vector3::zeros(), Vector3::new(1500.0, 3000.0, 3000.0));
    GridDescription::uniform(shape, &domain).unwrap()
}

pub fn decomposition_build(c: &mut Criterion) {
    let shape = GridShape::new_3d([60, 120, 120]).unwrap();

    let mut group = c.benchmark_group("decomposition");
    group.sample_size(50);
    group.warm_up_time(Duration::from_secs(3));
    group.measurement_time(Duration::from_secs(10));

    for process_count in [16, 60, 128] {
        group.bench_function(format!("build_p{}", process_count), |b| {
            b.iter(|| Decomposition::build(shape, black_box(process_count), 0).unwrap())
        });
    }

    group.finish();
}

pub fn cell_map_build(c: &mut Criterion) {
    let description = description([60, 120, 120]);

    let mut group = c.benchmark_group("cell_map");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(3));
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("build_p16_rank5", |b| {
        b.iter(|| {
            let decomposition = Decomposition::build(*description.shape(), 16, 5).unwrap();
            CellMap::build(decomposition, &description).unwrap()
        })
    });

    group.finish();
}

pub fn cell_map_locate(c: &mut Criterion) {
    let description = description([60, 120, 120]);
    let decomposition = Decomposition::build(*description.shape(), 16, 5).unwrap();
    let map = CellMap::build(decomposition, &description).unwrap();

    let positions = (0..10_000)
        .map(|i| {
            let t = i as f64 / 10_000.0;
            Vector3::new(1500.0 * t, 3000.0 * (1.0 - t), 6000.0 * t - 1500.0)
        })
        .collect::<Vec<_>>();

    let mut group = c.benchmark_group("cell_map");
    group.sample_size(100);
    group.warm_up_time(Duration::from_secs(3));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("locate_10k", |b| {
        b.iter(|| {
            positions
                .iter()
                .map(|p| map.locate(black_box(p)))
                .filter(|r| matches!(r, dropletgrid_lib::LocateResult::LocalCell { .. }))
                .count()
        })
    });

    group.finish();
}

criterion_group!(
    bench_decomposition,
    decomposition_build,
    cell_map_build,
    cell_map_locate
);
