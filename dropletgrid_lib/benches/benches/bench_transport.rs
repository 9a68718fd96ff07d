use criterion::{Criterion, SamplingMode, criterion_group};
use dropletgrid_lib::boundary::{BoundaryKind, PeriodicTopBoundary};
use dropletgrid_lib::motion::{ConstantVelocity, MotionKind};
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::{
    Aabb3d, DistributedDomain, DomainParameters, GridShape, GridboxMap, Superdroplet,
    SuperdropletAttributes, SuperdropletId, ThreadCommWorld,
};
use std::time::Duration;

const DROPS_PER_GRIDBOX: usize = 64;
const NUM_STEPS: usize = 10;

fn parameters() -> DomainParameters<f64> {
    DomainParameters {
        shape: GridShape::new_3d([16, 32, 32]).unwrap(),
        domain: Aabb3d::new(Vector3::zeros(), Vector3::new(1600.0, 3200.0, 3200.0)),
        capacity: 4 * 16 * 32 * 32 * DROPS_PER_GRIDBOX,
    }
}

/// Runs `NUM_STEPS` steps on `process_count` ranks, each rank on its own thread
fn run_steps(parameters: &DomainParameters<f64>, process_count: usize) {
    let motion = MotionKind::ConstantVelocity(ConstantVelocity {
        velocity: Vector3::new(-30.0, 45.0, 20.0),
    });
    let boundary = BoundaryKind::PeriodicTop(PeriodicTopBoundary);

    std::thread::scope(|s| {
        for comm in ThreadCommWorld::new(process_count).into_comms() {
            s.spawn(move || {
                let domain = DistributedDomain::from_parameters(comm, parameters).unwrap();
                let map = domain.map();
                let population = (0..map.num_local_cells()).flat_map(|index| {
                    let center = map.center(index);
                    let global = map.global_index(index);
                    (0..DROPS_PER_GRIDBOX).map(move |n| {
                        Superdroplet::new(
                            SuperdropletId((global * DROPS_PER_GRIDBOX + n) as u64),
                            center,
                            SuperdropletAttributes {
                                multiplicity: 1_000_000,
                                radius: 1e-6,
                                solute_mass: 1e-18,
                            },
                        )
                    })
                });
                let mut buffer = domain
                    .populate(parameters.capacity / process_count, population)
                    .unwrap();
                for _ in 0..NUM_STEPS {
                    domain.step(&motion, &boundary, &mut buffer, 1.0).unwrap();
                }
            });
        }
    });
}

pub fn transport_steps(c: &mut Criterion) {
    let parameters = parameters();

    let mut group = c.benchmark_group("transport");
    group.sample_size(10);
    group.sampling_mode(SamplingMode::Flat);
    group.warm_up_time(Duration::from_secs(5));
    group.measurement_time(Duration::from_secs(30));

    for process_count in [1, 4, 8] {
        group.bench_function(format!("steps_{}_p{}", NUM_STEPS, process_count), |b| {
            b.iter(|| run_steps(&parameters, process_count))
        });
    }

    group.finish();
}

criterion_group!(bench_transport, transport_steps);
