use std::time::Duration;

use dropletgrid_lib::boundary::{BoundaryKind, NullBoundaryConditions};
use dropletgrid_lib::motion::{ConstantVelocity, MotionKind};
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::transport::run_transport_cycle;
use dropletgrid_lib::{
    CellRef, DistributedDomain, GridDescription, GridShape, GridboxMap, Superdroplet,
    SuperdropletAttributes, SuperdropletId, ThreadComm, ThreadCommWorld, TransportError,
};

use super::unit_description;

/// One superdroplet in the center of every gridbox with a multiplicity derived from its id
fn population(description: &GridDescription<f64>) -> Vec<Superdroplet<f64>> {
    description
        .gridboxes()
        .iter()
        .map(|gridbox| {
            let center = Vector3::from_fn(|d, _| 0.5 * (gridbox.lower[d] + gridbox.upper[d]));
            let id = gridbox.global_index as u64;
            Superdroplet::new(
                SuperdropletId(id),
                center,
                SuperdropletAttributes {
                    multiplicity: 100 + id,
                    radius: 1e-6,
                    solute_mass: 1e-18,
                },
            )
        })
        .collect()
}

fn thread_comms(size: usize) -> Vec<ThreadComm> {
    ThreadCommWorld::new(size)
        .with_timeout(Duration::from_secs(30))
        .into_comms()
}

#[test]
fn test_transport_conserves_superdroplets() {
    let shape = GridShape::new_3d([2, 4, 4]).unwrap();
    let description = unit_description(shape);
    let population = population(&description);
    let expected_count = population.len() as u64;
    let expected_multiplicity = population.iter().map(|d| d.attributes.multiplicity).sum::<u64>();

    let motion = MotionKind::ConstantVelocity(ConstantVelocity {
        velocity: Vector3::new(0.0, 0.75, -0.5),
    });
    let boundary = BoundaryKind::Null(NullBoundaryConditions);

    let results = std::thread::scope(|s| {
        let handles = thread_comms(4)
            .into_iter()
            .map(|comm| {
                let description = &description;
                let population = population.clone();
                s.spawn(move || {
                    let domain = DistributedDomain::new(comm, description).unwrap();
                    let mut buffer = domain.populate(32, population).unwrap();

                    let mut totals = Vec::new();
                    let mut received = 0;
                    for _ in 0..6 {
                        let summary = domain.step(&motion, &boundary, &mut buffer, 1.0).unwrap();
                        received += summary.transport.received;
                        assert_eq!(summary.transport.out_of_domain, 0);
                        totals.push(domain.global_totals(&buffer).unwrap());

                        for drop in buffer.resident() {
                            let index = drop.cell.local_index().expect("only local superdroplets remain");
                            assert!(domain.map().contains(index, &drop.coords));
                        }
                    }
                    (totals, received)
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let mut total_received = 0;
    for (totals, received) in results {
        total_received += received;
        for total in totals {
            assert_eq!(total, (expected_count, expected_multiplicity));
        }
    }
    assert!(total_received > 0);
}

#[test]
fn test_capacity_failure_is_collective() {
    let shape = GridShape::new_3d([2, 2, 1]).unwrap();
    let description = unit_description(shape);
    let population = population(&description);

    let errors = std::thread::scope(|s| {
        let handles = thread_comms(2)
            .into_iter()
            .map(|comm| {
                let description = &description;
                let population = population.clone();
                s.spawn(move || {
                    let domain = DistributedDomain::new(comm, description).unwrap();
                    let mut buffer = domain.populate(2, population).unwrap();
                    assert_eq!(buffer.num_resident(), 2);

                    // Rank 1 hands one superdroplet to the full rank 0
                    let rank = domain.decomposition().my_rank();
                    if rank == 1 {
                        buffer.resident_mut()[0].cell = CellRef::Remote(0);
                    }
                    run_transport_cycle(domain.comm(), domain.map(), &mut buffer).unwrap_err()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    for error in errors {
        assert_eq!(
            error,
            TransportError::CapacityExceeded {
                rank: Some(0),
                required: 3,
                capacity: 2
            }
        );
    }
}

#[test]
fn test_repeated_cycle_is_idempotent() {
    let shape = GridShape::new_3d([2, 2, 2]).unwrap();
    let description = unit_description(shape);
    let population = population(&description);

    std::thread::scope(|s| {
        for comm in thread_comms(2) {
            let description = &description;
            let population = population.clone();
            s.spawn(move || {
                let domain = DistributedDomain::new(comm, description).unwrap();
                let mut buffer = domain.populate(8, population).unwrap();
                buffer.resident_mut()[0].cell = CellRef::OutOfDomain;

                let first = run_transport_cycle(domain.comm(), domain.map(), &mut buffer).unwrap();
                assert_eq!(first.out_of_domain, 1);
                let slots = buffer.slots().to_vec();

                let second = run_transport_cycle(domain.comm(), domain.map(), &mut buffer).unwrap();
                assert_eq!(second.sent, 0);
                assert_eq!(second.received, 0);
                assert_eq!(second.out_of_domain, 0);
                assert_eq!(second.resident, first.resident);
                assert_eq!(buffer.slots(), &slots[..]);
                assert_eq!(buffer.num_local(), domain.map().num_local_cells() - 1);
            });
        }
    });
}
