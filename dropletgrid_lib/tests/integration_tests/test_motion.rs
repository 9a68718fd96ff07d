use dropletgrid_lib::boundary::{BoundaryKind, NullBoundaryConditions, PeriodicTopBoundary};
use dropletgrid_lib::motion::{ConstantVelocity, MotionKind, advance};
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::{
    Aabb3d, CellMap, CellRef, Decomposition, DistributedDomain, GridDescription, GridShape,
    GridboxMap, LocateResult, MotionError, Real, SingleProcessComm, Superdroplet,
    SuperdropletAttributes, SuperdropletId,
};

use super::{maps_of_all_ranks, unit_description};

#[test]
fn test_hop_into_remote_partition() {
    let shape = GridShape::new_3d([2, 2, 2]).unwrap();
    let description = unit_description(shape);
    let maps = maps_of_all_ranks(&description, 2);
    let map = &maps[0];

    let start = Vector3::new(0.5, 0.5, 0.5);
    let LocateResult::LocalCell { index, .. } = map.locate(&start) else {
        panic!("start position not local to rank 0");
    };

    let owner_of = |position: &Vector3<f64>| {
        maps.iter()
            .find(|m| matches!(m.locate(position), LocateResult::LocalCell { .. }))
            .map(|m| m.my_rank())
            .unwrap()
    };

    // One gridbox along every horizontal direction, the y axis wraps around
    for target in [
        Vector3::new(0.5, 1.5, 0.5),
        Vector3::new(0.5, 0.5, 1.5),
        Vector3::new(0.5, 0.5, -0.5),
    ] {
        let (cell, position) = advance(map, CellRef::Local(index), target).unwrap();
        let owner = owner_of(&position);
        if owner == map.my_rank() {
            assert!(cell.is_local());
            assert!(map.contains(cell.local_index().unwrap(), &position));
        } else {
            assert_eq!(cell, CellRef::Remote(owner));
        }
        assert!((0.0..2.0).contains(&position.z));
    }
}

#[test]
fn test_cell_skipped_across_partitions() {
    let shape = GridShape::new_3d([4, 2, 1]).unwrap();
    let description = unit_description(shape);
    let maps = maps_of_all_ranks(&description, 2);
    let map = &maps[0];

    let LocateResult::LocalCell { index, .. } = map.locate(&Vector3::new(0.5, 0.5, 0.5)) else {
        panic!("bottom gridbox not local to rank 0");
    };

    // Two gridboxes up, staying on this rank
    assert!(matches!(
        advance(map, CellRef::Local(index), Vector3::new(2.5, 0.5, 0.5)),
        Err(MotionError::CellSkipped { .. })
    ));
    // Two gridboxes up while also crossing into the partition of rank 1
    assert!(matches!(
        advance(map, CellRef::Local(index), Vector3::new(2.5, 1.5, 0.5)),
        Err(MotionError::CellSkipped { .. })
    ));
    // A single gridbox into the partition of rank 1
    assert_eq!(
        advance(map, CellRef::Local(index), Vector3::new(0.5, 1.5, 0.5)).unwrap(),
        (CellRef::Remote(1), Vector3::new(0.5, 1.5, 0.5))
    );
}

fn real<R: Real>(value: f64) -> R {
    R::from_f64(value).unwrap()
}

fn local_index_at<R: Real>(map: &CellMap<R>, position: Vector3<f64>) -> usize {
    match map.locate(&position.map(real::<R>)) {
        LocateResult::LocalCell { index, .. } => index,
        other => panic!("position {:?} is not local: {:?}", position, other),
    }
}

fn check_horizontal_seam<R: Real>() {
    let shape = GridShape::new_3d([2, 4, 4]).unwrap();
    let domain = Aabb3d::new(Vector3::zeros(), Vector3::new(2.0, 4.0, 4.0).map(real::<R>));
    let description = GridDescription::<R>::uniform(shape, &domain).unwrap();
    let map = CellMap::build(Decomposition::build(shape, 1, 0).unwrap(), &description).unwrap();

    let corner = local_index_at(&map, Vector3::new(0.5, 3.5, 3.5));
    let origin = local_index_at(&map, Vector3::new(0.5, 0.5, 0.5));
    assert_eq!(map.global_index(corner), 30);
    assert_eq!(map.global_index(origin), 0);

    // Across the upper edges of both horizontal axes
    let (cell, position) =
        advance(&map, CellRef::Local(corner), Vector3::new(0.5, 4.25, 4.5).map(real::<R>)).unwrap();
    assert_eq!(cell, CellRef::Local(origin));
    assert_eq!(position, Vector3::new(0.5, 0.25, 0.5).map(real::<R>));

    // And back across the lower edges
    let (cell, position) =
        advance(&map, CellRef::Local(origin), Vector3::new(0.5, -0.25, -0.5).map(real::<R>)).unwrap();
    assert_eq!(cell, CellRef::Local(corner));
    assert_eq!(position, Vector3::new(0.5, 3.75, 3.5).map(real::<R>));
}

#[test]
fn test_horizontal_seam_f64() {
    check_horizontal_seam::<f64>();
}

#[test]
fn test_horizontal_seam_f32() {
    check_horizontal_seam::<f32>();
}

#[test]
fn test_finite_top_stays_unfolded() {
    let shape = GridShape::new_3d([2, 2, 2]).unwrap();
    let description = unit_description(shape);
    let maps = maps_of_all_ranks(&description, 1);
    let map = &maps[0];

    let LocateResult::LocalCell { index, .. } = map.locate(&Vector3::new(1.5, 0.5, 0.5)) else {
        panic!("top gridbox not local");
    };
    let (cell, position) = advance(map, CellRef::Local(index), Vector3::new(2.5, 0.5, 0.5)).unwrap();
    assert_eq!(cell, CellRef::OutOfDomain);
    assert_eq!(position, Vector3::new(2.5, 0.5, 0.5));
}

#[test]
fn test_step_reinserts_at_top() {
    let shape = GridShape::new_3d([3, 2, 1]).unwrap();
    let description = unit_description(shape);
    let domain = DistributedDomain::new(SingleProcessComm::new(), &description).unwrap();

    let population = vec![
        // Falls through the bottom
        Superdroplet::new(
            SuperdropletId(0),
            Vector3::new(0.5, 0.5, 0.5),
            SuperdropletAttributes {
                multiplicity: 10,
                ..Default::default()
            },
        ),
        // Stays inside
        Superdroplet::new(
            SuperdropletId(1),
            Vector3::new(2.5, 1.5, 0.5),
            SuperdropletAttributes {
                multiplicity: 20,
                ..Default::default()
            },
        ),
    ];
    let mut buffer = domain.populate(4, population).unwrap();
    assert_eq!(buffer.num_resident(), 2);

    let motion = MotionKind::ConstantVelocity(ConstantVelocity {
        velocity: Vector3::new(-0.8, 0.0, 0.0),
    });
    let boundary = BoundaryKind::PeriodicTop(PeriodicTopBoundary);
    let summary = domain.step(&motion, &boundary, &mut buffer, 1.0).unwrap();

    assert_eq!(summary.reinserted, 1);
    assert_eq!(summary.transport.resident, 2);
    assert_eq!(summary.transport.out_of_domain, 0);

    let reinserted = buffer
        .resident()
        .iter()
        .find(|d| d.id == SuperdropletId(0))
        .unwrap();
    assert!(reinserted.cell.is_local());
    assert!((reinserted.coords.x - 2.7).abs() < 1e-12);
    assert_eq!(domain.global_totals(&buffer).unwrap(), (2, 30));
}

#[test]
fn test_step_drops_without_boundary_conditions() {
    let shape = GridShape::new_3d([3, 2, 1]).unwrap();
    let description = unit_description(shape);
    let domain = DistributedDomain::new(SingleProcessComm::new(), &description).unwrap();

    let population = (0..6).map(|i| {
        Superdroplet::new(
            SuperdropletId(i),
            domain.map().center(i as usize),
            SuperdropletAttributes::default(),
        )
    });
    let mut buffer = domain.populate(6, population).unwrap();

    let motion = MotionKind::ConstantVelocity(ConstantVelocity {
        velocity: Vector3::new(1.0, 0.0, 0.0),
    });
    let boundary = BoundaryKind::Null(NullBoundaryConditions);
    let summary = domain.step(&motion, &boundary, &mut buffer, 1.0).unwrap();

    // The two superdroplets of the top layer left the domain
    assert_eq!(summary.reinserted, 0);
    assert_eq!(summary.transport.out_of_domain, 2);
    assert_eq!(buffer.num_resident(), 4);
    assert!(buffer.resident().iter().all(|d| d.cell.is_local()));
}
