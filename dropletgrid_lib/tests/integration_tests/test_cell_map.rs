use all_asserts::assert_range;
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::topology::{Axis, DirectedAxis, Direction};
use dropletgrid_lib::{
    Aabb3d, BoundaryMode, CellMap, CellRef, Decomposition, GridDescription, GridShape, GridboxMap,
    LocateResult, SpatialDims,
};

use super::{maps_of_all_ranks, unit_description};

/// Global coordinates of the face neighbor of a gridbox, `None` if it lies outside of a finite boundary
fn adjacent_coords(shape: &GridShape, kij: [usize; 3], direction: DirectedAxis) -> Option<[usize; 3]> {
    let d = direction.axis.dim();
    let n = shape.ndims()[d];
    let mut adjacent = kij;
    if direction.direction.is_positive() {
        if kij[d] + 1 < n {
            adjacent[d] += 1;
        } else if shape.boundary(direction.axis).is_periodic() {
            adjacent[d] = 0;
        } else {
            return None;
        }
    } else if kij[d] > 0 {
        adjacent[d] -= 1;
    } else if shape.boundary(direction.axis).is_periodic() {
        adjacent[d] = n - 1;
    } else {
        return None;
    }
    Some(adjacent)
}

#[test]
fn test_neighbors_match_global_grid() {
    let shape = GridShape::new_3d([4, 6, 3]).unwrap();
    let description = unit_description(shape);

    for map in maps_of_all_ranks(&description, 6) {
        let decomposition = map.decomposition();
        for index in 0..map.num_local_cells() {
            let kij = shape.unflatten(map.global_index(index));
            for &direction in DirectedAxis::all_possible() {
                let neighbor = map.neighbor(index, direction);
                match adjacent_coords(&shape, kij, direction) {
                    None => assert_eq!(neighbor, CellRef::OutOfDomain),
                    Some(adjacent) => {
                        let owner = decomposition.rank_owning_cell(&adjacent);
                        match neighbor {
                            CellRef::Local(j) => {
                                assert_eq!(owner, map.my_rank());
                                assert_eq!(map.global_index(j), shape.flatten(&adjacent));
                            }
                            CellRef::Remote(rank) => {
                                assert_ne!(rank, map.my_rank());
                                assert_eq!(rank, owner);
                            }
                            CellRef::OutOfDomain => panic!("missing neighbor of gridbox {:?}", kij),
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn test_locate_agrees_between_ranks() {
    let shape = GridShape::new_3d([3, 4, 4]).unwrap();
    let description = unit_description(shape);
    let maps = maps_of_all_ranks(&description, 4);

    for owner in &maps {
        for index in 0..owner.num_local_cells() {
            let center = owner.center(index);
            for map in &maps {
                match map.locate(&center) {
                    LocateResult::LocalCell { index: i, position } => {
                        assert_eq!(map.my_rank(), owner.my_rank());
                        assert_eq!(i, index);
                        assert_eq!(position, center);
                        assert!(map.contains(i, &position));
                    }
                    LocateResult::RemoteRank { rank, .. } => {
                        assert_eq!(rank, owner.my_rank());
                        assert_ne!(map.my_rank(), owner.my_rank());
                    }
                    LocateResult::OutOfDomain => panic!("center {:?} not located", center),
                }
            }
        }
    }
}

#[test]
fn test_locate_periodic_seam() {
    let shape = GridShape::new_3d([2, 4, 2]).unwrap();
    let description = unit_description(shape);
    let maps = maps_of_all_ranks(&description, 2);

    for map in &maps {
        // The upper edge of the periodic x axis belongs to the first gridbox
        let seam = Vector3::new(0.5, 4.0, 0.5);
        let folded = match map.locate(&seam) {
            LocateResult::LocalCell { position, .. } => position,
            LocateResult::RemoteRank { position, .. } => position,
            LocateResult::OutOfDomain => panic!("seam position left the domain"),
        };
        assert_eq!(folded, Vector3::new(0.5, 0.0, 0.5));

        let wrapped = map.locate(&Vector3::new(0.5, -0.25, 0.5));
        match wrapped {
            LocateResult::LocalCell { position, .. } | LocateResult::RemoteRank { position, .. } => {
                assert_eq!(position.y, 3.75);
            }
            LocateResult::OutOfDomain => panic!("wrapped position left the domain"),
        }

        // The vertical axis is finite
        assert_eq!(map.locate(&Vector3::new(2.0, 1.0, 1.0)), LocateResult::OutOfDomain);
        assert_eq!(map.locate(&Vector3::new(-0.1, 1.0, 1.0)), LocateResult::OutOfDomain);
    }
}

#[test]
fn test_area_and_volume_of_rectilinear_grid() {
    let shape = GridShape::new_3d([2, 2, 1]).unwrap();
    let domain = Aabb3d::new(Vector3::zeros(), Vector3::new(100.0, 40.0, 10.0));
    let description = GridDescription::uniform(shape, &domain).unwrap();
    let map = CellMap::build(Decomposition::build(shape, 1, 0).unwrap(), &description).unwrap();

    for index in 0..map.num_local_cells() {
        assert_eq!(map.area(index), 20.0 * 10.0);
        assert_eq!(map.volume(index), 50.0 * 20.0 * 10.0);
    }
}

#[test]
fn test_null_axes() {
    let shape = GridShape::new([5, 1, 1], SpatialDims::One)
        .unwrap()
        .with_boundaries([BoundaryMode::Finite, BoundaryMode::Finite, BoundaryMode::Finite]);
    let domain = Aabb3d::new(Vector3::zeros(), Vector3::new(500.0, 20.0, 30.0));
    let description = GridDescription::uniform(shape, &domain).unwrap();
    let map = CellMap::build(Decomposition::build(shape, 1, 0).unwrap(), &description).unwrap();

    assert!(map.is_null(Axis::X) && map.is_null(Axis::Y));
    for index in 0..map.num_local_cells() {
        assert_eq!(map.area(index), 600.0);
        assert_range!(99.9..100.1, map.volume(index) / 600.0);

        // Null axes never lead out of the gridbox
        for axis in [Axis::X, Axis::Y] {
            for &direction in Direction::all_possible() {
                assert_eq!(
                    map.neighbor(index, axis.with_direction(direction)),
                    CellRef::Local(index)
                );
            }
        }
    }

    // Any horizontal coordinate belongs to the single column
    assert!(matches!(
        map.locate(&Vector3::new(250.0, -1000.0, 1e6)),
        LocateResult::LocalCell { index: 2, .. }
    ));
}
