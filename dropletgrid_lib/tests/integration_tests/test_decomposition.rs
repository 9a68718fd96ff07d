use dropletgrid_lib::topology::SliceOffset;
use dropletgrid_lib::{Decomposition, DecompositionError, GridShape, SpatialDims};

fn all_ranks(shape: GridShape, process_count: usize) -> Vec<Decomposition> {
    (0..process_count)
        .map(|rank| Decomposition::build(shape, process_count, rank).unwrap())
        .collect()
}

#[test]
fn test_partitions_tile_the_grid() {
    let cases = [
        ([4, 2, 2], 4),
        ([7, 5, 3], 6),
        ([3, 3, 3], 9),
        ([10, 1, 1], 3),
        ([5, 8, 6], 12),
    ];

    for (ndims, process_count) in cases {
        let shape = GridShape::new_3d(ndims).unwrap();
        let decompositions = all_ranks(shape, process_count);

        let mut owner = vec![None; shape.num_cells()];
        for d in &decompositions {
            for local in 0..d.local_cell_count() {
                let global = d.local_to_global(local);
                assert_eq!(owner[global], None, "gridbox {} owned twice", global);
                owner[global] = Some(d.my_rank());
            }
        }

        for (global, rank) in owner.iter().enumerate() {
            let rank = rank.expect("every gridbox has an owner");
            for d in &decompositions {
                assert_eq!(d.rank_owning_global(global), rank);
            }
        }

        let total = decompositions
            .iter()
            .map(|d| d.local_cell_count())
            .sum::<usize>();
        assert_eq!(total, shape.num_cells());
    }
}

#[test]
fn test_partition_sizes_differ_by_at_most_one() {
    let shape = GridShape::new_3d([7, 5, 3]).unwrap();
    let decomposition = Decomposition::build(shape, 6, 0).unwrap();
    assert_eq!(decomposition.factorization().iter().product::<usize>(), 6);

    for d in 0..3 {
        let sizes = (0..6)
            .map(|rank| decomposition.partition_size(rank)[d])
            .collect::<Vec<_>>();
        let min = sizes.iter().min().unwrap();
        let max = sizes.iter().max().unwrap();
        assert!(max - min <= 1);
    }
}

#[test]
fn test_local_global_round_trip() {
    let shape = GridShape::new_3d([5, 4, 3]).unwrap();
    for d in all_ranks(shape, 4) {
        for local in 0..d.local_cell_count() {
            let global = d.local_to_global(local);
            assert_eq!(d.global_to_local(global), Some(local));
            assert_eq!(d.rank_owning_global(global), d.my_rank());
        }

        for global in 0..shape.num_cells() {
            if d.rank_owning_global(global) != d.my_rank() {
                assert_eq!(d.global_to_local(global), None);
            }
        }
    }
}

#[test]
fn test_neighbor_ranks_are_symmetric() {
    let shape = GridShape::new_3d([6, 6, 6]).unwrap();
    let process_count = 12;
    let decompositions = all_ranks(shape, process_count);

    for d in &decompositions {
        for offset in SliceOffset::all_neighbors() {
            let neighbor = d.neighbor_rank(offset);
            assert!(neighbor < process_count);
            assert_eq!(
                decompositions[neighbor].neighbor_rank(offset.opposite()),
                d.my_rank()
            );
        }
    }
}

#[test]
fn test_horizontal_split_for_four_ranks() {
    let shape = GridShape::new_3d([4, 2, 2]).unwrap();
    for d in all_ranks(shape, 4) {
        assert_eq!(d.factorization(), [1, 2, 2]);
        assert_eq!(d.local_cell_count(), 4);
        assert_eq!(d.partition_size(d.my_rank()), [4, 1, 1]);
    }
}

#[test]
fn test_single_rank_owns_everything() {
    let shape = GridShape::new([8, 1, 1], SpatialDims::One).unwrap();
    let d = Decomposition::build(shape, 1, 0).unwrap();
    assert_eq!(d.factorization(), [1, 1, 1]);
    assert_eq!(d.local_cell_count(), 8);
    for offset in SliceOffset::all_neighbors() {
        assert_eq!(d.neighbor_rank(offset), 0);
    }
}

#[test]
fn test_too_many_processes() {
    let shape = GridShape::new_3d([2, 2, 2]).unwrap();
    assert_eq!(
        Decomposition::build(shape, 16, 0).unwrap_err(),
        DecompositionError::NoValidFactorization {
            process_count: 16,
            ndims: [2, 2, 2]
        }
    );
}
