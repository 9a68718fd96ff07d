mod test_cell_map;
mod test_decomposition;
mod test_motion;
mod test_transport;

use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::{Aabb3d, CellMap, Decomposition, GridDescription, GridShape};

/// Uniform description of a domain with gridboxes of unit size
pub(crate) fn unit_description(shape: GridShape) -> GridDescription<f64> {
    let [nz, nx, ny] = shape.ndims();
    let domain = Aabb3d::new(
        Vector3::zeros(),
        Vector3::new(nz as f64, nx as f64, ny as f64),
    );
    GridDescription::uniform(shape, &domain).unwrap()
}

/// Builds the maps of all ranks
pub(crate) fn maps_of_all_ranks(
    description: &GridDescription<f64>,
    process_count: usize,
) -> Vec<CellMap<f64>> {
    (0..process_count)
        .map(|rank| {
            let decomposition =
                Decomposition::build(*description.shape(), process_count, rank).unwrap();
            CellMap::build(decomposition, description).unwrap()
        })
        .collect()
}
