//! Implementation of the `decompose` subcommand of the dropletgrid CLI.

use anyhow::{Context, anyhow};
use dropletgrid_lib::topology::SliceOffset;
use dropletgrid_lib::{Decomposition, GridShape, SpatialDims, profile};
use log::info;

/// Command line arguments for the `decompose` subcommand
#[derive(Clone, Debug, clap::Parser)]
pub(crate) struct DecomposeSubcommandArgs {
    /// Number of gridboxes along the vertical and the two horizontal axes
    #[arg(long, number_of_values = 3, value_names = ["NZ", "NX", "NY"], required = true)]
    pub ndims: Vec<usize>,
    /// Number of processes the grid is decomposed among
    #[arg(long, short = 'p')]
    pub processes: usize,
    /// Rank whose neighbor table should be printed (default: all ranks)
    #[arg(long, short = 'r')]
    pub rank: Option<usize>,
    /// Number of resolved axes, unresolved axes must have exactly one gridbox
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub spatial_dims: u8,
}

/// Parses the grid shape from the gridbox counts and the number of resolved axes
pub(crate) fn grid_shape_from_args(ndims: &[usize], spatial_dims: u8) -> Result<GridShape, anyhow::Error> {
    let ndims: [usize; 3] = ndims
        .try_into()
        .map_err(|_| anyhow!("Expected three gridbox counts (NZ NX NY), got {}", ndims.len()))?;
    let spatial_dims = SpatialDims::from_count(spatial_dims as usize)
        .ok_or_else(|| anyhow!("Invalid number of spatial dimensions: {}", spatial_dims))?;
    GridShape::new(ndims, spatial_dims).context("Invalid grid shape")
}

/// Executes the `decompose` subcommand
pub(crate) fn decompose_subcommand(cmd_args: &DecomposeSubcommandArgs) -> Result<(), anyhow::Error> {
    profile!("decompose cli");

    let shape = grid_shape_from_args(&cmd_args.ndims, cmd_args.spatial_dims)?;
    let process_count = cmd_args.processes;
    if let Some(rank) = cmd_args.rank {
        if rank >= process_count {
            return Err(anyhow!(
                "Rank {} is out of range for {} processes",
                rank,
                process_count
            ));
        }
    }

    let decomposition = Decomposition::build(shape, process_count, cmd_args.rank.unwrap_or(0))
        .with_context(|| {
            format!(
                "Failed to decompose a grid of {:?} gridboxes among {} processes",
                shape.ndims(),
                process_count
            )
        })?;

    let [fz, fx, fy] = decomposition.factorization();
    info!("Factorization (z, x, y): {} x {} x {}", fz, fx, fy);
    for rank in 0..process_count {
        let size = decomposition.partition_size(rank);
        info!(
            "Rank {:>4}: slice {:?}, origin {:?}, size {:?} ({} gridboxes)",
            rank,
            decomposition.slice_of(rank),
            decomposition.partition_origin(rank),
            size,
            size.iter().product::<usize>()
        );
    }

    let ranks = match cmd_args.rank {
        Some(rank) => rank..rank + 1,
        None => 0..process_count,
    };
    for rank in ranks {
        let decomposition = Decomposition::build(shape, process_count, rank)?;
        info!(
            "Neighbors of rank {} (distinct: {:?}):",
            rank,
            decomposition.distinct_neighbor_ranks().as_slice()
        );
        for offset in SliceOffset::all_neighbors() {
            info!(
                "  {:>2?} -> {}",
                offset.components(),
                decomposition.neighbor_rank(offset)
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape_from_args() {
        let shape = grid_shape_from_args(&[4, 2, 2], 3).unwrap();
        assert_eq!(shape.ndims(), [4, 2, 2]);
        assert!(grid_shape_from_args(&[4, 2], 3).is_err());
        // Unresolved axes need a single gridbox
        assert!(grid_shape_from_args(&[4, 2, 2], 1).is_err());
        assert!(grid_shape_from_args(&[4, 1, 1], 1).is_ok());
    }
}
