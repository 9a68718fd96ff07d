//! Boundary conditions applied to superdroplets after they moved

use log::debug;
use rayon::prelude::*;

use crate::cell_map::{CellRef, GridboxMap};
use crate::decomposition::LocateResult;
use crate::superdroplet::SuperdropletBuffer;
use crate::topology::Axis;
use crate::{Real, ThreadSafe, profile};

/// Boundary conditions at the edges of the domain
pub trait BoundaryConditions<R: Real>: ThreadSafe {
    /// Applies the boundary conditions to the resident superdroplets, returns the number of superdroplets that were modified
    fn apply<M: GridboxMap<R>>(&self, map: &M, buffer: &mut SuperdropletBuffer<R>) -> usize;
}

/// Boundary conditions that leave superdroplets outside of the domain untouched
#[derive(Copy, Clone, Debug, Default)]
pub struct NullBoundaryConditions;

/// Superdroplets leaving the domain through the bottom re-enter the domain through the top
///
/// The vertical coordinate is shifted up by the vertical extent of the domain and the owner is
/// located again. The new owner may be another rank, the next transport cycle then moves the
/// superdroplet there.
#[derive(Copy, Clone, Debug, Default)]
pub struct PeriodicTopBoundary;

/// Boundary conditions selected at configuration time
#[derive(Copy, Clone, Debug)]
pub enum BoundaryKind {
    Null(NullBoundaryConditions),
    PeriodicTop(PeriodicTopBoundary),
}

impl<R: Real> BoundaryConditions<R> for NullBoundaryConditions {
    fn apply<M: GridboxMap<R>>(&self, _map: &M, _buffer: &mut SuperdropletBuffer<R>) -> usize {
        0
    }
}

impl<R: Real> BoundaryConditions<R> for PeriodicTopBoundary {
    fn apply<M: GridboxMap<R>>(&self, map: &M, buffer: &mut SuperdropletBuffer<R>) -> usize {
        profile!("PeriodicTopBoundary::apply");

        let z = Axis::Z.dim();
        let (lower, upper) = map.domain_bounds(Axis::Z);
        let extent = upper - lower;

        let reinserted = buffer
            .resident_mut()
            .par_iter_mut()
            .filter(|drop| drop.cell.is_out_of_domain() && drop.coords[z] < lower)
            .map(|drop| {
                let mut position = drop.coords;
                position[z] += extent;
                (drop.cell, drop.coords) = match map.locate(&position) {
                    LocateResult::LocalCell { index, position } => (CellRef::Local(index), position),
                    LocateResult::RemoteRank { rank, position } => (CellRef::Remote(rank), position),
                    LocateResult::OutOfDomain => (CellRef::OutOfDomain, position),
                };
                usize::from(!drop.cell.is_out_of_domain())
            })
            .sum();

        if reinserted > 0 {
            debug!(
                "Rank {} re-inserted {} superdroplets at the top of the domain",
                map.my_rank(),
                reinserted
            );
        }
        reinserted
    }
}

impl<R: Real> BoundaryConditions<R> for BoundaryKind {
    fn apply<M: GridboxMap<R>>(&self, map: &M, buffer: &mut SuperdropletBuffer<R>) -> usize {
        match self {
            BoundaryKind::Null(b) => BoundaryConditions::<R>::apply(b, map, buffer),
            BoundaryKind::PeriodicTop(b) => BoundaryConditions::<R>::apply(b, map, buffer),
        }
    }
}
