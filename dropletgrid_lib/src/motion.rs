//! Motion of superdroplets and the update of their owning gridbox
//!
//! After a superdroplet moved to a new position, [`advance`] walks it from its old gridbox to the
//! gridbox that contains the new position, one hop per axis in the fixed order z, x, y. Periodic
//! domain edges fold the position back into the domain. Finite domain edges mark the superdroplet
//! as out of domain and leave its position unfolded.

use log::error;
use nalgebra::Vector3;
use rayon::prelude::*;
use thiserror::Error as ThisError;

use crate::cell_map::{CellRef, GridboxMap};
use crate::decomposition::{LocateResult, fold_periodic};
use crate::grid::BoundaryMode;
use crate::superdroplet::{Superdroplet, SuperdropletBuffer, SuperdropletId};
use crate::topology::{Axis, DirectedAxis, Direction};
use crate::{Real, ThreadSafe, profile};

/// Errors that can occur when moving superdroplets
#[derive(Clone, PartialEq, Debug, ThisError)]
#[non_exhaustive]
pub enum MotionError {
    /// The superdroplet moved further than one gridbox along an axis within a single step
    #[error(
        "superdroplet {id:?} skipped a gridbox: position {position:?} is outside of gridbox {cell} after the update (time step too large?)"
    )]
    CellSkipped {
        id: Option<SuperdropletId>,
        cell: usize,
        position: [f64; 3],
    },
}

/// Provides the new position of a superdroplet after one time step
pub trait Motion<R: Real>: ThreadSafe {
    /// Returns the position after advancing the superdroplet by `dt`, without updating its gridbox
    fn update_position(&self, drop: &Superdroplet<R>, dt: R) -> Vector3<R>;
}

/// Motion that keeps all superdroplets in place
#[derive(Copy, Clone, Debug, Default)]
pub struct NullMotion;

/// Motion with the same constant velocity `(w, u, v)` for all superdroplets
#[derive(Copy, Clone, Debug)]
pub struct ConstantVelocity<R: Real> {
    pub velocity: Vector3<R>,
}

/// Motion selected at configuration time
#[derive(Copy, Clone, Debug)]
pub enum MotionKind<R: Real> {
    Null(NullMotion),
    ConstantVelocity(ConstantVelocity<R>),
}

impl<R: Real> Motion<R> for NullMotion {
    fn update_position(&self, drop: &Superdroplet<R>, _dt: R) -> Vector3<R> {
        drop.coords
    }
}

impl<R: Real> Motion<R> for ConstantVelocity<R> {
    fn update_position(&self, drop: &Superdroplet<R>, dt: R) -> Vector3<R> {
        drop.coords + self.velocity * dt
    }
}

impl<R: Real> Motion<R> for MotionKind<R> {
    fn update_position(&self, drop: &Superdroplet<R>, dt: R) -> Vector3<R> {
        match self {
            MotionKind::Null(m) => m.update_position(drop, dt),
            MotionKind::ConstantVelocity(m) => m.update_position(drop, dt),
        }
    }
}

fn to_f64_array<R: Real>(position: &Vector3<R>) -> [f64; 3] {
    std::array::from_fn(|d| position[d].to_f64().unwrap_or(f64::NAN))
}

/// Whether the gridbox containing `position` is more than one gridbox away from the local gridbox `start` along any axis
fn skips_gridbox<R: Real, M: GridboxMap<R>>(map: &M, start: usize, position: &Vector3<R>) -> bool {
    let start_kij = map.global_coords(start);
    Axis::all_possible().iter().any(|&axis| {
        if map.is_null(axis) {
            return false;
        }

        let d = axis.dim();
        let Some(c) = map.global_cell_along(axis, position[d]) else {
            return false;
        };
        let distance = c.abs_diff(start_kij[d]);
        let distance = match map.boundary_mode(axis) {
            BoundaryMode::Finite => distance,
            BoundaryMode::Periodic => distance.min(map.global_ndim(axis) - distance),
        };
        distance > 1
    })
}

/// Updates the owner of a superdroplet after its position changed
///
/// Superdroplets that are not in a local gridbox are returned unchanged. A hop into a gridbox of
/// another rank resolves the final owner with [`GridboxMap::locate`], which also folds the
/// remaining axes. Moving further than one gridbox along any axis is an error in both cases.
pub fn advance<R: Real, M: GridboxMap<R>>(
    map: &M,
    cell: CellRef,
    position: Vector3<R>,
) -> Result<(CellRef, Vector3<R>), MotionError> {
    let Some(start) = cell.local_index() else {
        return Ok((cell, position));
    };
    let mut current = start;
    let mut position = position;

    for &axis in Axis::all_possible() {
        if map.is_null(axis) {
            continue;
        }

        let d = axis.dim();
        let (lower, upper) = map.bounds(current, axis);
        let direction = if position[d] < lower {
            Direction::Negative
        } else if position[d] >= upper {
            Direction::Positive
        } else {
            continue;
        };

        let (domain_lower, domain_upper) = map.domain_bounds(axis);
        let leaves_domain = match direction {
            Direction::Negative => position[d] < domain_lower,
            Direction::Positive => position[d] >= domain_upper,
        };
        if leaves_domain {
            match map.boundary_mode(axis) {
                BoundaryMode::Finite => return Ok((CellRef::OutOfDomain, position)),
                BoundaryMode::Periodic => {
                    position[d] = fold_periodic(position[d], domain_lower, domain_upper);
                    // The folded coordinate may round onto the edge of the current gridbox
                    if position[d] >= lower && position[d] < upper {
                        continue;
                    }
                }
            }
        }

        match map.neighbor(current, DirectedAxis::new(axis, direction)) {
            CellRef::Local(neighbor) => current = neighbor,
            CellRef::OutOfDomain => return Ok((CellRef::OutOfDomain, position)),
            CellRef::Remote(_) => {
                let (cell, position) = match map.locate(&position) {
                    LocateResult::LocalCell { index, position } => (CellRef::Local(index), position),
                    LocateResult::RemoteRank { rank, position } => (CellRef::Remote(rank), position),
                    LocateResult::OutOfDomain => return Ok((CellRef::OutOfDomain, position)),
                };
                if skips_gridbox(map, start, &position) {
                    return Err(MotionError::CellSkipped {
                        id: None,
                        cell: current,
                        position: to_f64_array(&position),
                    });
                }
                return Ok((cell, position));
            }
        }
    }

    if !map.contains(current, &position) {
        return Err(MotionError::CellSkipped {
            id: None,
            cell: current,
            position: to_f64_array(&position),
        });
    }

    Ok((CellRef::Local(current), position))
}

/// Moves all resident superdroplets in local gridboxes by one time step and updates their owners
///
/// Runs data-parallel over the superdroplets. Returns the first error encountered.
pub fn move_superdroplets<R, M, Mo>(
    map: &M,
    motion: &Mo,
    buffer: &mut SuperdropletBuffer<R>,
    dt: R,
) -> Result<(), MotionError>
where
    R: Real,
    M: GridboxMap<R>,
    Mo: Motion<R>,
{
    profile!("move_superdroplets");

    buffer.resident_mut().par_iter_mut().try_for_each(|drop| {
        if !drop.cell.is_local() {
            return Ok(());
        }

        let position = motion.update_position(drop, dt);
        match advance(map, drop.cell, position) {
            Ok((cell, position)) => {
                drop.cell = cell;
                drop.coords = position;
                Ok(())
            }
            Err(MotionError::CellSkipped { cell, position, .. }) => {
                error!(
                    "Rank {}: superdroplet {} skipped a gridbox",
                    map.my_rank(),
                    drop.id.0
                );
                Err(MotionError::CellSkipped {
                    id: Some(drop.id),
                    cell,
                    position,
                })
            }
        }
    })
}
