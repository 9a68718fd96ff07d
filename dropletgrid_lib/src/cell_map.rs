//! Per-rank lookup tables of gridbox bounds, face neighbors, areas and volumes

use log::debug;
use nalgebra::Vector3;

use crate::decomposition::{Decomposition, LocateResult};
use crate::grid::{AxisEdges, BoundaryMode, GridDescription, GridDescriptionError};
use crate::topology::{Axis, DirectedAxis, DirectedAxisArray, Direction};
use crate::{Real, ThreadSafe, profile};

/// Ownership of a superdroplet or the target of a gridbox face
///
/// The variant order is significant: sorting by `CellRef` puts local gridboxes first (by index),
/// followed by remote ranks (by rank) and finally everything that left the domain.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum CellRef {
    /// A gridbox owned by this rank (local index)
    Local(usize),
    /// A gridbox owned by the given remote rank, pending the next transport cycle
    Remote(usize),
    /// Outside of the physical domain
    OutOfDomain,
}

impl CellRef {
    #[inline(always)]
    pub fn is_local(&self) -> bool {
        matches!(self, CellRef::Local(_))
    }

    #[inline(always)]
    pub fn is_out_of_domain(&self) -> bool {
        matches!(self, CellRef::OutOfDomain)
    }

    /// Returns the local gridbox index if the reference is local
    #[inline(always)]
    pub fn local_index(&self) -> Option<usize> {
        match self {
            CellRef::Local(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Returns the target rank if the reference points to a remote rank
    #[inline(always)]
    pub fn remote_rank(&self) -> Option<usize> {
        match self {
            CellRef::Remote(rank) => Some(*rank),
            _ => None,
        }
    }
}

impl<R: Real> LocateResult<R> {
    /// Converts the result into the corresponding [`CellRef`]
    pub fn cell_ref(&self) -> CellRef {
        match self {
            LocateResult::LocalCell { index, .. } => CellRef::Local(*index),
            LocateResult::RemoteRank { rank, .. } => CellRef::Remote(*rank),
            LocateResult::OutOfDomain => CellRef::OutOfDomain,
        }
    }
}

/// Interface of a map of the gridboxes owned by one rank, used by motion and transport
pub trait GridboxMap<R: Real>: ThreadSafe {
    /// Number of gridboxes owned by this rank
    fn num_local_cells(&self) -> usize;

    /// Rank owning this map
    fn my_rank(&self) -> usize;

    /// Total number of ranks
    fn process_count(&self) -> usize;

    /// Half-open `(lower, upper)` bounds of a local gridbox along `axis`
    fn bounds(&self, index: usize, axis: Axis) -> (R, R);

    /// Face neighbor of a local gridbox in the given direction
    fn neighbor(&self, index: usize, direction: DirectedAxis) -> CellRef;

    /// Horizontal area of a local gridbox
    fn area(&self, index: usize) -> R;

    /// Volume of a local gridbox
    fn volume(&self, index: usize) -> R;

    /// Determines the owner of a physical position, see [`Decomposition::locate`]
    fn locate(&self, position: &Vector3<R>) -> LocateResult<R>;

    /// Physical `(lower, upper)` bounds of the whole domain along `axis`
    fn domain_bounds(&self, axis: Axis) -> (R, R);

    fn boundary_mode(&self, axis: Axis) -> BoundaryMode;

    /// Whether the axis is not resolved in this configuration
    fn is_null(&self, axis: Axis) -> bool;

    /// Global cell coordinates `(k, i, j)` of a local gridbox
    fn global_coords(&self, index: usize) -> [usize; 3];

    /// Global cell coordinate along `axis` of the gridbox containing `coord`, if any
    fn global_cell_along(&self, axis: Axis, coord: R) -> Option<usize>;

    /// Number of gridboxes of the global grid along `axis`
    fn global_ndim(&self, axis: Axis) -> usize;

    /// Checks whether the position lies inside of the bounds of the local gridbox
    fn contains(&self, index: usize, position: &Vector3<R>) -> bool {
        Axis::all_possible().iter().all(|&axis| {
            let (lower, upper) = self.bounds(index, axis);
            position[axis.dim()] >= lower && position[axis.dim()] < upper
        })
    }
}

#[derive(Clone, Debug)]
struct GridboxData<R: Real> {
    bounds: [(R, R); 3],
    neighbors: DirectedAxisArray<CellRef>,
    area: R,
    volume: R,
}

/// Map of all gridboxes owned by one rank of a [`Decomposition`]
#[derive(Clone, Debug)]
pub struct CellMap<R: Real> {
    decomposition: Decomposition,
    edges: AxisEdges<R>,
    gridboxes: Vec<GridboxData<R>>,
}

impl<R: Real> CellMap<R> {
    /// Builds the map of the local gridboxes from the decomposition and the global grid description
    pub fn build(
        decomposition: Decomposition,
        description: &GridDescription<R>,
    ) -> Result<Self, GridDescriptionError> {
        profile!("CellMap::build");

        let shape = *decomposition.shape();
        if *description.shape() != shape {
            return Err(GridDescriptionError::ShapeMismatch {
                expected: shape,
                found: *description.shape(),
            });
        }

        let edges = description.edges().clone();
        let num_local = decomposition.local_cell_count();
        let mut gridboxes = Vec::with_capacity(num_local);

        for local_index in 0..num_local {
            let global_index = decomposition.local_to_global(local_index);
            let kij = shape.unflatten(global_index);

            let mut bounds = [(R::zero(), R::zero()); 3];
            let mut extents = [R::zero(); 3];
            for &axis in Axis::all_possible() {
                let d = axis.dim();
                let (lower, upper) = edges.cell_bounds(axis, kij[d]);
                extents[d] = upper - lower;
                bounds[d] = if shape.is_null(axis) {
                    (R::lowest(), R::largest())
                } else {
                    (lower, upper)
                };
            }

            let neighbors = DirectedAxisArray::new_with(|directed_axis| {
                let axis = directed_axis.axis;
                if shape.is_null(axis) {
                    return CellRef::Local(local_index);
                }

                let d = axis.dim();
                let n = shape.ndim(axis);
                let c = kij[d];
                let neighbor_c = match directed_axis.direction {
                    Direction::Negative if c > 0 => Some(c - 1),
                    Direction::Positive if c + 1 < n => Some(c + 1),
                    _ => match shape.boundary(axis) {
                        BoundaryMode::Finite => None,
                        BoundaryMode::Periodic if directed_axis.direction.is_negative() => {
                            Some(n - 1)
                        }
                        BoundaryMode::Periodic => Some(0),
                    },
                };

                match neighbor_c {
                    None => CellRef::OutOfDomain,
                    Some(neighbor_c) => {
                        let mut neighbor_kij = kij;
                        neighbor_kij[d] = neighbor_c;
                        match decomposition.global_coords_to_local(&neighbor_kij) {
                            Some(idx) => CellRef::Local(idx),
                            None => CellRef::Remote(decomposition.rank_owning_cell(&neighbor_kij)),
                        }
                    }
                }
            });

            let area = extents[Axis::X.dim()] * extents[Axis::Y.dim()];
            gridboxes.push(GridboxData {
                bounds,
                neighbors,
                area,
                volume: area * extents[Axis::Z.dim()],
            });
        }

        debug!(
            "Built cell map of rank {} with {} local gridboxes",
            decomposition.my_rank(),
            gridboxes.len()
        );

        Ok(Self {
            decomposition,
            edges,
            gridboxes,
        })
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn edges(&self) -> &AxisEdges<R> {
        &self.edges
    }

    /// Returns the global index of a local gridbox
    pub fn global_index(&self, local_index: usize) -> usize {
        self.decomposition.local_to_global(local_index)
    }

    /// Returns the center of a local gridbox, null axes use the center of the described extent
    pub fn center(&self, local_index: usize) -> Vector3<R> {
        let kij = self
            .decomposition
            .shape()
            .unflatten(self.global_index(local_index));
        let two = R::one() + R::one();
        Vector3::from_fn(|d, _| {
            let (lower, upper) = self.edges.cell_bounds(Axis::from_dim(d), kij[d]);
            (lower + upper) / two
        })
    }
}

impl<R: Real> GridboxMap<R> for CellMap<R> {
    #[inline(always)]
    fn num_local_cells(&self) -> usize {
        self.gridboxes.len()
    }

    fn my_rank(&self) -> usize {
        self.decomposition.my_rank()
    }

    fn process_count(&self) -> usize {
        self.decomposition.process_count()
    }

    #[inline(always)]
    fn bounds(&self, index: usize, axis: Axis) -> (R, R) {
        self.gridboxes[index].bounds[axis.dim()]
    }

    #[inline(always)]
    fn neighbor(&self, index: usize, direction: DirectedAxis) -> CellRef {
        *self.gridboxes[index].neighbors.get(&direction)
    }

    fn area(&self, index: usize) -> R {
        self.gridboxes[index].area
    }

    fn volume(&self, index: usize) -> R {
        self.gridboxes[index].volume
    }

    fn locate(&self, position: &Vector3<R>) -> LocateResult<R> {
        self.decomposition.locate(&self.edges, position)
    }

    fn domain_bounds(&self, axis: Axis) -> (R, R) {
        self.decomposition.domain_bounds(&self.edges, axis)
    }

    fn boundary_mode(&self, axis: Axis) -> BoundaryMode {
        self.decomposition.boundary_mode(axis)
    }

    fn is_null(&self, axis: Axis) -> bool {
        self.decomposition.shape().is_null(axis)
    }

    fn global_coords(&self, index: usize) -> [usize; 3] {
        self.decomposition.shape().unflatten(self.global_index(index))
    }

    fn global_cell_along(&self, axis: Axis, coord: R) -> Option<usize> {
        self.edges.find_cell(axis, coord)
    }

    fn global_ndim(&self, axis: Axis) -> usize {
        self.decomposition.shape().ndim(axis)
    }
}
