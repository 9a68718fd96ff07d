//! Global grid shape, boundary modes and the external gridbox description
//!
//! The global grid consists of `nz * nx * ny` gridboxes. A global cell coordinate triplet
//! `(k, i, j)` is flattened with the vertical index running fastest: `g = k + nz * (i + nx * j)`.

use std::ops::Range;

use thiserror::Error as ThisError;

use crate::topology::Axis;
use crate::{Aabb3d, Real};

/// Behavior of the domain at the two ends of a coordinate axis
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BoundaryMode {
    /// Particles crossing the domain edge leave the domain permanently
    Finite,
    /// Particles crossing the domain edge re-enter at the opposite edge
    Periodic,
}

/// Number of active spatial dimensions of a configuration
///
/// Inactive ("null") axes consist of a single gridbox that is unbounded for the purpose of
/// motion. 1-D configurations only resolve the vertical axis, 2-D configurations resolve the
/// vertical axis and the first horizontal axis.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SpatialDims {
    Zero,
    One,
    Two,
    Three,
}

/// Errors that can occur when the grid shape or the gridbox description is invalid
#[derive(Clone, PartialEq, Eq, Debug, ThisError)]
#[non_exhaustive]
pub enum GridDescriptionError {
    /// Every axis needs at least one gridbox
    #[error("invalid grid shape {0:?}, every axis needs at least one gridbox")]
    EmptyAxis([usize; 3]),
    /// Null axes of 0-D, 1-D and 2-D configurations have to consist of exactly one gridbox
    #[error("axis {axis:?} is not resolved in this configuration but has {num_cells} gridboxes (expected 1)")]
    NullAxisWithCells { axis: Axis, num_cells: usize },
    /// A gridbox refers to a global index outside of the grid
    #[error("gridbox index {global_index} is out of range for a grid with {num_cells} gridboxes")]
    IndexOutOfRange {
        global_index: usize,
        num_cells: usize,
    },
    /// The same gridbox is described more than once
    #[error("gridbox {0} is described more than once")]
    DuplicateCell(usize),
    /// A gridbox of the grid is not described
    #[error("gridbox {0} is missing from the grid description")]
    MissingCell(usize),
    /// The upper bound of a gridbox is not larger than its lower bound
    #[error("gridbox {global_index} has an upper bound not larger than its lower bound on axis {axis:?}")]
    DegenerateCell { global_index: usize, axis: Axis },
    /// Gridbox bounds do not form a rectilinear grid of touching gridboxes
    #[error("bounds of gridbox {global_index} on axis {axis:?} are inconsistent with its neighbors")]
    InconsistentBounds { global_index: usize, axis: Axis },
    /// The grid description was made for a grid of a different shape, boundary modes or dimensionality
    #[error("grid description with shape {found:?} does not match the decomposed grid shape {expected:?}")]
    ShapeMismatch {
        expected: GridShape,
        found: GridShape,
    },
    /// The domain supplied for a uniform grid has zero or negative extent along an axis
    #[error("degenerate domain supplied, every axis of the domain has to have an extent larger than zero")]
    DegenerateDomain,
}

/// Immutable shape of the global grid together with the boundary mode of every axis
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct GridShape {
    ndims: [usize; 3],
    boundaries: [BoundaryMode; 3],
    spatial_dims: SpatialDims,
}

/// Physical bounds of a single gridbox as given by an external grid description
#[derive(Clone, PartialEq, Debug)]
pub struct GridboxBounds<R: Real> {
    /// Global index of the gridbox (`k + nz * (i + nx * j)`)
    pub global_index: usize,
    /// Lower bounds `(z, x, y)`, inclusive
    pub lower: [R; 3],
    /// Upper bounds `(z, x, y)`, exclusive
    pub upper: [R; 3],
}

/// Sorted gridbox edge coordinates along each axis (`n + 1` values for an axis with `n` gridboxes)
#[derive(Clone, PartialEq, Debug)]
pub struct AxisEdges<R: Real> {
    edges: [Vec<R>; 3],
}

/// Validated description of the physical bounds of every gridbox of the global grid
#[derive(Clone, PartialEq, Debug)]
pub struct GridDescription<R: Real> {
    shape: GridShape,
    gridboxes: Vec<GridboxBounds<R>>,
    edges: AxisEdges<R>,
}

impl BoundaryMode {
    /// Returns whether the mode is [`BoundaryMode::Periodic`]
    pub fn is_periodic(&self) -> bool {
        matches!(self, BoundaryMode::Periodic)
    }
}

impl SpatialDims {
    /// Constructs the spatial dimensionality from the number of resolved axes
    pub fn from_count(n: usize) -> Option<Self> {
        match n {
            0 => Some(SpatialDims::Zero),
            1 => Some(SpatialDims::One),
            2 => Some(SpatialDims::Two),
            3 => Some(SpatialDims::Three),
            _ => None,
        }
    }

    /// Returns the number of resolved axes
    pub fn count(&self) -> usize {
        match self {
            SpatialDims::Zero => 0,
            SpatialDims::One => 1,
            SpatialDims::Two => 2,
            SpatialDims::Three => 3,
        }
    }

    /// Returns whether the given axis is resolved in this configuration
    /// ```
    /// use dropletgrid_lib::grid::SpatialDims;
    /// use dropletgrid_lib::topology::Axis;
    /// assert!(SpatialDims::Two.is_active(Axis::X));
    /// assert!(!SpatialDims::Two.is_active(Axis::Y));
    /// assert!(!SpatialDims::Zero.is_active(Axis::Z));
    /// ```
    pub fn is_active(&self, axis: Axis) -> bool {
        axis.dim() < self.count()
    }
}

impl GridShape {
    /// Default boundary modes: finite vertical axis, periodic horizontal axes
    pub const DEFAULT_BOUNDARIES: [BoundaryMode; 3] = [
        BoundaryMode::Finite,
        BoundaryMode::Periodic,
        BoundaryMode::Periodic,
    ];

    /// Constructs a new grid shape with the default boundary modes
    pub fn new(ndims: [usize; 3], spatial_dims: SpatialDims) -> Result<Self, GridDescriptionError> {
        if ndims.contains(&0) {
            return Err(GridDescriptionError::EmptyAxis(ndims));
        }

        for &axis in Axis::all_possible() {
            let num_cells = ndims[axis.dim()];
            if !spatial_dims.is_active(axis) && num_cells != 1 {
                return Err(GridDescriptionError::NullAxisWithCells { axis, num_cells });
            }
        }

        Ok(Self {
            ndims,
            boundaries: Self::DEFAULT_BOUNDARIES,
            spatial_dims,
        })
    }

    /// Constructs a fully resolved 3-D grid shape with the default boundary modes
    pub fn new_3d(ndims: [usize; 3]) -> Result<Self, GridDescriptionError> {
        Self::new(ndims, SpatialDims::Three)
    }

    /// Replaces the boundary modes of all axes
    pub fn with_boundaries(mut self, boundaries: [BoundaryMode; 3]) -> Self {
        self.boundaries = boundaries;
        self
    }

    /// Returns the number of gridboxes along each axis `(nz, nx, ny)`
    #[inline(always)]
    pub fn ndims(&self) -> [usize; 3] {
        self.ndims
    }

    /// Returns the number of gridboxes along the given axis
    #[inline(always)]
    pub fn ndim(&self, axis: Axis) -> usize {
        self.ndims[axis.dim()]
    }

    /// Returns the total number of gridboxes of the global grid
    #[inline(always)]
    pub fn num_cells(&self) -> usize {
        self.ndims.iter().product()
    }

    /// Returns the boundary modes of all axes
    pub fn boundaries(&self) -> [BoundaryMode; 3] {
        self.boundaries
    }

    /// Returns the boundary mode of the given axis
    #[inline(always)]
    pub fn boundary(&self, axis: Axis) -> BoundaryMode {
        self.boundaries[axis.dim()]
    }

    pub fn spatial_dims(&self) -> SpatialDims {
        self.spatial_dims
    }

    /// Returns whether the given axis is a null axis (not resolved in this configuration)
    #[inline(always)]
    pub fn is_null(&self, axis: Axis) -> bool {
        !self.spatial_dims.is_active(axis)
    }

    /// Returns the stride of the global index along the given axis (`1`, `nz` or `nz * nx`)
    #[inline(always)]
    pub fn increment(&self, axis: Axis) -> usize {
        match axis {
            Axis::Z => 1,
            Axis::X => self.ndims[0],
            Axis::Y => self.ndims[0] * self.ndims[1],
        }
    }

    /// Flattens a global cell coordinate triplet `(k, i, j)` into a global index
    /// ```
    /// use dropletgrid_lib::grid::GridShape;
    /// let shape = GridShape::new_3d([4, 3, 2]).unwrap();
    /// assert_eq!(shape.flatten(&[1, 2, 1]), 1 + 4 * (2 + 3 * 1));
    /// assert_eq!(shape.unflatten(shape.flatten(&[3, 0, 1])), [3, 0, 1]);
    /// ```
    #[inline(always)]
    pub fn flatten(&self, kij: &[usize; 3]) -> usize {
        let [nz, nx, _] = self.ndims;
        kij[0] + nz * (kij[1] + nx * kij[2])
    }

    /// Converts a global index back into a global cell coordinate triplet `(k, i, j)`
    #[inline(always)]
    pub fn unflatten(&self, global_index: usize) -> [usize; 3] {
        let [nz, nx, _] = self.ndims;
        let k = global_index % nz;
        let rest = global_index / nz;
        [k, rest % nx, rest / nx]
    }

    /// Returns whether the triplet is a valid cell coordinate of this grid
    pub fn contains(&self, kij: &[usize; 3]) -> bool {
        (0..3).all(|d| kij[d] < self.ndims[d])
    }
}

impl<R: Real> AxisEdges<R> {
    /// Returns the sorted edge coordinates along the given axis
    pub fn axis(&self, axis: Axis) -> &[R] {
        self.edges[axis.dim()].as_slice()
    }

    /// Returns the lower edge of the domain along the given axis
    pub fn domain_lower(&self, axis: Axis) -> R {
        self.edges[axis.dim()][0]
    }

    /// Returns the upper edge of the domain along the given axis
    pub fn domain_upper(&self, axis: Axis) -> R {
        let edges = &self.edges[axis.dim()];
        edges[edges.len() - 1]
    }

    /// Returns the extent of the domain along the given axis
    pub fn domain_extent(&self, axis: Axis) -> R {
        self.domain_upper(axis) - self.domain_lower(axis)
    }

    /// Returns the `(lower, upper)` bounds of the gridbox with the given coordinate along an axis
    #[inline(always)]
    pub fn cell_bounds(&self, axis: Axis, cell: usize) -> (R, R) {
        let edges = &self.edges[axis.dim()];
        (edges[cell], edges[cell + 1])
    }

    /// Binary search for the gridbox coordinate along `axis` that contains `coord`, restricted to the given range of gridbox coordinates
    ///
    /// Returns `None` if the coordinate lies outside of `[edge(range.start), edge(range.end))`.
    pub fn find_cell_in(&self, axis: Axis, coord: R, range: Range<usize>) -> Option<usize> {
        let edges = &self.edges[axis.dim()];
        if range.is_empty() || !(coord >= edges[range.start] && coord < edges[range.end]) {
            return None;
        }

        let inner = &edges[range.start + 1..=range.end];
        Some(range.start + inner.partition_point(|e| *e <= coord))
    }

    /// Binary search for the gridbox coordinate along `axis` containing `coord` in the whole domain
    pub fn find_cell(&self, axis: Axis, coord: R) -> Option<usize> {
        let n = self.edges[axis.dim()].len() - 1;
        self.find_cell_in(axis, coord, 0..n)
    }
}

impl<R: Real> GridDescription<R> {
    /// Validates the given gridbox bounds against the shape and constructs a description
    ///
    /// The gridboxes may be given in any order. They have to cover every global index exactly once
    /// and form a rectilinear grid, i.e. all gridboxes sharing a coordinate along an axis share
    /// the same bounds on that axis and consecutive gridboxes touch.
    pub fn new(
        shape: GridShape,
        mut gridboxes: Vec<GridboxBounds<R>>,
    ) -> Result<Self, GridDescriptionError> {
        let num_cells = shape.num_cells();

        for gbx in &gridboxes {
            if gbx.global_index >= num_cells {
                return Err(GridDescriptionError::IndexOutOfRange {
                    global_index: gbx.global_index,
                    num_cells,
                });
            }
            for &axis in Axis::all_possible() {
                let d = axis.dim();
                if gbx.upper[d] <= gbx.lower[d] {
                    return Err(GridDescriptionError::DegenerateCell {
                        global_index: gbx.global_index,
                        axis,
                    });
                }
            }
        }

        gridboxes.sort_unstable_by_key(|gbx| gbx.global_index);
        for (expected, gbx) in gridboxes.iter().enumerate() {
            if gbx.global_index < expected {
                return Err(GridDescriptionError::DuplicateCell(gbx.global_index));
            } else if gbx.global_index > expected {
                return Err(GridDescriptionError::MissingCell(expected));
            }
        }
        if gridboxes.len() < num_cells {
            return Err(GridDescriptionError::MissingCell(gridboxes.len()));
        }

        // Edges are taken from the gridboxes on the coordinate lines through the origin
        let edges: [Vec<R>; 3] = std::array::from_fn(|d| {
            let n = shape.ndims[d];
            let mut edges = Vec::with_capacity(n + 1);
            for c in 0..n {
                let mut kij = [0; 3];
                kij[d] = c;
                let gbx = &gridboxes[shape.flatten(&kij)];
                edges.push(gbx.lower[d]);
                if c + 1 == n {
                    edges.push(gbx.upper[d]);
                }
            }
            edges
        });

        for gbx in &gridboxes {
            let kij = shape.unflatten(gbx.global_index);
            for &axis in Axis::all_possible() {
                let d = axis.dim();
                let c = kij[d];
                if gbx.lower[d] != edges[d][c] || gbx.upper[d] != edges[d][c + 1] {
                    return Err(GridDescriptionError::InconsistentBounds {
                        global_index: gbx.global_index,
                        axis,
                    });
                }
            }
        }

        Ok(Self {
            shape,
            gridboxes,
            edges: AxisEdges { edges },
        })
    }

    /// Constructs a description of evenly spaced gridboxes filling the given domain
    /// ```
    /// use dropletgrid_lib::grid::{GridDescription, GridShape};
    /// use dropletgrid_lib::topology::Axis;
    /// use dropletgrid_lib::Aabb3d;
    /// use nalgebra::Vector3;
    ///
    /// let shape = GridShape::new_3d([4, 2, 2]).unwrap();
    /// let domain = Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(100.0, 50.0, 50.0));
    /// let description = GridDescription::<f64>::uniform(shape, &domain).unwrap();
    /// assert_eq!(description.edges().axis(Axis::Z), &[0.0, 25.0, 50.0, 75.0, 100.0]);
    /// ```
    pub fn uniform(shape: GridShape, domain: &Aabb3d<R>) -> Result<Self, GridDescriptionError> {
        if !domain.is_non_degenerate() {
            return Err(GridDescriptionError::DegenerateDomain);
        }

        let edges: [Vec<R>; 3] = std::array::from_fn(|d| domain.uniform_edges(d, shape.ndims[d]));

        let gridboxes = (0..shape.num_cells())
            .map(|global_index| {
                let kij = shape.unflatten(global_index);
                GridboxBounds {
                    global_index,
                    lower: std::array::from_fn(|d| edges[d][kij[d]]),
                    upper: std::array::from_fn(|d| edges[d][kij[d] + 1]),
                }
            })
            .collect();

        Ok(Self {
            shape,
            gridboxes,
            edges: AxisEdges { edges },
        })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    /// Returns all gridboxes sorted by global index
    pub fn gridboxes(&self) -> &[GridboxBounds<R>] {
        self.gridboxes.as_slice()
    }

    /// Returns the per-axis edge coordinates of the grid
    pub fn edges(&self) -> &AxisEdges<R> {
        &self.edges
    }

    /// Returns the bounds of the gridbox with the given global index
    pub fn gridbox(&self, global_index: usize) -> Option<&GridboxBounds<R>> {
        self.gridboxes.get(global_index)
    }

    /// Returns the bounding box of the whole domain
    pub fn domain(&self) -> Aabb3d<R> {
        let lower = nalgebra::Vector3::from_fn(|d, _| self.edges.domain_lower(Axis::from_dim(d)));
        let upper = nalgebra::Vector3::from_fn(|d, _| self.edges.domain_upper(Axis::from_dim(d)));
        Aabb3d::new(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn unit_domain() -> Aabb3d<f64> {
        Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_flatten_roundtrip() {
        let shape = GridShape::new_3d([3, 4, 5]).unwrap();
        for g in 0..shape.num_cells() {
            assert_eq!(shape.flatten(&shape.unflatten(g)), g);
        }
        assert_eq!(shape.increment(Axis::Y), 12);
    }

    #[test]
    fn test_null_axis_validation() {
        assert!(GridShape::new([10, 1, 1], SpatialDims::One).is_ok());
        assert_eq!(
            GridShape::new([10, 2, 1], SpatialDims::One),
            Err(GridDescriptionError::NullAxisWithCells {
                axis: Axis::X,
                num_cells: 2
            })
        );
        assert_eq!(
            GridShape::new([0, 2, 1], SpatialDims::Three),
            Err(GridDescriptionError::EmptyAxis([0, 2, 1]))
        );
    }

    #[test]
    fn test_find_cell_half_open() {
        let shape = GridShape::new_3d([4, 1, 1]).unwrap();
        let description = GridDescription::uniform(shape, &unit_domain()).unwrap();
        let edges = description.edges();
        assert_eq!(edges.find_cell(Axis::Z, 0.0), Some(0));
        assert_eq!(edges.find_cell(Axis::Z, 0.25), Some(1));
        assert_eq!(edges.find_cell(Axis::Z, 0.999), Some(3));
        assert_eq!(edges.find_cell(Axis::Z, 1.0), None);
        assert_eq!(edges.find_cell(Axis::Z, -0.1), None);
        assert_eq!(edges.find_cell_in(Axis::Z, 0.1, 2..4), None);
        assert_eq!(edges.find_cell_in(Axis::Z, 0.6, 2..4), Some(2));
    }

    #[test]
    fn test_description_validation() {
        let shape = GridShape::new_3d([2, 1, 1]).unwrap();
        let a = GridboxBounds {
            global_index: 0,
            lower: [0.0, 0.0, 0.0],
            upper: [1.0, 1.0, 1.0],
        };
        let b = GridboxBounds {
            global_index: 1,
            lower: [1.0, 0.0, 0.0],
            upper: [2.0, 1.0, 1.0],
        };
        assert!(GridDescription::new(shape, vec![b.clone(), a.clone()]).is_ok());
        assert_eq!(
            GridDescription::new(shape, vec![a.clone(), a.clone()]),
            Err(GridDescriptionError::DuplicateCell(0))
        );
        assert_eq!(
            GridDescription::new(shape, vec![a.clone()]),
            Err(GridDescriptionError::MissingCell(1))
        );

        let shifted = GridboxBounds {
            lower: [1.0, 0.5, 0.0],
            upper: [2.0, 1.5, 1.0],
            ..b
        };
        assert_eq!(
            GridDescription::new(shape, vec![a, shifted]),
            Err(GridDescriptionError::InconsistentBounds {
                global_index: 1,
                axis: Axis::X
            })
        );
    }
}
