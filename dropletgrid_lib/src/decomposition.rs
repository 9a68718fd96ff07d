//! Decomposition of the global grid into contiguous partitions, one per rank
//!
//! The process count is written as a product `fz * fx * fy` of slices along each axis. Every
//! rank owns the block of gridboxes of one slice triplet. Remainder gridboxes of an axis are
//! assigned to the lowest indexed slices, so partition sizes along an axis differ by at most one.

use std::ops::Range;

use arrayvec::ArrayVec;
use itertools::Itertools;
use log::{debug, info, trace};
use nalgebra::Vector3;
use num_integer::Integer;
use thiserror::Error as ThisError;

use crate::grid::{AxisEdges, BoundaryMode, GridShape};
use crate::topology::{Axis, SliceOffset};
use crate::{Real, profile};

/// Errors that can occur when decomposing the grid
#[derive(Clone, PartialEq, Eq, Debug, ThisError)]
#[non_exhaustive]
pub enum DecompositionError {
    /// At least one process is required
    #[error("the process count has to be at least one")]
    ZeroProcesses,
    /// The rank is not smaller than the process count
    #[error("rank {rank} is out of range for {process_count} processes")]
    RankOutOfRange { rank: usize, process_count: usize },
    /// No factorization of the process count fits onto the grid
    #[error(
        "{process_count} processes cannot be tiled onto a grid of {ndims:?} gridboxes (no factor triplet fits the number of gridboxes per axis)"
    )]
    NoValidFactorization {
        process_count: usize,
        ndims: [usize; 3],
    },
}

/// Result of locating a physical position in the decomposed domain
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum LocateResult<R: Real> {
    /// The position lies in the local gridbox with the given index, `position` has been folded into the domain
    LocalCell { index: usize, position: Vector3<R> },
    /// The position lies in the partition of another rank, `position` has been folded into the domain
    RemoteRank { rank: usize, position: Vector3<R> },
    /// The position left the domain through a finite boundary
    OutOfDomain,
}

/// Partitioning of the global grid among all ranks, seen from one rank
#[derive(Clone, Debug)]
pub struct Decomposition {
    shape: GridShape,
    process_count: usize,
    my_rank: usize,
    factorization: [usize; 3],
    origins: Vec<[usize; 3]>,
    sizes: Vec<[usize; 3]>,
    /// Ranks of the slices around this rank, indexed by [`SliceOffset::to_usize`]
    neighbors: [usize; 27],
}

/// Number of cells of every slice along one axis split into `factor` slices
fn slice_lengths(num_cells: usize, factor: usize) -> impl Iterator<Item = usize> {
    let (base, remainder) = num_cells.div_rem(&factor);
    (0..factor).map(move |s| base + usize::from(s < remainder))
}

/// Origin and size of slice `s` of an axis with `num_cells` gridboxes split into `factor` slices
#[inline(always)]
fn slice_extent(num_cells: usize, factor: usize, s: usize) -> (usize, usize) {
    let (base, remainder) = num_cells.div_rem(&factor);
    let origin = s * base + s.min(remainder);
    let size = base + usize::from(s < remainder);
    (origin, size)
}

/// Index of the slice containing gridbox coordinate `c` (inverse of [`slice_extent`])
#[inline(always)]
fn slice_containing(num_cells: usize, factor: usize, c: usize) -> usize {
    let (base, remainder) = num_cells.div_rem(&factor);
    let wide = remainder * (base + 1);
    if c < wide {
        c / (base + 1)
    } else {
        remainder + (c - wide) / base
    }
}

/// Score of a factorization: the summed deviation of all partitions from the ideal partition size, weighted by the vertical factor
///
/// Deviations are scaled by the process count to stay in integer arithmetic.
fn factorization_score(ndims: &[usize; 3], factors: &[usize; 3]) -> u128 {
    let process_count = factors.iter().product::<usize>() as u128;
    let total = ndims.iter().product::<usize>() as u128;

    let mut deviation = 0u128;
    for lz in slice_lengths(ndims[0], factors[0]) {
        for lx in slice_lengths(ndims[1], factors[1]) {
            for ly in slice_lengths(ndims[2], factors[2]) {
                let cells = (lz * lx * ly) as u128 * process_count;
                deviation += cells.abs_diff(total);
            }
        }
    }

    deviation * factors[0] as u128
}

/// Enumerates all ordered factor triplets of `process_count` in lexicographic `(fz, fx, fy)` order
fn factor_triplets(process_count: usize) -> impl Iterator<Item = [usize; 3]> {
    (1..=process_count)
        .filter(move |fz| process_count % fz == 0)
        .flat_map(move |fz| {
            let rest = process_count / fz;
            (1..=rest)
                .filter(move |fx| rest % fx == 0)
                .map(move |fx| [fz, fx, rest / fx])
        })
}

/// Selects the factorization with the smallest score, ties are resolved in favor of the first candidate in enumeration order
pub fn choose_factorization(
    ndims: &[usize; 3],
    process_count: usize,
) -> Result<[usize; 3], DecompositionError> {
    if process_count == 0 {
        return Err(DecompositionError::ZeroProcesses);
    }
    if process_count == 1 {
        return Ok([1, 1, 1]);
    }

    let mut best: Option<([usize; 3], u128)> = None;
    for factors in factor_triplets(process_count) {
        if (0..3).any(|d| factors[d] > ndims[d]) {
            continue;
        }

        let score = factorization_score(ndims, &factors);
        trace!("Factorization candidate {:?} has score {}", factors, score);
        if best.is_none_or(|(_, best_score)| score < best_score) {
            best = Some((factors, score));
        }
    }

    best.map(|(factors, _)| factors)
        .ok_or(DecompositionError::NoValidFactorization {
            process_count,
            ndims: *ndims,
        })
}

impl Decomposition {
    /// Computes the decomposition of the grid among `process_count` ranks as seen from `my_rank`
    pub fn build(
        shape: GridShape,
        process_count: usize,
        my_rank: usize,
    ) -> Result<Self, DecompositionError> {
        profile!("Decomposition::build");

        if process_count == 0 {
            return Err(DecompositionError::ZeroProcesses);
        }
        if my_rank >= process_count {
            return Err(DecompositionError::RankOutOfRange {
                rank: my_rank,
                process_count,
            });
        }

        let ndims = shape.ndims();
        let factorization = choose_factorization(&ndims, process_count)?;

        let mut origins = Vec::with_capacity(process_count);
        let mut sizes = Vec::with_capacity(process_count);
        for rank in 0..process_count {
            let slice = slice_of_rank(&factorization, rank);
            let mut origin = [0; 3];
            let mut size = [0; 3];
            for d in 0..3 {
                (origin[d], size[d]) = slice_extent(ndims[d], factorization[d], slice[d]);
            }
            origins.push(origin);
            sizes.push(size);
        }

        let mut decomposition = Self {
            shape,
            process_count,
            my_rank,
            factorization,
            origins,
            sizes,
            neighbors: [my_rank; 27],
        };

        for offset in SliceOffset::all_neighbors() {
            decomposition.neighbors[offset.to_usize()] =
                decomposition.compute_neighbor_rank(my_rank, offset);
        }

        decomposition.log_summary();
        Ok(decomposition)
    }

    fn log_summary(&self) {
        let [fz, fx, fy] = self.factorization;
        let cells_per_rank = self
            .sizes
            .iter()
            .map(|s| s.iter().product::<usize>())
            .collect::<Vec<_>>();
        let min_cells = cells_per_rank.iter().min().copied().unwrap_or(0);
        let max_cells = cells_per_rank.iter().max().copied().unwrap_or(0);

        info!(
            "Decomposition of {:?} gridboxes among {} processes: {}x{}x{} slices (z, x, y)",
            self.shape.ndims(),
            self.process_count,
            fz,
            fx,
            fy
        );
        info!(
            "Gridboxes per rank: min {}, max {}, local (rank {}): {}",
            min_cells,
            max_cells,
            self.my_rank,
            self.local_cell_count()
        );
        debug!(
            "Rank {} owns partition origin {:?}, size {:?}",
            self.my_rank,
            self.partition_origin(self.my_rank),
            self.partition_size(self.my_rank)
        );
        for offset in SliceOffset::all_neighbors() {
            trace!(
                "Rank {} neighbor {:?}: {}",
                self.my_rank,
                offset.components(),
                self.neighbor_rank(offset)
            );
        }
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn process_count(&self) -> usize {
        self.process_count
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    /// Returns the number of slices along each axis `(fz, fx, fy)`
    pub fn factorization(&self) -> [usize; 3] {
        self.factorization
    }

    /// Returns the origin (global gridbox coordinates) of the partition of the given rank
    pub fn partition_origin(&self, rank: usize) -> [usize; 3] {
        self.origins[rank]
    }

    /// Returns the number of gridboxes along each axis of the partition of the given rank
    pub fn partition_size(&self, rank: usize) -> [usize; 3] {
        self.sizes[rank]
    }

    /// Returns the range of global gridbox coordinates along `axis` covered by this rank
    pub fn partition_range(&self, axis: Axis) -> Range<usize> {
        let d = axis.dim();
        let origin = self.origins[self.my_rank][d];
        origin..origin + self.sizes[self.my_rank][d]
    }

    /// Returns the number of gridboxes owned by this rank
    pub fn local_cell_count(&self) -> usize {
        self.sizes[self.my_rank].iter().product()
    }

    /// Returns the slice triplet `(sz, sx, sy)` of the given rank
    pub fn slice_of(&self, rank: usize) -> [usize; 3] {
        slice_of_rank(&self.factorization, rank)
    }

    /// Returns the rank that owns the given slice triplet
    pub fn rank_of_slice(&self, slice: &[usize; 3]) -> usize {
        let [_, fx, fy] = self.factorization;
        slice[0] * fx * fy + slice[1] * fy + slice[2]
    }

    /// Converts a local gridbox index of this rank into a global gridbox index
    pub fn local_to_global(&self, local_index: usize) -> usize {
        let [sz, sx, _] = self.sizes[self.my_rank];
        let origin = self.origins[self.my_rank];
        let local = [
            local_index % sz,
            (local_index / sz) % sx,
            local_index / (sz * sx),
        ];
        self.shape.flatten(&[
            origin[0] + local[0],
            origin[1] + local[1],
            origin[2] + local[2],
        ])
    }

    /// Converts a global gridbox index into the local index of this rank, returns `None` if the gridbox is owned by another rank
    pub fn global_to_local(&self, global_index: usize) -> Option<usize> {
        if global_index >= self.shape.num_cells() {
            return None;
        }
        self.global_coords_to_local(&self.shape.unflatten(global_index))
    }

    /// Converts global gridbox coordinates into the local index of this rank, returns `None` if the gridbox is owned by another rank
    pub fn global_coords_to_local(&self, kij: &[usize; 3]) -> Option<usize> {
        let origin = self.origins[self.my_rank];
        let [sz, sx, sy] = self.sizes[self.my_rank];

        let lk = kij[0].checked_sub(origin[0]).filter(|&k| k < sz)?;
        let li = kij[1].checked_sub(origin[1]).filter(|&i| i < sx)?;
        let lj = kij[2].checked_sub(origin[2]).filter(|&j| j < sy)?;
        Some(lk + sz * (li + sx * lj))
    }

    /// Returns the rank owning the gridbox with the given global coordinates
    pub fn rank_owning_cell(&self, kij: &[usize; 3]) -> usize {
        let ndims = self.shape.ndims();
        let slice: [usize; 3] =
            std::array::from_fn(|d| slice_containing(ndims[d], self.factorization[d], kij[d]));
        self.rank_of_slice(&slice)
    }

    /// Returns the rank owning the gridbox with the given global index
    pub fn rank_owning_global(&self, global_index: usize) -> usize {
        self.rank_owning_cell(&self.shape.unflatten(global_index))
    }

    /// Returns the rank of the slice adjacent to this rank in the given direction
    ///
    /// Slice adjacency always wraps around, independent of the boundary mode of the axis.
    #[inline(always)]
    pub fn neighbor_rank(&self, offset: SliceOffset) -> usize {
        self.neighbors[offset.to_usize()]
    }

    /// Returns the distinct ranks adjacent to this rank, excluding this rank itself, in ascending order
    pub fn distinct_neighbor_ranks(&self) -> ArrayVec<usize, { SliceOffset::NUM_NEIGHBORS }> {
        SliceOffset::all_neighbors()
            .map(|offset| self.neighbor_rank(offset))
            .filter(|&rank| rank != self.my_rank)
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Computes the rank of the slice adjacent to `rank` in the given direction
    pub fn compute_neighbor_rank(&self, rank: usize, offset: SliceOffset) -> usize {
        let slice = self.slice_of(rank);
        let offset = offset.components();
        let neighbor: [usize; 3] = std::array::from_fn(|d| {
            let f = self.factorization[d] as isize;
            (slice[d] as isize + offset[d] as isize).rem_euclid(f) as usize
        });
        self.rank_of_slice(&neighbor)
    }

    #[inline(always)]
    pub fn boundary_mode(&self, axis: Axis) -> BoundaryMode {
        self.shape.boundary(axis)
    }

    /// Returns the `(lower, upper)` physical bounds of the whole domain along `axis`
    pub fn domain_bounds<R: Real>(&self, edges: &AxisEdges<R>, axis: Axis) -> (R, R) {
        (edges.domain_lower(axis), edges.domain_upper(axis))
    }

    /// Determines the gridbox and the rank that own the given physical position
    ///
    /// Coordinates outside of the domain on a periodic axis are folded back into the domain.
    /// Coordinates outside of the domain on a finite axis yield [`LocateResult::OutOfDomain`].
    /// Null axes are ignored, every coordinate on a null axis belongs to its single gridbox.
    pub fn locate<R: Real>(&self, edges: &AxisEdges<R>, position: &Vector3<R>) -> LocateResult<R> {
        let mut position = *position;
        let mut kij = [0usize; 3];

        for &axis in Axis::all_possible() {
            if self.shape.is_null(axis) {
                continue;
            }

            let d = axis.dim();
            let (lower, upper) = self.domain_bounds(edges, axis);
            if !(position[d] >= lower && position[d] < upper) {
                match self.boundary_mode(axis) {
                    BoundaryMode::Finite => return LocateResult::OutOfDomain,
                    BoundaryMode::Periodic => {
                        position[d] = fold_periodic(position[d], lower, upper)
                    }
                }
            }

            kij[d] = match edges.find_cell(axis, position[d]) {
                Some(c) => c,
                None => return LocateResult::OutOfDomain,
            };
        }

        let rank = self.rank_owning_cell(&kij);
        match self.global_coords_to_local(&kij) {
            Some(index) if rank == self.my_rank => LocateResult::LocalCell { index, position },
            _ => LocateResult::RemoteRank { rank, position },
        }
    }
}

/// Folds a coordinate outside of `[lower, upper)` back into the interval
pub fn fold_periodic<R: Real>(coord: R, lower: R, upper: R) -> R {
    let extent = upper - lower;
    let mut folded = if coord < lower {
        coord + extent
    } else {
        coord - extent
    };

    if !(folded >= lower && folded < upper) {
        folded = coord - extent * ((coord - lower) / extent).floor();
    }
    // Rounding may place the result on the excluded upper edge
    if folded >= upper || folded < lower {
        folded = lower;
    }
    folded
}

#[inline(always)]
fn slice_of_rank(factorization: &[usize; 3], rank: usize) -> [usize; 3] {
    let [_, fx, fy] = *factorization;
    [rank / (fx * fy), (rank / fy) % fx, rank % fy]
}
