#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! Library for the spatial domain decomposition and cross-rank transport of superdroplets in
//! distributed particle-in-cell cloud simulations.
//!
//! The global grid of gridboxes is decomposed among all ranks with [`Decomposition::build`]. The
//! [`CellMap`] of a rank provides the bounds and face neighbors of its gridboxes. After
//! superdroplets moved, [`motion::advance`] updates their owning gridbox and
//! [`transport::run_transport_cycle`] moves superdroplets owned by other ranks to these ranks.
//! [`DistributedDomain`] bundles everything a rank needs for a simulation step.
//!
//! ## Feature flags
//! The following features are all non-default features to reduce the amount of additional dependencies.
//!
//! - **`io`**: Enables the [`io`] module with a reader for JSON grid descriptions. Adds a dependency on `serde_json`.
//! - **`profiling`**: Enables profiling of internal functions. The resulting data can be displayed using the functions
//!   from the [`profiling`] module of this crate. Adds dependencies to `thread_local` and `parking_lot`.
//!

/// Re-export the version of `nalgebra` used by this crate
pub use nalgebra;

#[cfg(feature = "profiling")]
#[cfg_attr(doc_cfg, doc(cfg(feature = "profiling")))]
pub mod profiling;
#[doc(hidden)]
pub mod profiling_macro;

mod aabb;
/// Boundary conditions applied to superdroplets leaving the domain
pub mod boundary;
/// Per-rank gridbox bounds, neighbors, areas and volumes
pub mod cell_map;
/// Message passing between ranks
pub mod comm;
/// Decomposition of the global grid among ranks
pub mod decomposition;
pub mod domain;
/// Global grid shape, boundary modes and gridbox descriptions
pub mod grid;
#[cfg(feature = "io")]
#[cfg_attr(doc_cfg, doc(cfg(feature = "io")))]
pub mod io;
/// Motion of superdroplets and the update of their owning gridbox
pub mod motion;
/// Wire format of superdroplets exchanged between ranks
pub mod record;
pub mod superdroplet;
/// Helper types for cartesian coordinate system topology
pub mod topology;
mod traits;
/// Exchange of superdroplets between ranks
pub mod transport;

use thiserror::Error as ThisError;

pub use aabb::{Aabb3d, AxisAlignedBoundingBox};
pub use cell_map::{CellMap, CellRef, GridboxMap};
pub use comm::{CommError, Communicator, SingleProcessComm, ThreadComm, ThreadCommWorld};
pub use decomposition::{Decomposition, DecompositionError, LocateResult};
pub use domain::{DistributedDomain, StepSummary};
pub use grid::{BoundaryMode, GridDescription, GridDescriptionError, GridShape, SpatialDims};
pub use motion::MotionError;
pub use superdroplet::{Superdroplet, SuperdropletAttributes, SuperdropletBuffer, SuperdropletId};
pub use traits::{Real, ThreadSafe};
pub use transport::{TransportError, TransportSummary};

pub(crate) type HashState = fxhash::FxBuildHasher;
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;
pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

/// Parameters of a domain with evenly spaced gridboxes
#[derive(Clone, Debug)]
pub struct DomainParameters<R: Real> {
    /// Shape of the global grid including the boundary mode of every axis
    pub shape: GridShape,
    /// Physical extent of the domain `(z, x, y)`
    pub domain: Aabb3d<R>,
    /// Capacity of the superdroplet buffer of every rank
    pub capacity: usize,
}

impl<R: Real> DomainParameters<R> {
    /// Tries to convert the parameters from one [Real] type to another [Real] type, returns None if conversion fails
    pub fn try_convert<T: Real>(&self) -> Option<DomainParameters<T>> {
        Some(DomainParameters {
            shape: self.shape,
            domain: self.domain.try_convert()?,
            capacity: self.capacity,
        })
    }
}

/// Error type returned when a step of the distributed domain fails
///
/// All errors are fatal for the run. In particular, none of them should be downgraded to a
/// warning as ranks would continue with diverging state.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum DomainError {
    /// The grid shape or the gridbox description is invalid
    #[error("grid description: {0}")]
    GridDescription(GridDescriptionError),
    /// The grid cannot be decomposed among the ranks
    #[error("decomposition: {0}")]
    Decomposition(DecompositionError),
    /// Communication between the ranks failed
    #[error("communication: {0}")]
    Comm(CommError),
    /// A superdroplet moved too far within a step
    #[error("motion: {0}")]
    Motion(MotionError),
    /// The exchange of superdroplets between the ranks failed
    #[error("transport: {0}")]
    Transport(TransportError),
    /// Any error that is not represented by some other explicit variant
    #[error("unknown error")]
    Unknown(anyhow::Error),
}

impl From<GridDescriptionError> for DomainError {
    /// Allows automatic conversion of a [GridDescriptionError] to a [DomainError]
    fn from(error: GridDescriptionError) -> Self {
        DomainError::GridDescription(error)
    }
}

impl From<DecompositionError> for DomainError {
    /// Allows automatic conversion of a [DecompositionError] to a [DomainError]
    fn from(error: DecompositionError) -> Self {
        DomainError::Decomposition(error)
    }
}

impl From<CommError> for DomainError {
    fn from(error: CommError) -> Self {
        DomainError::Comm(error)
    }
}

impl From<MotionError> for DomainError {
    fn from(error: MotionError) -> Self {
        DomainError::Motion(error)
    }
}

impl From<TransportError> for DomainError {
    /// Allows automatic conversion of a [TransportError] to a [DomainError]
    fn from(error: TransportError) -> Self {
        DomainError::Transport(error)
    }
}

impl From<anyhow::Error> for DomainError {
    /// Allows automatic conversion of an anyhow::Error to a [DomainError]
    fn from(error: anyhow::Error) -> Self {
        DomainError::Unknown(error)
    }
}

/// Initializes the global thread pool used by this library with the given parameters.
///
/// Initialization of the global thread pool happens exactly once.
/// Therefore, if you call `initialize_thread_pool` a second time, it will return an error.
/// An `Ok` result indicates that this is the first initialization of the thread pool.
pub fn initialize_thread_pool(num_threads: usize) -> Result<(), anyhow::Error> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}
