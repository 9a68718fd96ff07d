//! The distributed domain of one rank: communicator and gridbox map bundled into one context

use log::info;
use nalgebra::Vector3;

use crate::boundary::BoundaryConditions;
use crate::cell_map::{CellMap, CellRef, GridboxMap};
use crate::comm::Communicator;
use crate::decomposition::{Decomposition, LocateResult};
use crate::grid::GridDescription;
use crate::motion::{Motion, advance, move_superdroplets};
use crate::superdroplet::{Superdroplet, SuperdropletBuffer};
use crate::transport::{TransportSummary, run_transport_cycle};
use crate::{DomainError, DomainParameters, Real, profile};

/// Statistics of one step of a rank
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct StepSummary {
    /// Number of superdroplets re-inserted by the boundary conditions
    pub reinserted: usize,
    pub transport: TransportSummary,
}

/// Communicator and gridbox map of one rank
///
/// Every component that needs rank information receives it through this context, there is no
/// global communication state.
pub struct DistributedDomain<R: Real, C: Communicator> {
    comm: C,
    map: CellMap<R>,
}

impl<R: Real, C: Communicator> DistributedDomain<R, C> {
    /// Decomposes the described grid among the ranks of the communicator and builds the local gridbox map
    pub fn new(comm: C, description: &GridDescription<R>) -> Result<Self, DomainError> {
        profile!("DistributedDomain::new");

        let decomposition =
            Decomposition::build(*description.shape(), comm.size(), comm.rank())?;
        let map = CellMap::build(decomposition, description)?;
        Ok(Self { comm, map })
    }

    /// Builds a domain with evenly spaced gridboxes from the given parameters
    pub fn from_parameters(comm: C, parameters: &DomainParameters<R>) -> Result<Self, DomainError> {
        let description = GridDescription::uniform(parameters.shape, &parameters.domain)?;
        Self::new(comm, &description)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn map(&self) -> &CellMap<R> {
        &self.map
    }

    pub fn decomposition(&self) -> &Decomposition {
        self.map.decomposition()
    }

    /// Determines the owner of a physical position
    pub fn locate(&self, position: &Vector3<R>) -> LocateResult<R> {
        self.map.locate(position)
    }

    /// Updates the owner of a superdroplet after its position changed, see [`advance`]
    pub fn advance(
        &self,
        cell: CellRef,
        position: Vector3<R>,
    ) -> Result<(CellRef, Vector3<R>), DomainError> {
        Ok(advance(&self.map, cell, position)?)
    }

    /// Creates the superdroplet buffer of this rank from a population, keeping only the local superdroplets
    pub fn populate<I>(&self, capacity: usize, population: I) -> Result<SuperdropletBuffer<R>, DomainError>
    where
        I: IntoIterator<Item = Superdroplet<R>>,
    {
        Ok(SuperdropletBuffer::from_population(
            &self.map, capacity, population,
        )?)
    }

    /// Performs one step: motion, boundary conditions and a transport cycle
    ///
    /// Has to be called collectively by all ranks.
    pub fn step<Mo, B>(
        &self,
        motion: &Mo,
        boundary: &B,
        buffer: &mut SuperdropletBuffer<R>,
        dt: R,
    ) -> Result<StepSummary, DomainError>
    where
        Mo: Motion<R>,
        B: BoundaryConditions<R>,
    {
        profile!("DistributedDomain::step");

        move_superdroplets(&self.map, motion, buffer, dt)?;
        let reinserted = boundary.apply(&self.map, buffer);
        let transport = run_transport_cycle(&self.comm, &self.map, buffer)?;
        Ok(StepSummary {
            reinserted,
            transport,
        })
    }

    /// Sums the number of resident superdroplets and their multiplicities over all ranks
    ///
    /// Has to be called collectively by all ranks.
    pub fn global_totals(&self, buffer: &SuperdropletBuffer<R>) -> Result<(u64, u64), DomainError> {
        let gathered = self.comm.all_gather(&[
            buffer.num_resident() as u64,
            buffer.total_multiplicity(),
        ])?;
        let totals = gathered
            .chunks_exact(2)
            .fold((0, 0), |(n, m), row| (n + row[0], m + row[1]));
        Ok(totals)
    }

    /// Logs the decomposition as seen from this rank
    pub fn log_info(&self) {
        let decomposition = self.decomposition();
        info!(
            "Rank {}/{}: {} local gridboxes, partition origin {:?}, size {:?}",
            self.comm.rank(),
            self.comm.size(),
            self.map.num_local_cells(),
            decomposition.partition_origin(decomposition.my_rank()),
            decomposition.partition_size(decomposition.my_rank())
        );
    }
}
