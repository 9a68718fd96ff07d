//! Superdroplets and the fixed-capacity per-rank superdroplet buffer

use log::debug;
use nalgebra::Vector3;

use crate::Real;
use crate::cell_map::{CellRef, GridboxMap};
use crate::decomposition::LocateResult;
use crate::transport::TransportError;

/// Globally unique identity of a superdroplet
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct SuperdropletId(pub u64);

/// Payload of a superdroplet that is carried along but not interpreted by motion or transport
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct SuperdropletAttributes<R: Real> {
    /// Number of real droplets represented by the superdroplet
    pub multiplicity: u64,
    pub radius: R,
    pub solute_mass: R,
}

/// A superdroplet with its current owner and position
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Superdroplet<R: Real> {
    pub cell: CellRef,
    /// Position `(z, x, y)`
    pub coords: Vector3<R>,
    pub attributes: SuperdropletAttributes<R>,
    pub id: SuperdropletId,
}

impl<R: Real> Superdroplet<R> {
    /// Constructs a superdroplet that is not yet assigned to a gridbox
    pub fn new(id: SuperdropletId, coords: Vector3<R>, attributes: SuperdropletAttributes<R>) -> Self {
        Self {
            cell: CellRef::OutOfDomain,
            coords,
            attributes,
            id,
        }
    }

    /// Placeholder stored in unused slots of a [`SuperdropletBuffer`]
    fn vacant() -> Self {
        Self::new(SuperdropletId::default(), Vector3::zeros(), Default::default())
    }
}

/// Fixed-capacity storage of the superdroplets of one rank
///
/// The first `num_resident` slots hold the resident superdroplets. All slots behind them are
/// vacant and carry [`CellRef::OutOfDomain`]. The capacity never changes after construction.
#[derive(Clone, Debug)]
pub struct SuperdropletBuffer<R: Real> {
    slots: Vec<Superdroplet<R>>,
    num_resident: usize,
}

impl<R: Real> SuperdropletBuffer<R> {
    /// Creates an empty buffer with the given fixed capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Superdroplet::vacant(); capacity],
            num_resident: 0,
        }
    }

    /// Creates a buffer from an initial population, keeping only the superdroplets located on this rank
    ///
    /// Positions on periodic axes are folded into the domain. Superdroplets that belong to other
    /// ranks or lie outside of the domain are skipped.
    pub fn from_population<M, I>(
        map: &M,
        capacity: usize,
        population: I,
    ) -> Result<Self, TransportError>
    where
        M: GridboxMap<R>,
        I: IntoIterator<Item = Superdroplet<R>>,
    {
        let mut buffer = Self::with_capacity(capacity);
        let mut skipped = 0;
        for mut drop in population {
            match map.locate(&drop.coords) {
                LocateResult::LocalCell { index, position } => {
                    drop.cell = CellRef::Local(index);
                    drop.coords = position;
                    buffer.push(drop)?;
                }
                _ => skipped += 1,
            }
        }

        debug!(
            "Rank {} initialized {} superdroplets ({} not owned by this rank)",
            map.my_rank(),
            buffer.num_resident(),
            skipped
        );
        Ok(buffer)
    }

    /// Appends a superdroplet behind the resident region, fails if the buffer is full
    pub fn push(&mut self, drop: Superdroplet<R>) -> Result<(), TransportError> {
        if self.num_resident == self.slots.len() {
            return Err(TransportError::CapacityExceeded {
                rank: None,
                required: self.num_resident + 1,
                capacity: self.slots.len(),
            });
        }
        self.slots[self.num_resident] = drop;
        self.num_resident += 1;
        Ok(())
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn num_resident(&self) -> usize {
        self.num_resident
    }

    /// Number of vacant slots
    pub fn free_capacity(&self) -> usize {
        self.slots.len() - self.num_resident
    }

    /// The resident superdroplets
    pub fn resident(&self) -> &[Superdroplet<R>] {
        &self.slots[..self.num_resident]
    }

    /// Mutable access to the resident superdroplets
    pub fn resident_mut(&mut self) -> &mut [Superdroplet<R>] {
        &mut self.slots[..self.num_resident]
    }

    /// All slots including the vacant ones
    pub fn slots(&self) -> &[Superdroplet<R>] {
        self.slots.as_slice()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Superdroplet<R>] {
        self.slots.as_mut_slice()
    }

    pub(crate) fn set_num_resident(&mut self, num_resident: usize) {
        debug_assert!(num_resident <= self.slots.len());
        self.num_resident = num_resident;
    }

    /// Marks every slot behind the resident region as vacant
    pub(crate) fn clear_vacant(&mut self) {
        for slot in &mut self.slots[self.num_resident..] {
            slot.cell = CellRef::OutOfDomain;
        }
    }

    /// Number of resident superdroplets in a local gridbox
    pub fn num_local(&self) -> usize {
        self.resident().iter().filter(|d| d.cell.is_local()).count()
    }

    /// Number of resident superdroplets waiting to be sent to another rank
    pub fn num_remote(&self) -> usize {
        self.resident()
            .iter()
            .filter(|d| d.cell.remote_rank().is_some())
            .count()
    }

    /// Sum of the multiplicities of the resident superdroplets that are still inside of the domain
    pub fn total_multiplicity(&self) -> u64 {
        self.resident()
            .iter()
            .filter(|d| !d.cell.is_out_of_domain())
            .map(|d| d.attributes.multiplicity)
            .sum()
    }
}
