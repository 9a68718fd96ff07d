//! Exchange of superdroplets between ranks
//!
//! A transport cycle moves every resident superdroplet tagged with [`CellRef::Remote`] to its
//! target rank:
//!  1. The resident superdroplets are sorted by [`CellRef`], so local superdroplets come first,
//!     followed by the outbound superdroplets grouped by target rank and finally those that
//!     left the domain.
//!  2. All ranks gather the outbound counts of every rank together with their capacities.
//!  3. Every rank checks whether any rank would overflow its buffer. All ranks evaluate the same
//!     data, so either all ranks continue or all ranks fail.
//!  4. One record batch per peer is sent and received.
//!  5. Arrivals are located again and placed behind the local superdroplets.
//!  6. All slots behind the new resident region are marked as vacant.

use log::{debug, error, trace};
use rayon::prelude::*;
use thiserror::Error as ThisError;

use crate::cell_map::{CellRef, GridboxMap};
use crate::comm::{CommError, Communicator, Tag, Wait};
use crate::decomposition::LocateResult;
use crate::record::{ParticleRecord, RecordError, decode_batch, encode_batch, encoded_len};
use crate::superdroplet::SuperdropletBuffer;
use crate::{Real, profile};

/// Tag of the record batch messages
pub const TRANSPORT_TAG: Tag = 1;

/// Errors that can occur during a transport cycle
///
/// All of them are fatal for the run: after a failed cycle the ownership of the superdroplets
/// that were in flight is undefined.
#[derive(Clone, PartialEq, Debug, ThisError)]
#[non_exhaustive]
pub enum TransportError {
    /// A superdroplet buffer is too small for the superdroplets it has to hold
    #[error(
        "superdroplet buffer{} is too small: {required} superdroplets have to be stored but the capacity is {capacity}",
        .rank.map(|r| format!(" of rank {}", r)).unwrap_or_default()
    )]
    CapacityExceeded {
        rank: Option<usize>,
        required: usize,
        capacity: usize,
    },
    /// A received superdroplet does not belong to the receiving rank
    #[error(
        "superdroplet {id} received by rank {rank} at position {position:?} does not belong to this rank"
    )]
    ProtocolViolation {
        rank: usize,
        id: u64,
        position: [f64; 3],
    },
    /// The gathered transport counts are malformed
    #[error("malformed transport counts gathered by rank {rank}: expected {expected} values, got {found}")]
    MalformedCounts {
        rank: usize,
        expected: usize,
        found: usize,
    },
    /// Sending or receiving failed
    #[error("communication failed during transport")]
    Comm(#[from] CommError),
    /// A record batch could not be encoded or decoded
    #[error("invalid superdroplet record batch")]
    Record(#[from] RecordError),
}

/// Statistics of one transport cycle on one rank
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct TransportSummary {
    /// Number of superdroplets sent to other ranks
    pub sent: usize,
    /// Number of superdroplets received from other ranks
    pub received: usize,
    /// Number of resident superdroplets after the cycle
    pub resident: usize,
    /// Number of superdroplets dropped because they left the domain
    pub out_of_domain: usize,
}

/// Gathered per-rank rows: outbound counts to every rank, local count, capacity
struct TransportCounts {
    process_count: usize,
    rows: Vec<u64>,
}

impl TransportCounts {
    fn row_len(process_count: usize) -> usize {
        process_count + 2
    }

    fn sent(&self, from: usize, to: usize) -> usize {
        self.rows[from * Self::row_len(self.process_count) + to] as usize
    }

    fn local(&self, rank: usize) -> usize {
        self.rows[rank * Self::row_len(self.process_count) + self.process_count] as usize
    }

    fn capacity(&self, rank: usize) -> usize {
        self.rows[rank * Self::row_len(self.process_count) + self.process_count + 1] as usize
    }

    fn inbound(&self, rank: usize) -> usize {
        (0..self.process_count).map(|s| self.sent(s, rank)).sum()
    }

    /// Returns the first rank that would overflow its buffer
    fn check_capacities(&self) -> Result<(), TransportError> {
        for rank in 0..self.process_count {
            let required = self.local(rank) + self.inbound(rank);
            if required > self.capacity(rank) {
                return Err(TransportError::CapacityExceeded {
                    rank: Some(rank),
                    required,
                    capacity: self.capacity(rank),
                });
            }
        }
        Ok(())
    }
}

/// Runs one transport cycle, see the [module documentation](self)
///
/// Has to be called collectively by all ranks of the communicator.
pub fn run_transport_cycle<R, C, M>(
    comm: &C,
    map: &M,
    buffer: &mut SuperdropletBuffer<R>,
) -> Result<TransportSummary, TransportError>
where
    R: Real,
    C: Communicator,
    M: GridboxMap<R>,
{
    profile!("run_transport_cycle");

    let my_rank = comm.rank();
    let process_count = comm.size();

    // Partition scan
    let resident = buffer.resident_mut();
    resident.par_sort_by_key(|drop| drop.cell);
    let num_local = resident.partition_point(|drop| drop.cell.is_local());
    let num_routed = resident.partition_point(|drop| !drop.cell.is_out_of_domain());
    let num_out_of_domain = resident.len() - num_routed;

    let mut outbound = vec![0usize; process_count];
    for drop in &resident[num_local..num_routed] {
        if let Some(rank) = drop.cell.remote_rank() {
            comm.check_peer(rank)?;
            outbound[rank] += 1;
        }
    }

    // Count exchange
    let mut row = outbound.iter().map(|&n| n as u64).collect::<Vec<_>>();
    row.push(num_local as u64);
    row.push(buffer.capacity() as u64);

    let rows = comm.all_gather(&row)?;
    let expected = process_count * TransportCounts::row_len(process_count);
    if rows.len() != expected {
        error!("Rank {}: malformed transport counts", my_rank);
        return Err(TransportError::MalformedCounts {
            rank: my_rank,
            expected,
            found: rows.len(),
        });
    }
    let counts = TransportCounts {
        process_count,
        rows,
    };
    trace!("Rank {} transport count rows: {:?}", my_rank, counts.rows);

    // Capacity check
    if let Err(err) = counts.check_capacities() {
        error!("Rank {}: aborting transport cycle: {}", my_rank, err);
        return Err(err);
    }

    // Serialize & exchange
    let mut sends = Vec::new();
    {
        let mut start = num_local;
        for (peer, &n) in outbound.iter().enumerate() {
            if n == 0 {
                continue;
            }
            let records = buffer.resident()[start..start + n]
                .iter()
                .map(ParticleRecord::from_superdroplet)
                .collect::<Result<Vec<_>, _>>()?;
            let message = encode_batch(&records)?;
            sends.push(comm.isend(peer, TRANSPORT_TAG, &message)?);
            start += n;
        }
    }

    let mut recvs = Vec::new();
    for peer in 0..process_count {
        let n = counts.sent(peer, my_rank);
        if n > 0 {
            recvs.push(comm.irecv(peer, TRANSPORT_TAG, encoded_len(n))?);
        }
    }

    for send in sends {
        send.wait()?;
    }

    // Deserialize & relocate
    let mut num_received = 0;
    let mut num_placed = 0;
    let mut num_arrived_outside = 0;
    for recv in recvs {
        let message = recv.wait()?;
        for record in decode_batch(&message)? {
            num_received += 1;
            let mut drop = record.to_superdroplet::<R>()?;
            match map.locate(&drop.coords) {
                LocateResult::LocalCell { index, position } => {
                    drop.cell = CellRef::Local(index);
                    drop.coords = position;
                    buffer.slots_mut()[num_local + num_placed] = drop;
                    num_placed += 1;
                }
                LocateResult::OutOfDomain => num_arrived_outside += 1,
                LocateResult::RemoteRank { rank, .. } => {
                    error!(
                        "Rank {}: received superdroplet {} belongs to rank {}",
                        my_rank, record.id, rank
                    );
                    return Err(TransportError::ProtocolViolation {
                        rank: my_rank,
                        id: record.id,
                        position: record.coords,
                    });
                }
            }
        }
    }

    // Compaction
    buffer.set_num_resident(num_local + num_placed);
    buffer.clear_vacant();

    let summary = TransportSummary {
        sent: outbound.iter().sum(),
        received: num_received,
        resident: buffer.num_resident(),
        out_of_domain: num_out_of_domain + num_arrived_outside,
    };
    debug!(
        "Rank {} transport cycle: sent {}, received {}, resident {}, out of domain {}",
        my_rank, summary.sent, summary.received, summary.resident, summary.out_of_domain
    );

    Ok(summary)
}
