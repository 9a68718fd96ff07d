//! Message passing between ranks
//!
//! The [`Communicator`] is an explicit handle that is created once per rank and passed to every
//! component that needs rank information or exchanges data. Messages are contiguous byte
//! buffers. Sends and receives are non-blocking and return requests that have to be
//! [waited](Wait::wait) on before their result is available.
//!
//! Two backends are provided: [`SingleProcessComm`] for runs with a single rank and
//! [`ThreadComm`] for running several ranks as threads of one process.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};
use thiserror::Error as ThisError;

use crate::{MapType, ThreadSafe, new_map};

/// Message tag, messages are matched by source, destination and tag
pub type Tag = u16;

/// Tag reserved for the messages of [`Communicator::all_gather`]
pub const ALL_GATHER_TAG: Tag = Tag::MAX;

/// Errors that can occur during communication between ranks
#[derive(Clone, PartialEq, Eq, Debug, ThisError)]
#[non_exhaustive]
pub enum CommError {
    /// The peer rank does not exist
    #[error("peer rank {peer} does not exist in a communicator of size {size}")]
    InvalidPeer { peer: usize, size: usize },
    /// A received message does not have the expected length
    #[error("message from rank {peer} has {found} bytes but {expected} bytes were expected")]
    SizeMismatch {
        peer: usize,
        expected: usize,
        found: usize,
    },
    /// No message arrived within the configured receive timeout
    #[error("timed out waiting for message from rank {peer} (tag {tag})")]
    Timeout { peer: usize, tag: Tag },
    /// No message can ever arrive for the receive
    #[error("no message from rank {peer} (tag {tag}) can be received")]
    Disconnected { peer: usize, tag: Tag },
}

/// A pending communication request
pub trait Wait {
    type Output;

    /// Blocks until the request completed
    fn wait(self) -> Result<Self::Output, CommError>;
}

/// Interface for the communication between the ranks of a distributed run
pub trait Communicator: ThreadSafe {
    /// Request returned by [`Communicator::isend`]
    type SendRequest: Wait<Output = ()>;
    /// Request returned by [`Communicator::irecv`], yields the received bytes
    type RecvRequest: Wait<Output = Vec<u8>>;

    /// Rank of this process
    fn rank(&self) -> usize;

    /// Total number of ranks
    fn size(&self) -> usize;

    /// Collects the values of all ranks, the result contains the values of rank `r` at `r * local.len()`
    ///
    /// All ranks have to contribute the same number of values. This is a blocking collective operation.
    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>, CommError>;

    /// Starts sending a message to `peer`
    fn isend(&self, peer: usize, tag: Tag, bytes: &[u8]) -> Result<Self::SendRequest, CommError>;

    /// Starts receiving a message of `len` bytes from `peer`
    fn irecv(&self, peer: usize, tag: Tag, len: usize) -> Result<Self::RecvRequest, CommError>;

    /// Returns an error if `peer` is not a rank of this communicator
    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer < self.size() {
            Ok(())
        } else {
            Err(CommError::InvalidPeer {
                peer,
                size: self.size(),
            })
        }
    }
}

/// Request that completed at creation
#[derive(Clone, Debug)]
pub struct Completed<T>(Result<T, CommError>);

impl<T> Wait for Completed<T> {
    type Output = T;

    fn wait(self) -> Result<T, CommError> {
        self.0
    }
}

fn check_len(peer: usize, expected: usize, message: Vec<u8>) -> Result<Vec<u8>, CommError> {
    if message.len() == expected {
        Ok(message)
    } else {
        Err(CommError::SizeMismatch {
            peer,
            expected,
            found: message.len(),
        })
    }
}

/// Communicator of a run with a single rank
///
/// Messages sent to rank 0 are queued and can be received by the same handle.
#[derive(Default)]
pub struct SingleProcessComm {
    queues: Mutex<MapType<Tag, VecDeque<Vec<u8>>>>,
}

impl SingleProcessComm {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(new_map()),
        }
    }
}

impl Communicator for SingleProcessComm {
    type SendRequest = Completed<()>;
    type RecvRequest = Completed<Vec<u8>>;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>, CommError> {
        Ok(local.to_vec())
    }

    fn isend(&self, peer: usize, tag: Tag, bytes: &[u8]) -> Result<Self::SendRequest, CommError> {
        self.check_peer(peer)?;
        self.queues
            .lock()
            .entry(tag)
            .or_default()
            .push_back(bytes.to_vec());
        Ok(Completed(Ok(())))
    }

    fn irecv(&self, peer: usize, tag: Tag, len: usize) -> Result<Self::RecvRequest, CommError> {
        self.check_peer(peer)?;
        let message = self.queues.lock().get_mut(&tag).and_then(|q| q.pop_front());
        Ok(Completed(match message {
            Some(message) => check_len(peer, len, message),
            None => Err(CommError::Disconnected { peer, tag }),
        }))
    }
}

/// `(source, destination, tag)`
type MailboxKey = (usize, usize, Tag);

#[derive(Default)]
struct Mailboxes {
    queues: Mutex<MapType<MailboxKey, VecDeque<Vec<u8>>>>,
    delivered: Condvar,
}

/// Factory for a set of [`ThreadComm`]s sharing in-process mailboxes
pub struct ThreadCommWorld {
    comms: Vec<ThreadComm>,
}

/// Communicator of a rank that runs as a thread of the current process
///
/// Messages are delivered in FIFO order per `(source, destination, tag)`.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailboxes: Arc<Mailboxes>,
    timeout: Option<Duration>,
}

impl ThreadCommWorld {
    /// Creates a world of `size` ranks
    pub fn new(size: usize) -> Self {
        let mailboxes = Arc::new(Mailboxes {
            queues: Mutex::new(new_map()),
            delivered: Condvar::new(),
        });
        let comms = (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailboxes: mailboxes.clone(),
                timeout: None,
            })
            .collect();
        Self { comms }
    }

    /// Sets a timeout for all receives, a receive waiting longer fails with [`CommError::Timeout`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for comm in &mut self.comms {
            comm.timeout = Some(timeout);
        }
        self
    }

    /// Returns the communicators of all ranks, ordered by rank
    pub fn into_comms(self) -> Vec<ThreadComm> {
        self.comms
    }
}

/// Pending receive of a [`ThreadComm`]
pub struct ThreadRecvRequest {
    key: MailboxKey,
    len: usize,
    mailboxes: Arc<Mailboxes>,
    timeout: Option<Duration>,
}

impl Wait for ThreadRecvRequest {
    type Output = Vec<u8>;

    fn wait(self) -> Result<Vec<u8>, CommError> {
        let (peer, _, tag) = self.key;
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let mut queues = self.mailboxes.queues.lock();
        loop {
            if let Some(message) = queues.get_mut(&self.key).and_then(|q| q.pop_front()) {
                return check_len(peer, self.len, message);
            }

            match deadline {
                Some(deadline) => {
                    if self
                        .mailboxes
                        .delivered
                        .wait_until(&mut queues, deadline)
                        .timed_out()
                    {
                        // A message may have been delivered right before the timeout
                        if let Some(message) = queues.get_mut(&self.key).and_then(|q| q.pop_front())
                        {
                            return check_len(peer, self.len, message);
                        }
                        return Err(CommError::Timeout { peer, tag });
                    }
                }
                None => self.mailboxes.delivered.wait(&mut queues),
            }
        }
    }
}

impl ThreadComm {
    fn deliver(&self, peer: usize, tag: Tag, bytes: &[u8]) {
        let mut queues = self.mailboxes.queues.lock();
        queues
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(bytes.to_vec());
        self.mailboxes.delivered.notify_all();
    }
}

impl Communicator for ThreadComm {
    type SendRequest = Completed<()>;
    type RecvRequest = ThreadRecvRequest;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&self, local: &[u64]) -> Result<Vec<u64>, CommError> {
        let bytes: &[u8] = bytemuck::cast_slice(local);
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.deliver(peer, ALL_GATHER_TAG, bytes);
        }

        let mut gathered = Vec::with_capacity(local.len() * self.size);
        for peer in 0..self.size {
            if peer == self.rank {
                gathered.extend_from_slice(local);
            } else {
                let message = self.irecv(peer, ALL_GATHER_TAG, bytes.len())?.wait()?;
                gathered.extend(bytemuck::pod_collect_to_vec::<u8, u64>(&message));
            }
        }

        trace!("Rank {} gathered {:?}", self.rank, gathered);
        Ok(gathered)
    }

    fn isend(&self, peer: usize, tag: Tag, bytes: &[u8]) -> Result<Self::SendRequest, CommError> {
        self.check_peer(peer)?;
        trace!(
            "Rank {} sends {} bytes to rank {} (tag {})",
            self.rank,
            bytes.len(),
            peer,
            tag
        );
        self.deliver(peer, tag, bytes);
        Ok(Completed(Ok(())))
    }

    fn irecv(&self, peer: usize, tag: Tag, len: usize) -> Result<Self::RecvRequest, CommError> {
        self.check_peer(peer)?;
        Ok(ThreadRecvRequest {
            key: (peer, self.rank, tag),
            len,
            mailboxes: self.mailboxes.clone(),
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process_self_send() {
        let comm = SingleProcessComm::new();
        comm.isend(0, 3, &[1, 2, 3]).unwrap().wait().unwrap();
        assert_eq!(comm.irecv(0, 3, 3).unwrap().wait().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            comm.irecv(0, 3, 3).unwrap().wait(),
            Err(CommError::Disconnected { peer: 0, tag: 3 })
        );
        assert!(matches!(
            comm.isend(1, 0, &[]),
            Err(CommError::InvalidPeer { peer: 1, size: 1 })
        ));
        assert_eq!(comm.all_gather(&[4, 5]).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_thread_comm_fifo() {
        let comms = ThreadCommWorld::new(2).into_comms();
        comms[0].isend(1, 7, &[1]).unwrap();
        comms[0].isend(1, 7, &[2, 2]).unwrap();
        let first = comms[1].irecv(0, 7, 1).unwrap();
        let second = comms[1].irecv(0, 7, 2).unwrap();
        assert_eq!(first.wait().unwrap(), vec![1]);
        assert_eq!(second.wait().unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_thread_comm_all_gather() {
        let comms = ThreadCommWorld::new(3).into_comms();
        let results = std::thread::scope(|s| {
            let handles = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as u64;
                        comm.all_gather(&[r, 10 * r]).unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        for gathered in results {
            assert_eq!(gathered, vec![0, 0, 1, 10, 2, 20]);
        }
    }

    #[test]
    fn test_thread_comm_timeout_and_size() {
        let comms = ThreadCommWorld::new(2)
            .with_timeout(Duration::from_millis(20))
            .into_comms();
        assert_eq!(
            comms[0].irecv(1, 1, 4).unwrap().wait(),
            Err(CommError::Timeout { peer: 1, tag: 1 })
        );
        comms[1].isend(0, 1, &[0; 3]).unwrap();
        assert_eq!(
            comms[0].irecv(1, 1, 4).unwrap().wait(),
            Err(CommError::SizeMismatch {
                peer: 1,
                expected: 4,
                found: 3
            })
        );
    }
}
