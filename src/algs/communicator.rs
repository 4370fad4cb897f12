//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Point-to-point messages between the same `(source, destination, tag)`
//! triple are delivered in send order, as in MPI. All handles are
//! **waitable**; the collective helpers in [`super::collective`] post their
//! sends before they wait on receives, which every backend supports.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::coupling_error::CouplingError;

/// Message tag wrapper so each exchange phase can reserve its own range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    /// Tag reserved for the default `allgather` implementation.
    pub const ALLGATHER: CommTag = CommTag(0xFFF0);
    /// Tag used by global DOF numbering.
    pub const DOFSET: CommTag = CommTag(0x0D00);
    /// Tag used when building owner directories.
    pub const DIRECTORY: CommTag = CommTag(0x0D10);
    /// Tag used by exporter setup and data movement.
    pub const EXPORT: CommTag = CommTag(0x0E00);
    /// Tag used when routing assembled contributions to owners.
    pub const ASSEMBLE: CommTag = CommTag(0x0A00);
    /// Tag used when gathering distributed objects for comparison.
    pub const GATHER: CommTag = CommTag(0x0B00);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        CommTag(raw)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derive a tag for a later phase of the same exchange.
    #[inline]
    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process/partition.
    fn rank(&self) -> usize;
    /// Number of participating ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Gather equally sized byte blocks from every rank, ordered by rank.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CouplingError> {
        let n = send.len();
        let me = self.rank();
        let size = self.size();
        if recv.len() != n * size {
            return Err(CouplingError::BufferSizeMismatch {
                neighbor: me,
                expected: n * size,
                got: recv.len(),
            });
        }
        let tag = CommTag::ALLGATHER.as_u16();
        let pending: Vec<_> = (0..size)
            .filter(|&peer| peer != me)
            .map(|peer| self.isend(peer, tag, send))
            .collect();
        recv[me * n..(me + 1) * n].copy_from_slice(send);
        let mut outcome = Ok(());
        for peer in (0..size).filter(|&peer| peer != me) {
            let Some(data) = self.irecv(peer, tag).wait() else {
                outcome = Err(CouplingError::CommError {
                    neighbor: peer,
                    message: "allgather: no data received".into(),
                });
                break;
            };
            if data.len() != n {
                outcome = Err(CouplingError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: n,
                    got: data.len(),
                });
                break;
            }
            recv[peer * n..(peer + 1) * n].copy_from_slice(&data);
        }
        for send in pending {
            let _ = send.wait();
        }
        outcome
    }

    /// Block until every rank reached this point.
    fn barrier(&self) -> Result<(), CouplingError> {
        let mut sink = vec![0u8; self.size()];
        self.allgather(&[1u8], &mut sink)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16) {}

    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CouplingError> {
        if recv.len() != send.len() {
            return Err(CouplingError::BufferSizeMismatch {
                neighbor: 0,
                expected: send.len(),
                got: recv.len(),
            });
        }
        recv.copy_from_slice(send);
        Ok(())
    }

    fn barrier(&self) -> Result<(), CouplingError> {
        Ok(())
    }
}

// --- LocalComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Receive handle of [`LocalComm`]; waiting polls the shared mailbox.
pub struct LocalHandle {
    key: Key,
    mailbox: Arc<Mailbox>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

/// Communicator whose ranks are threads sharing one mailbox.
///
/// Every call to [`LocalComm::world`] creates an isolated mailbox, so
/// concurrently running worlds (e.g. parallel tests) never see each other's
/// messages.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create one communicator per rank of a fresh `size`-rank world.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle {
        LocalHandle {
            key: (peer, self.rank, tag),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::coupling_error::CouplingError;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI communicator. The caller keeps the `Universe` alive for as long as
    /// this communicator is used.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    // MPI is initialized with funneled threading: only the thread that owns the
    // communicator calls into MPI.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn from_world(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }
    }

    /// Pending immediate send owning a leaked copy of the payload.
    ///
    /// Dropping the handle completes the send and frees the payload, so a
    /// handle abandoned on an error path neither panics nor leaks.
    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8], StaticScope>>,
        buffer: *mut [u8],
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(request) = self.request.take() {
                request.wait();
            }
            // SAFETY: `buffer` came from `Box::leak` in `isend`, is freed only
            // here, and the request referencing it has completed.
            unsafe { drop(Box::from_raw(self.buffer)) };
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    /// Receive that completed eagerly inside `irecv`.
    pub struct MpiRecvHandle(Option<Vec<u8>>);

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let buffer: *mut [u8] = leaked;
            // SAFETY: the pointer stays valid until the handle's drop reclaims it.
            let data: &'static [u8] = unsafe { &*buffer };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSendHandle {
                request: Some(request),
                buffer,
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecvHandle {
            let (msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .matched_probe_with_tag(i32::from(tag));
            let (data, _status) = msg.matched_receive_vec::<u8>();
            MpiRecvHandle(Some(data))
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CouplingError> {
            if recv.len() != send.len() * self.size {
                return Err(CouplingError::BufferSizeMismatch {
                    neighbor: self.rank,
                    expected: send.len() * self.size,
                    got: recv.len(),
                });
            }
            self.world.all_gather_into(send, recv);
            Ok(())
        }

        fn barrier(&self) -> Result<(), CouplingError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let world = LocalComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        comm0.isend(1, 7, &[1, 2, 3, 4]).wait();
        let data = comm1
            .irecv(0, 7)
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn local_messages_keep_send_order() {
        let world = LocalComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        assert_eq!(world[1].irecv(0, 3).wait(), Some(vec![1]));
        assert_eq!(world[1].irecv(0, 3).wait(), Some(vec![2]));
    }

    #[test]
    fn separate_worlds_are_isolated() {
        let a = LocalComm::world(2);
        let b = LocalComm::world(2);
        a[0].isend(1, 9, &[10]);
        b[0].isend(1, 9, &[20]);
        assert_eq!(b[1].irecv(0, 9).wait(), Some(vec![20]));
        assert_eq!(a[1].irecv(0, 9).wait(), Some(vec![10]));
    }

    #[test]
    fn allgather_orders_by_rank() {
        let world = LocalComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let mut recv = vec![0u8; 3];
                    comm.allgather(&[comm.rank() as u8 * 10], &mut recv).unwrap();
                    recv
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![0, 10, 20]);
        }
    }

    #[test]
    fn nocomm_allgather_is_identity() {
        let mut recv = [0u8; 2];
        NoComm.allgather(&[5, 6], &mut recv).unwrap();
        assert_eq!(recv, [5, 6]);
        assert!(NoComm.barrier().is_ok());
    }
}
