//! Collective helpers built on the [`Communicator`] point-to-point façade.
//!
//! Every helper is collective: all ranks must call it in the same order with
//! the same tag. Sends are posted before receives are waited on.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_records};
use crate::coupling_error::CouplingError;

/// Gather one `u64` from every rank, ordered by rank.
pub fn allgather_u64<C>(comm: &C, value: u64) -> Result<Vec<u64>, CouplingError>
where
    C: Communicator + ?Sized,
{
    let n_ranks = comm.size().max(1);
    let mut recvbuf = vec![0u8; n_ranks * std::mem::size_of::<u64>()];
    comm.allgather(&value.to_le_bytes(), &mut recvbuf)?;
    Ok(recvbuf
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect())
}

/// Global sum of a count.
pub fn sum_all_usize<C>(comm: &C, value: usize) -> Result<usize, CouplingError>
where
    C: Communicator + ?Sized,
{
    Ok(allgather_u64(comm, value as u64)?
        .into_iter()
        .map(|v| v as usize)
        .sum())
}

/// Global sum of a float, accumulated in rank order so every rank gets the
/// bitwise identical result.
pub fn sum_all_f64<C>(comm: &C, value: f64) -> Result<f64, CouplingError>
where
    C: Communicator + ?Sized,
{
    Ok(allgather_u64(comm, value.to_bits())?
        .into_iter()
        .map(f64::from_bits)
        .sum())
}

/// Logical AND over all ranks.
pub fn all_true<C>(comm: &C, value: bool) -> Result<bool, CouplingError>
where
    C: Communicator + ?Sized,
{
    Ok(allgather_u64(comm, u64::from(value))?.into_iter().all(|v| v == 1))
}

/// Agree on the outcome of a rank-local step (collective).
///
/// Returns `Ok` only if every rank succeeded. A failed rank keeps its own
/// error; the others get [`CouplingError::RankFailed`] naming the lowest
/// failing rank. Call it before the next collective so no rank is left
/// waiting on a peer that bailed out.
pub fn agree<T, C>(comm: &C, local: Result<T, CouplingError>) -> Result<T, CouplingError>
where
    C: Communicator + ?Sized,
{
    let flags = allgather_u64(comm, u64::from(local.is_ok()))?;
    let failed = flags.iter().position(|&ok| ok == 0);
    match (local, failed) {
        (Err(e), _) => Err(e),
        (Ok(_), Some(rank)) => Err(CouplingError::RankFailed { rank }),
        (Ok(v), None) => Ok(v),
    }
}

/// Complete every posted send, also on error paths.
fn wait_all<H: Wait>(pending: impl IntoIterator<Item = H>) {
    for send in pending {
        let _ = send.wait();
    }
}

/// Sparse personalized all-to-all: `sends[r]` goes to rank `r`; returns what
/// every rank sent here (keyed by source rank, empty messages omitted).
pub fn exchange<T, C>(
    comm: &C,
    tag: CommTag,
    sends: &BTreeMap<usize, Vec<T>>,
) -> Result<BTreeMap<usize, Vec<T>>, CouplingError>
where
    T: Pod,
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let size = comm.size();
    let mut received = BTreeMap::new();
    if let Some(local) = sends.get(&me) {
        if !local.is_empty() {
            received.insert(me, local.clone());
        }
    }
    if size <= 1 {
        return Ok(received);
    }

    // Stage 1: every pair of ranks exchanges a record count.
    let size_tag = tag.as_u16();
    let mut pending = Vec::with_capacity(size);
    for peer in (0..size).filter(|&p| p != me) {
        let count = sends.get(&peer).map_or(0, Vec::len);
        let wire = WireCount::new(count);
        pending.push(comm.isend(peer, size_tag, cast_slice(std::slice::from_ref(&wire))));
    }
    let counts = receive_counts(comm, size_tag);
    wait_all(pending.drain(..));
    let counts = counts?;

    // Stage 2: payloads, only where the count is non-zero.
    let data_tag = tag.offset(1).as_u16();
    for (&peer, items) in sends.iter().filter(|(p, v)| **p != me && !v.is_empty()) {
        pending.push(comm.isend(peer, data_tag, cast_slice(items)));
    }
    let payloads = receive_payloads::<T, C>(comm, data_tag, counts, &mut received);
    wait_all(pending);
    payloads?;
    Ok(received)
}

fn receive_counts<C>(comm: &C, tag: u16) -> Result<BTreeMap<usize, usize>, CouplingError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let mut counts = BTreeMap::new();
    for peer in (0..comm.size()).filter(|&p| p != me) {
        let raw = comm
            .irecv(peer, tag)
            .wait()
            .ok_or_else(|| CouplingError::CommError {
                neighbor: peer,
                message: "failed to receive size header".into(),
            })?;
        if raw.len() != std::mem::size_of::<WireCount>() {
            return Err(CouplingError::BufferSizeMismatch {
                neighbor: peer,
                expected: std::mem::size_of::<WireCount>(),
                got: raw.len(),
            });
        }
        let count: WireCount = bytemuck::pod_read_unaligned(&raw);
        counts.insert(peer, count.get());
    }
    Ok(counts)
}

fn receive_payloads<T, C>(
    comm: &C,
    tag: u16,
    counts: BTreeMap<usize, usize>,
    received: &mut BTreeMap<usize, Vec<T>>,
) -> Result<(), CouplingError>
where
    T: Pod,
    C: Communicator + ?Sized,
{
    for (peer, count) in counts.into_iter().filter(|(_, c)| *c > 0) {
        let raw = comm
            .irecv(peer, tag)
            .wait()
            .ok_or_else(|| CouplingError::CommError {
                neighbor: peer,
                message: "no payload received".into(),
            })?;
        let expected = count * std::mem::size_of::<T>();
        if raw.len() != expected {
            return Err(CouplingError::BufferSizeMismatch {
                neighbor: peer,
                expected,
                got: raw.len(),
            });
        }
        let items = decode_records::<T>(&raw).map_err(|message| CouplingError::CommError {
            neighbor: peer,
            message,
        })?;
        received.insert(peer, items);
    }
    Ok(())
}

/// Gather a variable-length slice from every rank, indexed by rank.
pub fn allgather_vec<T, C>(
    comm: &C,
    tag: CommTag,
    local: &[T],
) -> Result<Vec<Vec<T>>, CouplingError>
where
    T: Pod,
    C: Communicator + ?Sized,
{
    let sends: BTreeMap<usize, Vec<T>> =
        (0..comm.size()).map(|r| (r, local.to_vec())).collect();
    let mut received = exchange(comm, tag, &sends)?;
    Ok((0..comm.size())
        .map(|r| received.remove(&r).unwrap_or_default())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn serial_exchange_keeps_local_part() {
        let mut sends = BTreeMap::new();
        sends.insert(0usize, vec![1u64, 2, 3]);
        let got = exchange(&NoComm, CommTag::new(1), &sends).unwrap();
        assert_eq!(got[&0], vec![1, 2, 3]);
    }

    #[test]
    fn exchange_routes_by_destination() {
        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank() as u64;
                    let mut sends = BTreeMap::new();
                    // rank r sends [r*10 + dst] to every dst != r+1 (mod 3)
                    for dst in 0..3usize {
                        if dst != (comm.rank() + 1) % 3 {
                            sends.insert(dst, vec![me * 10 + dst as u64]);
                        }
                    }
                    exchange(&comm, CommTag::new(40), &sends).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // rank 1 hears from 1 and 2 (rank 0 skips it)
        assert_eq!(results[1].keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(results[1][&2], vec![21]);
        assert_eq!(results[0][&1], vec![10]);
    }

    #[test]
    fn malformed_header_still_delivers_posted_header() {
        let handles: Vec<_> = LocalComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let tag = CommTag::new(60);
                    if comm.rank() == 0 {
                        let mut sends = BTreeMap::new();
                        sends.insert(1usize, vec![5u64]);
                        (exchange(&comm, tag, &sends).map(|_| ()), None)
                    } else {
                        // a three byte header instead of a WireCount
                        let _ = comm.isend(0, tag.as_u16(), &[1, 2, 3]).wait();
                        (Ok(()), comm.irecv(0, tag.as_u16()).wait())
                    }
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(
            results[0].0,
            Err(CouplingError::BufferSizeMismatch { neighbor: 1, expected: 4, got: 3 })
        );
        let header = results[1].1.clone().unwrap();
        let count: WireCount = bytemuck::pod_read_unaligned(&header);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn sums_are_identical_on_all_ranks() {
        let handles: Vec<_> = LocalComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let v = if comm.rank() == 0 { 0.1 } else { 0.2 };
                    (sum_all_f64(&comm, v).unwrap(), sum_all_usize(&comm, 3).unwrap())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].0.to_bits(), results[1].0.to_bits());
        assert_eq!(results[0].1, 6);
    }

    #[test]
    fn agree_fails_everywhere_when_one_rank_fails() {
        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let local = if comm.rank() == 1 {
                        Err(CouplingError::DuplicateGid(7))
                    } else {
                        Ok(comm.rank())
                    };
                    let outcome = agree(&comm, local);
                    // the world is still in step afterwards
                    let sum = sum_all_usize(&comm, 1).unwrap();
                    (outcome, sum)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].0, Err(CouplingError::RankFailed { rank: 1 }));
        assert_eq!(results[1].0, Err(CouplingError::DuplicateGid(7)));
        assert_eq!(results[2].0, Err(CouplingError::RankFailed { rank: 1 }));
        assert!(results.iter().all(|(_, sum)| *sum == 3));
        assert_eq!(agree(&NoComm, Ok(5)), Ok(5));
    }
}
