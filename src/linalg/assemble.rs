//! Route locally computed contributions to the ranks owning their rows.
//!
//! Element-level evaluation produces `(gid, value)` and `(row, col, value)`
//! contributions for ids that may be owned elsewhere. These helpers sum the
//! local ones in place and ship the rest to their owners in one exchange.
//! A contribution no rank owns fails the call on every rank.

use std::collections::BTreeMap;

use crate::algs::collective::{agree, exchange};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireEntry, WireValue};
use crate::coupling_error::CouplingError;
use crate::linalg::directory::Directory;
use crate::linalg::dof_map::Gid;
use crate::linalg::sparse::SparseMatrix;
use crate::linalg::vector::DistVector;

const TAG_VECTOR: CommTag = CommTag::ASSEMBLE;
const TAG_MATRIX: CommTag = CommTag::ASSEMBLE.offset(2);

/// Sum `(gid, value)` contributions into the owned entries of `target`
/// (collective). `directory` must describe `target`'s map.
pub fn assemble_vector<C>(
    target: &mut DistVector,
    contributions: &[(Gid, f64)],
    directory: &Directory,
    comm: &C,
) -> Result<(), CouplingError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let routed = route(contributions, |&(gid, _)| gid, directory, me, |&(gid, value)| {
        target.sum_into(gid, value)
    });
    let sends: BTreeMap<usize, Vec<WireValue>> = agree(comm, routed)?
        .into_iter()
        .map(|(peer, items)| {
            let records = items.iter().map(|&(g, v)| WireValue::new(g, v)).collect();
            (peer, records)
        })
        .collect();
    let received = exchange(comm, TAG_VECTOR, &sends)?;
    let summed = received
        .into_values()
        .flatten()
        .try_for_each(|r: WireValue| target.sum_into(r.gid(), r.value()));
    agree(comm, summed)
}

/// Sum `(row, col, value)` contributions into the owned rows of `target`
/// (collective). `directory` must describe `target`'s row map.
pub fn assemble_matrix<C>(
    target: &mut SparseMatrix,
    contributions: &[(Gid, Gid, f64)],
    directory: &Directory,
    comm: &C,
) -> Result<(), CouplingError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let routed = route(contributions, |&(row, _, _)| row, directory, me, |&(row, col, value)| {
        target.sum_into(row, col, value)
    });
    let sends: BTreeMap<usize, Vec<WireEntry>> = agree(comm, routed)?
        .into_iter()
        .map(|(peer, items)| {
            let records = items.iter().map(|&(r, c, v)| WireEntry::new(r, c, v)).collect();
            (peer, records)
        })
        .collect();
    let received = exchange(comm, TAG_MATRIX, &sends)?;
    let summed = received
        .into_values()
        .flatten()
        .try_for_each(|r: WireEntry| target.sum_into(r.row(), r.col(), r.value()));
    agree(comm, summed)
}

/// Apply the locally owned contributions and group the rest by owner.
fn route<T, K, A>(
    contributions: &[T],
    key: K,
    directory: &Directory,
    me: usize,
    mut apply: A,
) -> Result<BTreeMap<usize, Vec<T>>, CouplingError>
where
    T: Copy,
    K: Fn(&T) -> Gid,
    A: FnMut(&T) -> Result<(), CouplingError>,
{
    let mut remote: BTreeMap<usize, Vec<T>> = BTreeMap::new();
    for item in contributions {
        let owner = directory.owner_or_err(key(item))?;
        if owner == me {
            apply(item)?;
        } else {
            remote.entry(owner).or_default().push(*item);
        }
    }
    Ok(remote)
}
