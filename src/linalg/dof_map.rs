//! DofMap: the set of global DOF ids stored on this rank.
//!
//! A `DofMap` is the distributed-index-space abstraction every vector and
//! matrix in this crate is laid out on. It lists this rank's global ids in
//! local order and answers `gid -> lid` in O(1). A *row* map is one-to-one
//! (every id lives on exactly one rank); a *column* map may repeat ids of
//! other ranks (ghosts).
//!
//! # Invariants
//! - Local ids are unique on each rank.
//! - `index` is exactly the inverse of `gids`.
//! - `num_global` is the sum of the local lengths over all ranks.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::algs::collective::{agree, allgather_vec, sum_all_usize};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireGid;
use crate::coupling_error::CouplingError;
use crate::debug_invariants::DebugInvariants;

/// Global DOF id. Signed like the global ordinals of the linear-algebra layer.
pub type Gid = i64;

/// Distributed map of global DOF ids.
#[derive(Clone, Debug)]
pub struct DofMap {
    gids: Vec<Gid>,
    index: HashMap<Gid, usize>,
    num_global: usize,
    rank: usize,
    comm_size: usize,
}

impl PartialEq for DofMap {
    fn eq(&self, other: &Self) -> bool {
        self.gids == other.gids
            && self.num_global == other.num_global
            && self.comm_size == other.comm_size
    }
}

impl DofMap {
    /// Build a map from this rank's ids (collective: computes the global size).
    ///
    /// # Errors
    /// `DuplicateGid` if `gids` repeats an id locally; the other ranks get
    /// `RankFailed`.
    pub fn new<C>(gids: Vec<Gid>, comm: &C) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let n = gids.len();
        let mut map = agree(comm, Self::from_parts(gids, n, comm.rank(), comm.size()))?;
        map.num_global = sum_all_usize(comm, n)?;
        Ok(map)
    }

    /// Single-rank map, handy for serial drivers and tests.
    pub fn serial(gids: Vec<Gid>) -> Result<Self, CouplingError> {
        let n = gids.len();
        Self::from_parts(gids, n, 0, 1)
    }

    /// Contiguous range `[start, start + n)` on a single rank.
    pub fn serial_range(start: Gid, n: usize) -> Result<Self, CouplingError> {
        Self::serial((start..start + n as Gid).collect())
    }

    fn from_parts(
        gids: Vec<Gid>,
        num_global: usize,
        rank: usize,
        comm_size: usize,
    ) -> Result<Self, CouplingError> {
        let mut index = HashMap::with_capacity(gids.len());
        for (lid, &gid) in gids.iter().enumerate() {
            if index.insert(gid, lid).is_some() {
                return Err(CouplingError::DuplicateGid(gid));
            }
        }
        let map = DofMap {
            gids,
            index,
            num_global,
            rank,
            comm_size,
        };
        crate::debug_invariants!(map.validate_invariants(), "DofMap::from_parts");
        Ok(map)
    }

    /// Ids owned (or ghosted) by this rank, in local order.
    #[inline]
    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    #[inline]
    pub fn num_my(&self) -> usize {
        self.gids.len()
    }

    #[inline]
    pub fn num_global(&self) -> usize {
        self.num_global
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn comm_size(&self) -> usize {
        self.comm_size
    }

    /// Local index of `gid`, if stored here.
    #[inline]
    pub fn lid(&self, gid: Gid) -> Option<usize> {
        self.index.get(&gid).copied()
    }

    /// Local index of `gid` or `GidNotInMap`.
    #[inline]
    pub fn lid_or_err(&self, gid: Gid) -> Result<usize, CouplingError> {
        self.lid(gid).ok_or(CouplingError::GidNotInMap(gid))
    }

    #[inline]
    pub fn contains(&self, gid: Gid) -> bool {
        self.index.contains_key(&gid)
    }

    #[inline]
    pub fn gid(&self, lid: usize) -> Option<Gid> {
        self.gids.get(lid).copied()
    }

    /// Largest id stored on this rank.
    pub fn max_my_gid(&self) -> Option<Gid> {
        self.gids.iter().copied().max()
    }

    /// Same ids in the same local order on this rank, and the same global size.
    pub fn same_as(&self, other: &DofMap) -> bool {
        self == other
    }

    /// Whether every id is stored on exactly one rank (collective).
    pub fn is_one_to_one<C>(&self, comm: &C) -> Result<bool, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let all = self.gather_all(comm, CommTag::GATHER)?;
        let mut seen = HashSet::with_capacity(self.num_global);
        Ok(all.into_iter().flatten().all(|gid| seen.insert(gid)))
    }

    /// All ids of all ranks, indexed by rank (collective).
    pub fn gather_all<C>(&self, comm: &C, tag: CommTag) -> Result<Vec<Vec<Gid>>, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let local: Vec<WireGid> = self.gids.iter().map(|&g| WireGid::of(g)).collect();
        Ok(allgather_vec(comm, tag, &local)?
            .into_iter()
            .map(|ids| ids.iter().map(WireGid::get).collect())
            .collect())
    }

    /// Union of several maps' local ids, sorted (collective).
    ///
    /// Matches the semantics of merging disjoint row maps into one full map.
    pub fn merge<C>(maps: &[&DofMap], comm: &C) -> Result<DofMap, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let gids = maps
            .iter()
            .flat_map(|m| m.gids.iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();
        DofMap::new(gids, comm)
    }

    /// Local ids of `self` that are not in `part`, in `self`'s order (collective).
    pub fn complement<C>(&self, part: &DofMap, comm: &C) -> Result<DofMap, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let gids = self
            .gids
            .iter()
            .copied()
            .filter(|&g| !part.contains(g))
            .collect();
        DofMap::new(gids, comm)
    }
}

impl DebugInvariants for DofMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DofMap");
    }

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        if self.index.len() != self.gids.len() {
            return Err(CouplingError::DofMapInconsistent(format!(
                "index holds {} ids, map lists {}",
                self.index.len(),
                self.gids.len()
            )));
        }
        for (lid, gid) in self.gids.iter().enumerate() {
            if self.index.get(gid) != Some(&lid) {
                return Err(CouplingError::DofMapInconsistent(format!(
                    "gid {gid} not indexed at lid {lid}"
                )));
            }
        }
        if self.comm_size == 1 && self.num_global != self.gids.len() {
            return Err(CouplingError::DofMapInconsistent(format!(
                "serial map of {} ids claims {} globally",
                self.gids.len(),
                self.num_global
            )));
        }
        Ok(())
    }
}
