//! Owner directory: which rank stores a global id of a one-to-one map.

use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::{DofMap, Gid};

/// Replicated `gid -> owner` lookup for a one-to-one map.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    owners: HashMap<Gid, usize>,
}

impl Directory {
    /// Build the directory of `map` (collective).
    ///
    /// # Errors
    /// `DuplicateGid` if `map` is not one-to-one. The check runs on the
    /// gathered ids, so every rank sees the same result.
    pub fn build<C>(map: &DofMap, comm: &C) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let all = map.gather_all(comm, CommTag::DIRECTORY)?;
        let mut owners = HashMap::with_capacity(map.num_global());
        for (rank, gids) in all.into_iter().enumerate() {
            for gid in gids {
                if owners.insert(gid, rank).is_some() {
                    return Err(CouplingError::DuplicateGid(gid));
                }
            }
        }
        Ok(Directory { owners })
    }

    /// Owning rank of `gid`, if any rank stores it.
    #[inline]
    pub fn owner(&self, gid: Gid) -> Option<usize> {
        self.owners.get(&gid).copied()
    }

    #[inline]
    pub fn owner_or_err(&self, gid: Gid) -> Result<usize, CouplingError> {
        self.owner(gid).ok_or(CouplingError::MissingOwner(gid))
    }

    #[inline]
    pub fn contains(&self, gid: Gid) -> bool {
        self.owners.contains_key(&gid)
    }

    /// Number of ids known globally.
    #[inline]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
