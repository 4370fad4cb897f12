//! `NodeId` and `Node`: the addressable points of a discretization.
//!
//! `NodeId` wraps a non-zero `u64`; 0 is reserved as an invalid value, so
//! `Option<NodeId>` costs nothing extra.

use std::{fmt, num::NonZeroU64};

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;

use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::Gid;

/// Strong handle of a discretization node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(NonZeroU64);

// Node ids travel as raw u64 in the dof numbering records.
assert_eq_size!(NodeId, u64);
assert_eq_size!(Option<NodeId>, u64);

impl NodeId {
    /// # Errors
    /// `InvalidNodeId` if `raw == 0`.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, CouplingError> {
        NonZeroU64::new(raw)
            .map(NodeId)
            .ok_or(CouplingError::InvalidNodeId)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeId").field(&self.get()).finish()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A node as seen by one rank: owned ("row") when `owner` is this rank,
/// ghosted ("column") otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub owner: usize,
    pub coords: [f64; 3],
    /// Dofs the base numbering assigns to this node.
    pub num_dofs: usize,
    /// Node-level dof ids that replace the base numbering (mortar dofsets).
    pub custom_dofs: Option<Vec<Gid>>,
}

impl Node {
    pub fn new(id: NodeId, owner: usize, coords: [f64; 3], num_dofs: usize) -> Self {
        Node {
            id,
            owner,
            coords,
            num_dofs,
            custom_dofs: None,
        }
    }

    pub fn with_custom_dofs(mut self, dofs: Vec<Gid>) -> Self {
        self.custom_dofs = Some(dofs);
        self
    }
}
