//! CouplingError: unified error type for mesh-coupling public APIs
//!
//! Every detected invariant violation is reported through this type. The
//! variants fall into four groups: lifecycle misuse, data inconsistencies
//! between maps/discretizations, unsupported configurations, and failures
//! of the underlying message passing. None of them is recoverable locally.
//!
//! Collective operations fail on all ranks or on none: the rank that hit the
//! problem reports it, every other rank gets [`CouplingError::RankFailed`].

use thiserror::Error;

use crate::discretization::node::NodeId;
use crate::linalg::dof_map::Gid;

/// Unified error type for mesh-coupling operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouplingError {
    /// An operation was called before a required lifecycle step.
    #[error("{component}: call {required}() first")]
    LifecycleViolation {
        component: &'static str,
        required: &'static str,
    },
    /// `init()` was called a second time.
    #[error("{0}: init() must be called exactly once")]
    AlreadyInitialized(&'static str),
    /// The object was already destroyed.
    #[error("{0}: object has been destroyed")]
    Destroyed(&'static str),

    /// Attempted to construct a NodeId with a zero value.
    #[error("NodeId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidNodeId,
    /// A node is referenced that the discretization does not know.
    #[error("node {0} is not part of the discretization")]
    UnknownNode(NodeId),
    /// Base numbering and the node-level dof source disagree on a node.
    #[error("node {node}: base numbering assigned {expected} dofs, node supplies {found}")]
    DofCountMismatch {
        node: NodeId,
        expected: usize,
        found: usize,
    },
    /// Row/column maps do not satisfy their structural invariants.
    #[error("inconsistent dof maps: {0}")]
    DofMapInconsistent(String),
    /// Two named subsets of a map extractor share a global id.
    #[error("subsets `{first}` and `{second}` share global id {gid}")]
    OverlappingSubsets {
        first: String,
        second: String,
        gid: Gid,
    },
    /// A subset name that the extractor does not know.
    #[error("unknown subset `{0}`")]
    UnknownSubset(String),
    /// A vector or matrix lives on a different map than required.
    #[error("map mismatch: {0}")]
    MapMismatch(String),
    /// A global id is not part of the addressed map.
    #[error("global id {0} is not part of the map")]
    GidNotInMap(Gid),
    /// A global id appears twice where ids must be unique.
    #[error("duplicate global id {0}")]
    DuplicateGid(Gid),
    /// No rank owns the given global id.
    #[error("no owner found for global id {0}")]
    MissingOwner(Gid),
    /// A block type is missing from one of the transformer map sets.
    #[error("block {block} is missing from the {which} map pairs")]
    IncompleteBlockMaps { block: String, which: &'static str },
    /// A restart entry was requested that was never written.
    #[error("restart entry `{0}` not found")]
    MissingRestartEntry(String),

    /// No evaluator is registered for the requested combination.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// A parameter block failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Message passing with a neighbor failed.
    #[error("communication with rank {neighbor} failed: {message}")]
    CommError { neighbor: usize, message: String },
    /// A received buffer had an unexpected size.
    #[error("rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Another rank failed its part of a collective operation.
    #[error("collective operation failed on rank {rank}")]
    RankFailed { rank: usize },
}

impl CouplingError {
    /// Shorthand for a lifecycle violation.
    pub(crate) fn lifecycle(component: &'static str, required: &'static str) -> Self {
        CouplingError::LifecycleViolation {
            component,
            required,
        }
    }
}
