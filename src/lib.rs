#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-coupling
//!
//! mesh-coupling holds the distributed bookkeeping that couples two finite
//! element fields across an interface: global DOF numbering, named subsets
//! of a DOF space, penalty-regularized mortar contact and meshtying,
//! conversion of block matrices between partitions, and the state of an
//! XFEM field whose numbering changes when the interface moves.
//!
//! ## Features
//! - Distributed [`DofMap`](linalg::DofMap)s, vectors, sparse and block
//!   matrices with owner lookup and import/export plans
//! - [`DofSet`](dofset::DofSet) and [`MortarDofSet`](dofset::MortarDofSet)
//!   numberings, [`MultiMapExtractor`](map_extractor::MultiMapExtractor)
//!   subsets
//! - [`MortarManager`](mortar::MortarManager) with forward-mode
//!   differentiated pair geometry
//! - [`MatrixRowColTransformer`](transform::MatrixRowColTransformer) for
//!   redistributed block systems
//! - [`XFluidState`](xfem::XFluidState) transfer across re-cuts and the
//!   structure/fluid [`XfsCouplingManager`](xfem::XfsCouplingManager)
//! - Pluggable communication backends: serial, in-process threads, MPI
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-coupling = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every operation that talks to other ranks is collective: all ranks of a
//! communicator must call it in the same order. A returned `Err` on one rank
//! means the whole collective has failed.

pub mod algs;
pub mod coupling_error;
pub mod debug_invariants;
pub mod discretization;
pub mod dofset;
pub mod fad;
pub mod io;
pub mod linalg;
pub mod map_extractor;
pub mod mortar;
pub mod params;
pub mod transform;
pub mod xfem;

pub use coupling_error::CouplingError;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::coupling_error::CouplingError;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::discretization::{CellShape, Discretization, Element, Node, NodeId};
    pub use crate::dofset::{DofNumbering, DofSet, MortarDofSet};
    pub use crate::fad::Fad;
    pub use crate::io::{InMemoryRestart, ResultReader, ResultWriter};
    pub use crate::linalg::{
        BlockSparseMatrix, CombineMode, DistVector, DofMap, Exporter, Gid, SparseMatrix,
    };
    pub use crate::map_extractor::{ConditionSelector, MapExtractor, MultiMapExtractor};
    pub use crate::mortar::{MortarManager, PairEvaluatorRegistry, Regularization};
    pub use crate::params::{MortarParams, XfsCouplingParams};
    pub use crate::transform::{BlockType, MatrixRowColTransformer, TransformerBuilder};
    pub use crate::xfem::{
        FieldStateKind, TransferPolicy, XDofSet, XFieldState, XFluidState, XfsCouplingManager,
    };
}
