//! XFEM field state and its coupling to a structure.

pub mod condition;
pub mod coupling;
pub mod dofset;
pub mod state;

pub use condition::{ConditionManager, CouplingCondition, CouplingKind};
pub use coupling::XfsCouplingManager;
pub use dofset::{CutTopology, NodalDofSets, XDofSet};
pub use state::{
    FieldStateKind, FluidVector, Lifecycle, StateContext, TransferPolicy, TransferReport,
    XFieldState, XFluidState,
};
