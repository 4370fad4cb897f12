//! Penalty-regularized mortar coupling between two non-matching surfaces.

pub mod manager;
pub mod pair;
pub mod registry;
pub mod regularization;

pub use manager::{MortarManager, PenaltyRegularization};
pub use pair::{ContactPoint, GapContribution, InterfacePair, PairEvaluation, PairNode};
pub use registry::{PairEvaluatorFn, PairEvaluatorRegistry};
pub use regularization::{Regularization, Regularized};
