//! Pair evaluators keyed by master facet shape and dofs per node.
//!
//! The registry is an ordinary value owned by whoever evaluates pairs; there
//! is no process-wide instance. [`PairEvaluatorRegistry::with_defaults`]
//! knows lines in 2D and triangles in 3D.

use hashbrown::HashMap;

use crate::coupling_error::CouplingError;
use crate::discretization::CellShape;
use crate::linalg::vector::DistVector;
use crate::mortar::pair::{InterfacePair, PairEvaluation, evaluate_line2_2d, evaluate_tri3_3d};

/// Evaluates one pair against a displacement vector holding every pair dof.
pub type PairEvaluatorFn =
    fn(&InterfacePair, &DistVector, f64) -> Result<PairEvaluation, CouplingError>;

#[derive(Clone, Debug, Default)]
pub struct PairEvaluatorRegistry {
    evaluators: HashMap<(CellShape, usize), PairEvaluatorFn>,
}

impl PairEvaluatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register(CellShape::Line2, 2, evaluate_line2_2d);
        r.register(CellShape::Tri3, 3, evaluate_tri3_3d);
        r
    }

    /// Add or replace the evaluator for `(shape, dofs_per_node)`.
    pub fn register(&mut self, shape: CellShape, dofs_per_node: usize, f: PairEvaluatorFn) {
        self.evaluators.insert((shape, dofs_per_node), f);
    }

    pub fn contains(&self, shape: CellShape, dofs_per_node: usize) -> bool {
        self.evaluators.contains_key(&(shape, dofs_per_node))
    }

    /// Evaluate `pair` with the evaluator of its master facet.
    ///
    /// # Errors
    /// `NotImplemented` when no evaluator is registered for the pair's
    /// master shape and dof count.
    pub fn evaluate(
        &self,
        pair: &InterfacePair,
        displacement: &DistVector,
        tolerance: f64,
    ) -> Result<PairEvaluation, CouplingError> {
        pair.check_layout()?;
        let key = (pair.master_shape, pair.dofs_per_node());
        let f = self.evaluators.get(&key).ok_or_else(|| {
            CouplingError::NotImplemented(format!(
                "no pair evaluator for master facet {:?} with {} dofs per node",
                key.0, key.1
            ))
        })?;
        f(pair, displacement, tolerance)
    }
}
