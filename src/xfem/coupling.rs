//! Monolithic coupling of a structure to an XFEM fluid through a
//! penalty-regularized mortar interface.
//!
//! Per time step the driver calls, in order:
//! `predict_coupling_states`, then per Newton iteration
//! `set_coupling_states`, `add_coupling_matrix` and `add_coupling_rhs`, and
//! finally `update`. The interface force of the finished step is kept as
//! `lambda` for second-order interface time integration and for restarts.

use std::sync::Arc;

use log::{debug, info};

use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::io::{ResultReader, ResultWriter};
use crate::linalg::block::BlockSparseMatrix;
use crate::linalg::dof_map::DofMap;
use crate::linalg::sparse::SparseMatrix;
use crate::linalg::vector::DistVector;
use crate::map_extractor::MultiMapExtractor;
use crate::mortar::MortarManager;
use crate::params::XfsCouplingParams;
use crate::xfem::condition::ConditionManager;

const COMPONENT: &str = "XfsCouplingManager";
const LAMBDA_NAME: &str = "fsilambda";

#[derive(Clone, Debug)]
struct CouplingStates {
    force: DistVector,
    stiffness: SparseMatrix,
}

pub struct XfsCouplingManager {
    params: XfsCouplingParams,
    mortar: MortarManager,
    structure_map: Arc<DofMap>,
    /// Scaled interface force of the last finished step.
    lambda: DistVector,
    states: Option<CouplingStates>,
}

impl XfsCouplingManager {
    /// # Errors
    /// `InvalidParameter` if `params` are invalid or `conditions` lacks the
    /// coupling condition; a lifecycle error if `mortar` is not set up.
    pub fn new(
        params: XfsCouplingParams,
        mortar: MortarManager,
        conditions: &ConditionManager,
        structure_map: Arc<DofMap>,
    ) -> Result<Self, CouplingError> {
        params.validate()?;
        let condition = conditions.get(&params.condition_name).ok_or_else(|| {
            CouplingError::InvalidParameter(format!(
                "no coupling condition `{}` registered",
                params.condition_name
            ))
        })?;
        mortar.lambda_row_map()?;
        info!(
            "{COMPONENT}: coupling `{}` with {} interface nodes, blocks [{}, {}]",
            condition.name,
            condition.nodes.len(),
            params.structure_block,
            params.fluid_block
        );
        Ok(XfsCouplingManager {
            lambda: DistVector::new(structure_map.clone()),
            params,
            mortar,
            structure_map,
            states: None,
        })
    }

    pub fn params(&self) -> &XfsCouplingParams {
        &self.params
    }

    pub fn mortar(&self) -> &MortarManager {
        &self.mortar
    }

    /// Mutable access, e.g. to replace the interface pairs after a re-cut.
    pub fn mortar_mut(&mut self) -> &mut MortarManager {
        &mut self.mortar
    }

    /// Interface force of the last finished step.
    pub fn lambda(&self) -> &DistVector {
        &self.lambda
    }

    /// `[structure, fluid]` block indices in the global system.
    pub fn block_indices(&self) -> [usize; 2] {
        [self.params.structure_block, self.params.fluid_block]
    }

    /// Nothing to predict: the interface follows the structure.
    pub fn predict_coupling_states(&mut self) {
        debug!("{COMPONENT}: predict");
    }

    /// Forget the states of the previous iteration.
    pub fn init_coupling_states(&mut self) {
        self.states = None;
    }

    /// Evaluate the interface at `displacement` and keep the resulting
    /// force and stiffness on the structure map (collective).
    pub fn set_coupling_states<C>(
        &mut self,
        displacement: &DistVector,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        self.mortar
            .evaluate_global_coupling_contributions(displacement, comm)?;
        let mut force = DistVector::new(self.structure_map.clone());
        let mut stiffness = SparseMatrix::new(self.structure_map.clone());
        self.mortar
            .assemble_force_and_stiffness(&mut force, Some(&mut stiffness), comm)?;
        debug!(
            "{COMPONENT}: {} active multipliers",
            self.mortar.active_lambda_count(comm)?
        );
        self.states = Some(CouplingStates { force, stiffness });
        Ok(())
    }

    fn states(&self) -> Result<&CouplingStates, CouplingError> {
        self.states
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "set_coupling_states"))
    }

    /// `K_ss += scaling * K_coupling` in the structure diagonal block.
    pub fn add_coupling_matrix(
        &self,
        system: &mut BlockSparseMatrix,
        scaling: f64,
    ) -> Result<(), CouplingError> {
        let states = self.states()?;
        let s = self.params.structure_block;
        system.block_mut(s, s)?.add(&states.stiffness, scaling)
    }

    /// Subtract the interface force from the structure part of `rhs`:
    /// `rhs_s -= scaling * f`, plus `(1 - θ)/θ * λ_n` with a second-order
    /// interface.
    pub fn add_coupling_rhs(
        &self,
        rhs: &mut DistVector,
        extractor: &MultiMapExtractor,
        scaling: f64,
    ) -> Result<(), CouplingError> {
        let states = self.states()?;
        let s = self.params.structure_block;
        extractor.add_at(s, &states.force, rhs, -scaling)?;
        if self.params.interface_second_order {
            let theta = self.params.theta;
            extractor.add_at(s, &self.lambda, rhs, -(1.0 - theta) / theta)?;
        }
        Ok(())
    }

    /// Store `scaling * f` of the converged step as `lambda`.
    pub fn update(&mut self, scaling: f64) -> Result<(), CouplingError> {
        let states = self
            .states
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "set_coupling_states"))?;
        self.lambda.update(scaling, &states.force, 0.0)?;
        self.states = None;
        Ok(())
    }

    pub fn output(&self, writer: &mut dyn ResultWriter) -> Result<(), CouplingError> {
        writer.write_vector(LAMBDA_NAME, &self.lambda)
    }

    pub fn read_restart(&mut self, reader: &dyn ResultReader) -> Result<(), CouplingError> {
        self.lambda = reader.read_vector(LAMBDA_NAME, &self.structure_map)?;
        Ok(())
    }

    /// Factor between interface forces and the time-integrated system,
    /// `1 / (θ Δt)`.
    pub fn interface_timefac(&self) -> f64 {
        self.params.interface_timefac()
    }
}
