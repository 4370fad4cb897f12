//! Mortar manager: multiplier dofs, constraint assembly and the penalty
//! regularization built on top of it.
//!
//! Lifecycle: [`MortarManager::setup`] numbers one block of multiplier ids
//! per interface node, [`MortarManager::set_pairs`] stores the current pairs,
//! [`MortarManager::evaluate_global_coupling_contributions`] assembles the
//! weighted gap `constraint`, the scaling `kappa` and the linearization
//! `constraint_lin` (rows: multiplier ids, columns: displacement ids). The
//! regularization and the force/stiffness assembly only read that state.

use std::sync::Arc;

use log::{debug, info};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::algs::collective::{agree, sum_all_usize};
use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::discretization::Discretization;
use crate::dofset::{DofNumbering, DofSet};
use crate::linalg::assemble::{assemble_matrix, assemble_vector};
use crate::linalg::directory::Directory;
use crate::linalg::dof_map::{DofMap, Gid};
use crate::linalg::sparse::SparseMatrix;
use crate::linalg::vector::DistVector;
use crate::mortar::pair::{ContactPoint, InterfacePair, PairEvaluation};
use crate::mortar::registry::PairEvaluatorRegistry;
use crate::mortar::regularization::Regularization;
use crate::params::MortarParams;

const COMPONENT: &str = "MortarManager";

/// Result of [`MortarManager::get_penalty_regularization`], all on the
/// multiplier row map.
#[derive(Clone, Debug, PartialEq)]
pub struct PenaltyRegularization {
    /// Regularized multiplier.
    pub lambda: DistVector,
    /// `1.0` where the constraint is active, `0.0` elsewhere.
    pub active: DistVector,
    /// `dλ/dg` when the linearization was requested.
    pub dlambda_dgap: Option<DistVector>,
}

/// Rank-local contributions of the current pairs, keyed by multiplier id.
#[derive(Default)]
struct LocalTerms {
    gap: Vec<(Gid, f64)>,
    kappa: Vec<(Gid, f64)>,
    lin: Vec<(Gid, Gid, f64)>,
    points: Vec<ContactPoint>,
}

#[derive(Clone, Debug)]
struct Evaluated {
    constraint: DistVector,
    kappa: DistVector,
    constraint_lin: SparseMatrix,
    points: Vec<ContactPoint>,
}

#[derive(Clone, Debug)]
pub struct MortarManager {
    params: MortarParams,
    start_lambda_gid: Gid,
    registry: PairEvaluatorRegistry,
    lambda_dofs: Option<DofSet>,
    lambda_directory: Option<Directory>,
    pairs: Vec<InterfacePair>,
    evaluated: Option<Evaluated>,
}

impl MortarManager {
    /// # Errors
    /// `InvalidParameter` if `params` do not validate.
    pub fn new(params: MortarParams, start_lambda_gid: Gid) -> Result<Self, CouplingError> {
        params.validate()?;
        Ok(MortarManager {
            params,
            start_lambda_gid,
            registry: PairEvaluatorRegistry::with_defaults(),
            lambda_dofs: None,
            lambda_directory: None,
            pairs: Vec::new(),
            evaluated: None,
        })
    }

    /// Replace the pair evaluators.
    pub fn with_registry(mut self, registry: PairEvaluatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    pub fn params(&self) -> &MortarParams {
        &self.params
    }

    #[inline]
    pub fn regularization(&self) -> Regularization {
        self.params.regularization
    }

    #[inline]
    pub fn start_lambda_gid(&self) -> Gid {
        self.start_lambda_gid
    }

    /// Number multiplier dofs for every node of `interface` (collective).
    /// A multiplier node is owned by the owner of its interface node.
    pub fn setup<C>(
        &mut self,
        interface: &Discretization,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let per_node = self.params.lambda_dofs_per_node;
        let dofs =
            DofSet::assign_with(interface, self.start_lambda_gid, comm, |_| per_node)?;
        self.lambda_directory = Some(Directory::build(dofs.row_map(), comm)?);
        info!(
            "{COMPONENT}: {} multiplier dofs from id {}",
            dofs.num_global_dofs(),
            self.start_lambda_gid
        );
        self.lambda_dofs = Some(dofs);
        self.evaluated = None;
        Ok(())
    }

    fn lambda_dofs(&self) -> Result<&DofSet, CouplingError> {
        self.lambda_dofs
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "setup"))
    }

    /// Multiplier ids owned by this rank.
    pub fn lambda_row_map(&self) -> Result<&Arc<DofMap>, CouplingError> {
        Ok(self.lambda_dofs()?.row_map())
    }

    /// Multiplier ids of every interface node this rank sees.
    pub fn lambda_col_map(&self) -> Result<&Arc<DofMap>, CouplingError> {
        Ok(self.lambda_dofs()?.col_map())
    }

    /// Store the pairs found by the latest geometric search.
    pub fn set_pairs(&mut self, pairs: Vec<InterfacePair>) {
        self.pairs = pairs;
        self.evaluated = None;
    }

    pub fn pairs(&self) -> &[InterfacePair] {
        &self.pairs
    }

    fn lambda_directory(&self) -> Result<&Directory, CouplingError> {
        self.lambda_directory
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "setup"))
    }

    fn evaluate_pairs(
        &self,
        displacement: &DistVector,
    ) -> Result<Vec<PairEvaluation>, CouplingError> {
        let tol = self.params.projection_tolerance;
        #[cfg(feature = "rayon")]
        let evaluations = self
            .pairs
            .par_iter()
            .map(|p| self.registry.evaluate(p, displacement, tol))
            .collect::<Result<Vec<_>, _>>();
        #[cfg(not(feature = "rayon"))]
        let evaluations = self
            .pairs
            .iter()
            .map(|p| self.registry.evaluate(p, displacement, tol))
            .collect::<Result<Vec<_>, _>>();
        evaluations
    }

    /// Assemble `constraint`, `kappa` and `constraint_lin` from the current
    /// pairs (collective). `displacement` must hold every dof of every local
    /// pair, e.g. a vector on the displacement column map.
    pub fn evaluate_global_coupling_contributions<C>(
        &mut self,
        displacement: &DistVector,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let terms = agree(comm, self.local_terms(displacement))?;
        let directory = self.lambda_directory()?;
        let row_map = self.lambda_dofs()?.row_map().clone();

        let mut constraint = DistVector::new(row_map.clone());
        let mut kappa = DistVector::new(row_map.clone());
        let mut constraint_lin = SparseMatrix::new(row_map);
        assemble_vector(&mut constraint, &terms.gap, directory, comm)?;
        assemble_vector(&mut kappa, &terms.kappa, directory, comm)?;
        assemble_matrix(&mut constraint_lin, &terms.lin, directory, comm)?;
        debug!(
            "{COMPONENT}: {} pairs, {} projected slave nodes on rank {}",
            self.pairs.len(),
            terms.points.len(),
            comm.rank()
        );
        self.evaluated = Some(Evaluated {
            constraint,
            kappa,
            constraint_lin,
            points: terms.points,
        });
        Ok(())
    }

    /// Evaluate the local pairs. Only the first multiplier dof of a slave
    /// node receives its gap.
    fn local_terms(&self, displacement: &DistVector) -> Result<LocalTerms, CouplingError> {
        let lambda_dofs = self.lambda_dofs()?;
        self.lambda_directory()?;
        let mut terms = LocalTerms::default();
        for eval in self.evaluate_pairs(displacement)? {
            for c in &eval.contributions {
                let lambda = lambda_dofs.dof(c.slave_node, 0)?;
                terms.gap.push((lambda, c.weighted_gap.value()));
                terms.kappa.push((lambda, c.weight));
                for (k, &dof) in c.dofs.iter().enumerate() {
                    let d = c.weighted_gap.dx(k);
                    if d != 0.0 {
                        terms.lin.push((lambda, dof, d));
                    }
                }
            }
            terms.points.extend(eval.points);
        }
        Ok(terms)
    }

    fn evaluated(&self) -> Result<&Evaluated, CouplingError> {
        self.lambda_dofs()?;
        self.evaluated.as_ref().ok_or_else(|| {
            CouplingError::lifecycle(COMPONENT, "evaluate_global_coupling_contributions")
        })
    }

    /// Weighted gap per multiplier dof.
    pub fn constraint(&self) -> Result<&DistVector, CouplingError> {
        Ok(&self.evaluated()?.constraint)
    }

    /// Sum of integration weights per multiplier dof.
    pub fn kappa(&self) -> Result<&DistVector, CouplingError> {
        Ok(&self.evaluated()?.kappa)
    }

    /// Derivative of `constraint` with respect to the displacement dofs.
    pub fn constraint_lin(&self) -> Result<&SparseMatrix, CouplingError> {
        Ok(&self.evaluated()?.constraint_lin)
    }

    /// Projected slave nodes of the local pairs.
    pub fn contact_points(&self) -> Result<&[ContactPoint], CouplingError> {
        Ok(&self.evaluated()?.points)
    }

    /// Regularize the normalized gap `constraint / kappa` of every owned
    /// multiplier dof. Dofs without a contributing pair stay inactive.
    pub fn get_penalty_regularization(
        &self,
        compute_linearization: bool,
    ) -> Result<PenaltyRegularization, CouplingError> {
        let state = self.evaluated()?;
        let map = state.constraint.map().clone();
        let mut lambda = DistVector::new(map.clone());
        let mut active = DistVector::new(map.clone());
        let mut derivative = DistVector::new(map);
        let regularization = self.params.regularization;

        let constraint = state.constraint.values();
        for (lid, &kappa) in state.kappa.values().iter().enumerate() {
            let r = if kappa > 0.0 {
                regularization.regularize(constraint[lid] / kappa)
            } else {
                Regularization::unconstrained()
            };
            lambda.values_mut()[lid] = r.lambda;
            active.values_mut()[lid] = if r.active { 1.0 } else { 0.0 };
            derivative.values_mut()[lid] = r.derivative;
        }
        Ok(PenaltyRegularization {
            lambda,
            active,
            dlambda_dgap: compute_linearization.then_some(derivative),
        })
    }

    /// Number of active multiplier dofs over all ranks (collective).
    pub fn active_lambda_count<C>(&self, comm: &C) -> Result<usize, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let local = self
            .get_penalty_regularization(false)
            .map(|reg| reg.active.values().iter().filter(|&&a| a > 0.0).count());
        sum_all_usize(comm, agree(comm, local)?)
    }

    /// Add the penalty force `f_j = Σ_l G_lj λ_l` to `force` and, if given,
    /// the stiffness `K_jk = Σ_l G_lj (dλ/dg)_l / κ_l G_lk` to `stiffness`
    /// (collective). Both must be laid out on one-to-one displacement maps.
    pub fn assemble_force_and_stiffness<C>(
        &self,
        force: &mut DistVector,
        stiffness: Option<&mut SparseMatrix>,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let (force_terms, stiff_terms) =
            agree(comm, self.penalty_terms(stiffness.is_some()))?;

        let force_dir = Directory::build(force.map(), comm)?;
        assemble_vector(force, &force_terms, &force_dir, comm)?;
        if let Some(k) = stiffness {
            let stiff_dir = Directory::build(k.row_map(), comm)?;
            assemble_matrix(k, &stiff_terms, &stiff_dir, comm)?;
        }
        Ok(())
    }

    /// Local force and (optionally) stiffness contributions of the owned
    /// multiplier rows.
    fn penalty_terms(&self, with_stiffness: bool) -> Result<PenaltyTerms, CouplingError> {
        let state = self.evaluated()?;
        let reg = self.get_penalty_regularization(with_stiffness)?;
        let lin = &state.constraint_lin;

        let mut force_terms = Vec::new();
        let mut stiff_terms = Vec::new();
        for (lid, &l_gid) in lin.row_map().gids().iter().enumerate() {
            let Some(row) = lin.row(l_gid) else { continue };
            let lambda = reg.lambda.values()[lid];
            if lambda != 0.0 {
                force_terms.extend(row.iter().map(|(&j, &g)| (j, g * lambda)));
            }
            if let Some(d) = &reg.dlambda_dgap {
                let kappa = state.kappa.values()[lid];
                let scale = d.values()[lid];
                if kappa > 0.0 && scale != 0.0 {
                    let factor = scale / kappa;
                    for (&j, &gj) in row {
                        stiff_terms
                            .extend(row.iter().map(|(&k, &gk)| (j, k, gj * factor * gk)));
                    }
                }
            }
        }
        Ok((force_terms, stiff_terms))
    }
}

type PenaltyTerms = (Vec<(Gid, f64)>, Vec<(Gid, Gid, f64)>);
