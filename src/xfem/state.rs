//! State vectors of one XFEM field and their migration across re-cuts.
//!
//! [`XFieldState`] holds the shared collaborators of a state (condition
//! manager, cut topology, XFEM numbering, the cut and the uncut
//! discretization) and tracks the lifecycle
//!
//! ```text
//! Uninitialized -> Initialized -> SetUp -> Active -> Destroyed
//!                  (init)        (setup)  (first write/update)
//! ```
//!
//! Concrete field combinations implement [`FieldStateKind`]; the fluid
//! variant is [`XFluidState`].
//!
//! When the interface moves the field is cut again, a new numbering is
//! built and a new state is set up on it. [`FieldStateKind::transfer_to_new_state`]
//! then moves every value whose `(node, set index, component)` still exists
//! and fills the rest according to a [`TransferPolicy`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::coupling_error::CouplingError;
use crate::discretization::Discretization;
use crate::dofset::DofNumbering;
use crate::io::{ResultReader, ResultWriter};
use crate::linalg::dof_map::DofMap;
use crate::linalg::vector::DistVector;
use crate::xfem::condition::ConditionManager;
use crate::xfem::dofset::{CutTopology, XDofSet};

const COMPONENT: &str = "XFieldState";

/// Collaborators wired into a state by `init`. All are shared read-only.
#[derive(Clone)]
pub struct StateContext {
    pub condition_manager: Arc<ConditionManager>,
    pub cut_topology: Arc<dyn CutTopology>,
    pub xdofset: Arc<XDofSet>,
    pub xfield_discret: Arc<Discretization>,
    pub field_discret: Arc<Discretization>,
}

impl fmt::Debug for StateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContext")
            .field("conditions", &self.condition_manager.len())
            .field("xdofs", &self.xdofset.num_global_dofs())
            .field("xfield_discret", &self.xfield_discret.name())
            .field("field_discret", &self.field_discret.name())
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    SetUp,
    Active,
    Destroyed,
}

/// Lifecycle and collaborators shared by every field state.
#[derive(Clone, Debug)]
pub struct XFieldState {
    lifecycle: Lifecycle,
    context: Option<StateContext>,
}

impl Default for XFieldState {
    fn default() -> Self {
        XFieldState {
            lifecycle: Lifecycle::Uninitialized,
            context: None,
        }
    }
}

impl XFieldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state with `init` already applied.
    pub fn initialized(context: StateContext) -> Self {
        XFieldState {
            lifecycle: Lifecycle::Initialized,
            context: Some(context),
        }
    }

    /// Wire the collaborators. No heavy work happens here.
    ///
    /// # Errors
    /// `AlreadyInitialized` on a second call, `Destroyed` after `destroy`.
    pub fn init(&mut self, context: StateContext) -> Result<(), CouplingError> {
        match self.lifecycle {
            Lifecycle::Uninitialized => {
                self.context = Some(context);
                self.lifecycle = Lifecycle::Initialized;
                Ok(())
            }
            Lifecycle::Destroyed => Err(CouplingError::Destroyed(COMPONENT)),
            _ => Err(CouplingError::AlreadyInitialized(COMPONENT)),
        }
    }

    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn context(&self) -> Result<&StateContext, CouplingError> {
        match (&self.context, self.lifecycle) {
            (_, Lifecycle::Destroyed) => Err(CouplingError::Destroyed(COMPONENT)),
            (Some(ctx), _) => Ok(ctx),
            (None, _) => Err(CouplingError::lifecycle(COMPONENT, "init")),
        }
    }

    pub fn cut_topology(&self) -> Result<&dyn CutTopology, CouplingError> {
        Ok(self.context()?.cut_topology.as_ref())
    }

    pub fn condition_manager(&self) -> Result<&ConditionManager, CouplingError> {
        Ok(&self.context()?.condition_manager)
    }

    pub fn xdofset(&self) -> Result<&Arc<XDofSet>, CouplingError> {
        Ok(&self.context()?.xdofset)
    }

    pub fn xfield_discret(&self) -> Result<&Discretization, CouplingError> {
        Ok(&self.context()?.xfield_discret)
    }

    pub fn field_discret(&self) -> Result<&Discretization, CouplingError> {
        Ok(&self.context()?.field_discret)
    }

    pub(crate) fn check_init_setup(&self) -> Result<(), CouplingError> {
        match self.lifecycle {
            Lifecycle::SetUp | Lifecycle::Active => Ok(()),
            Lifecycle::Initialized => Err(CouplingError::lifecycle(COMPONENT, "setup")),
            Lifecycle::Uninitialized => Err(CouplingError::lifecycle(COMPONENT, "init")),
            Lifecycle::Destroyed => Err(CouplingError::Destroyed(COMPONENT)),
        }
    }

    pub(crate) fn mark_set_up(&mut self) -> Result<(), CouplingError> {
        self.context()?;
        self.lifecycle = Lifecycle::SetUp;
        Ok(())
    }

    pub(crate) fn mark_active(&mut self) {
        if self.lifecycle == Lifecycle::SetUp {
            self.lifecycle = Lifecycle::Active;
        }
    }

    /// Release the collaborators. Returns `false` if already destroyed.
    pub(crate) fn mark_destroyed(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Destroyed {
            return false;
        }
        self.context = None;
        self.lifecycle = Lifecycle::Destroyed;
        true
    }

    fn adopt(&mut self, other: &XFieldState) {
        self.context = other.context.clone();
        self.lifecycle = other.lifecycle;
    }
}

/// Fill rule for dofs of the new numbering without an old counterpart.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum TransferPolicy {
    /// New dofs start at zero.
    #[default]
    Zero,
    /// New dofs take the old value of the same component in the node's
    /// standard set; zero if the node had no standard set.
    CopyStandard,
    Constant(f64),
}

impl TransferPolicy {
    fn fill(self, standard: Option<f64>) -> f64 {
        match self {
            TransferPolicy::Zero => 0.0,
            TransferPolicy::CopyStandard => standard.unwrap_or(0.0),
            TransferPolicy::Constant(c) => c,
        }
    }
}

/// Owned dof counts of one transfer (per dof, not per vector).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Dofs whose value was carried from the old numbering.
    pub carried: usize,
    /// New dofs filled by the transfer policy.
    pub defaulted: usize,
    /// Old dofs without a counterpart in the new numbering.
    pub dropped: usize,
}

/// Operations every concrete field state provides.
pub trait FieldStateKind {
    fn state(&self) -> &XFieldState;

    /// Allocate the state vectors on the XFEM numbering.
    fn setup(&mut self) -> Result<(), CouplingError>;

    /// Release vectors and collaborators; `false` if nothing was left.
    fn destroy(&mut self) -> bool;

    /// Move values into `new_state`, which must be set up on the new
    /// numbering.
    fn transfer_to_new_state(
        &self,
        new_state: &mut Self,
        policy: TransferPolicy,
    ) -> Result<TransferReport, CouplingError>
    where
        Self: Sized;

    /// Zero every entry whose id is not in `standard_row_map`. Returns the
    /// number of local ids reset.
    fn reset_non_standard_dofs(
        &mut self,
        standard_row_map: &DofMap,
    ) -> Result<usize, CouplingError>;

    /// Take over collaborators and vectors of `other`.
    fn set_new_state(&mut self, other: &Self) -> Result<(), CouplingError>
    where
        Self: Sized;
}

#[derive(Copy, Clone, Debug)]
enum Source {
    Carried(usize),
    Fresh(Option<usize>),
}

/// Lid correspondence between two numberings of the same discretization.
struct TransferPlan {
    targets: Vec<(usize, Source)>,
    dropped: usize,
}

impl TransferPlan {
    fn build(old: &XDofSet, new: &XDofSet) -> Result<Self, CouplingError> {
        let old_row = old.row_map();
        let new_row = new.row_map();
        let old_lid = |gid| {
            old_row.lid(gid).ok_or_else(|| {
                CouplingError::DofMapInconsistent(format!(
                    "old id {gid} is not owned here; nodes must keep their owner across a re-cut"
                ))
            })
        };

        let mut targets = Vec::new();
        for node in new.nodes() {
            let known = old.contains_node(node);
            let standard = if known { old.standard_dofs(node)? } else { None };
            for set in 0..new.num_dof_sets(node)? {
                let Some(ids) = new.set_dofs(node, set)? else { continue };
                let previous = if known { old.set_dofs(node, set)? } else { None };
                for (k, &gid) in ids.iter().enumerate() {
                    let Some(lid) = new_row.lid(gid) else { continue };
                    let source = match previous.and_then(|p| p.get(k)) {
                        Some(&g) => Source::Carried(old_lid(g)?),
                        None => {
                            let s = standard
                                .and_then(|s| s.get(k))
                                .map(|&g| old_lid(g))
                                .transpose()?;
                            Source::Fresh(s)
                        }
                    };
                    targets.push((lid, source));
                }
            }
        }

        let mut dropped = 0;
        for node in old.nodes() {
            let (kept_sets, kept_per_set) = if new.contains_node(node) {
                (new.num_dof_sets(node)?, new.dofs_per_set(node)?)
            } else {
                (0, 0)
            };
            for set in 0..old.num_dof_sets(node)? {
                let Some(ids) = old.set_dofs(node, set)? else { continue };
                let kept = if set < kept_sets { kept_per_set } else { 0 };
                dropped += ids.iter().skip(kept).filter(|&&g| old_row.contains(g)).count();
            }
        }
        Ok(TransferPlan { targets, dropped })
    }

    fn apply(&self, src: &DistVector, dst: &mut DistVector, policy: TransferPolicy) {
        let old = src.values();
        let new = dst.values_mut();
        for &(lid, source) in &self.targets {
            new[lid] = match source {
                Source::Carried(l) => old[l],
                Source::Fresh(standard) => policy.fill(standard.map(|l| old[l])),
            };
        }
    }

    fn report(&self) -> TransferReport {
        let carried = self
            .targets
            .iter()
            .filter(|(_, s)| matches!(s, Source::Carried(_)))
            .count();
        TransferReport {
            carried,
            defaulted: self.targets.len() - carried,
            dropped: self.dropped,
        }
    }
}

/// Named state vectors of a fluid field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FluidVector {
    /// Velocity/pressure at `t^{n+1}`.
    Velnp,
    Veln,
    Velnm,
    /// Acceleration at `t^{n+1}`.
    Accnp,
    Accn,
    /// History vector of the time integrator.
    Hist,
    /// Grid displacement (ALE only).
    Dispnp,
    /// Grid velocity (ALE only).
    Gridvnp,
}

impl FluidVector {
    pub const ALL: [FluidVector; 8] = [
        FluidVector::Velnp,
        FluidVector::Veln,
        FluidVector::Velnm,
        FluidVector::Accnp,
        FluidVector::Accn,
        FluidVector::Hist,
        FluidVector::Dispnp,
        FluidVector::Gridvnp,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            FluidVector::Velnp => "velnp",
            FluidVector::Veln => "veln",
            FluidVector::Velnm => "velnm",
            FluidVector::Accnp => "accnp",
            FluidVector::Accn => "accn",
            FluidVector::Hist => "hist",
            FluidVector::Dispnp => "dispnp",
            FluidVector::Gridvnp => "gridvnp",
        }
    }

    pub const fn is_ale(self) -> bool {
        matches!(self, FluidVector::Dispnp | FluidVector::Gridvnp)
    }
}

/// State of an XFEM fluid, optionally on a moving (ALE) mesh.
#[derive(Clone, Debug)]
pub struct XFluidState {
    base: XFieldState,
    ale: bool,
    vectors: BTreeMap<FluidVector, DistVector>,
}

impl XFluidState {
    pub fn new(ale: bool) -> Self {
        XFluidState {
            base: XFieldState::new(),
            ale,
            vectors: BTreeMap::new(),
        }
    }

    pub fn initialized(context: StateContext, ale: bool) -> Self {
        XFluidState {
            base: XFieldState::initialized(context),
            ale,
            vectors: BTreeMap::new(),
        }
    }

    pub fn init(&mut self, context: StateContext) -> Result<(), CouplingError> {
        self.base.init(context)
    }

    #[inline]
    pub fn is_ale(&self) -> bool {
        self.ale
    }

    pub fn vector(&self, which: FluidVector) -> Result<&DistVector, CouplingError> {
        self.base.check_init_setup()?;
        self.vectors.get(&which).ok_or_else(|| not_allocated(which))
    }

    /// Mutable access; the first write makes the state active.
    pub fn vector_mut(&mut self, which: FluidVector) -> Result<&mut DistVector, CouplingError> {
        self.base.check_init_setup()?;
        self.base.mark_active();
        self.vectors.get_mut(&which).ok_or_else(|| not_allocated(which))
    }

    /// Allocated vectors in [`FluidVector::ALL`] order.
    pub fn vectors(&self) -> impl Iterator<Item = (FluidVector, &DistVector)> + '_ {
        self.vectors.iter().map(|(&k, v)| (k, v))
    }

    /// Shift the time levels: `velnm <- veln <- velnp`, `accn <- accnp`.
    pub fn update(&mut self) -> Result<(), CouplingError> {
        self.base.check_init_setup()?;
        self.shift(FluidVector::Veln, FluidVector::Velnm)?;
        self.shift(FluidVector::Velnp, FluidVector::Veln)?;
        self.shift(FluidVector::Accnp, FluidVector::Accn)?;
        self.base.mark_active();
        Ok(())
    }

    /// Write every allocated vector under its name.
    pub fn output(&self, writer: &mut dyn ResultWriter) -> Result<(), CouplingError> {
        self.base.check_init_setup()?;
        for (which, v) in &self.vectors {
            writer.write_vector(which.name(), v)?;
        }
        Ok(())
    }

    /// Replace every allocated vector by its restart value.
    pub fn read_restart(&mut self, reader: &dyn ResultReader) -> Result<(), CouplingError> {
        self.base.check_init_setup()?;
        for (which, v) in self.vectors.iter_mut() {
            *v = reader.read_vector(which.name(), v.map())?;
        }
        self.base.mark_active();
        Ok(())
    }

    fn shift(&mut self, from: FluidVector, to: FluidVector) -> Result<(), CouplingError> {
        let values = self.vector(from)?.values().to_vec();
        self.vector_mut(to)?.values_mut().copy_from_slice(&values);
        Ok(())
    }
}

fn not_allocated(which: FluidVector) -> CouplingError {
    CouplingError::InvalidParameter(format!(
        "state vector `{}` is only allocated for ALE fluids",
        which.name()
    ))
}

impl FieldStateKind for XFluidState {
    fn state(&self) -> &XFieldState {
        &self.base
    }

    fn setup(&mut self) -> Result<(), CouplingError> {
        let map = self.base.xdofset()?.row_map().clone();
        self.vectors = FluidVector::ALL
            .into_iter()
            .filter(|v| self.ale || !v.is_ale())
            .map(|v| (v, DistVector::new(map.clone())))
            .collect();
        self.base.mark_set_up()?;
        debug!(
            "XFluidState: {} vectors on {} local dofs",
            self.vectors.len(),
            map.num_my()
        );
        Ok(())
    }

    fn destroy(&mut self) -> bool {
        self.vectors.clear();
        self.base.mark_destroyed()
    }

    fn transfer_to_new_state(
        &self,
        new_state: &mut Self,
        policy: TransferPolicy,
    ) -> Result<TransferReport, CouplingError> {
        self.base.check_init_setup()?;
        new_state.base.check_init_setup()?;
        let old = self.base.xdofset()?;
        let plan = TransferPlan::build(old, new_state.base.xdofset()?)?;

        for (which, dst) in new_state.vectors.iter_mut() {
            let Some(src) = self.vectors.get(which) else { continue };
            if !src.map().same_as(old.row_map()) {
                return Err(CouplingError::MapMismatch(format!(
                    "`{}` is not laid out on the old XFEM row map",
                    which.name()
                )));
            }
            plan.apply(src, dst, policy);
        }
        let report = plan.report();
        info!(
            "XFluidState: transferred {} dofs, {} filled by {:?}, {} dropped",
            report.carried, report.defaulted, policy, report.dropped
        );
        Ok(report)
    }

    fn reset_non_standard_dofs(
        &mut self,
        standard_row_map: &DofMap,
    ) -> Result<usize, CouplingError> {
        self.base.check_init_setup()?;
        let map = self.base.xdofset()?.row_map().clone();
        let enriched: Vec<usize> = map
            .gids()
            .iter()
            .enumerate()
            .filter(|&(_, &g)| !standard_row_map.contains(g))
            .map(|(lid, _)| lid)
            .collect();
        for v in self.vectors.values_mut() {
            let values = v.values_mut();
            for &lid in &enriched {
                values[lid] = 0.0;
            }
        }
        Ok(enriched.len())
    }

    fn set_new_state(&mut self, other: &Self) -> Result<(), CouplingError> {
        other.base.context()?;
        self.base.adopt(&other.base);
        self.ale = other.ale;
        self.vectors = other.vectors.clone();
        Ok(())
    }
}
