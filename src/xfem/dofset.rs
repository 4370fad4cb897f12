//! DOF numbering of a cut discretization.
//!
//! A cut can give one node several *nodal dof sets*: set 0 carries the
//! standard field, further sets carry the enriched or ghost-penalty values
//! of the physically disconnected parts around that node. The number of
//! sets per node comes from a [`CutTopology`]; every set holds
//! `Node::num_dofs` ids and the sets of a node are numbered back to back.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::algs::collective::agree;
use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::discretization::{Discretization, NodeId};
use crate::dofset::{DofNumbering, DofSet};
use crate::linalg::dof_map::{DofMap, Gid};

/// Result of a cut as far as the numbering is concerned.
pub trait CutTopology: Send + Sync {
    /// Number of nodal dof sets at `node`. Zero removes the node from the
    /// numbering (e.g. a node in the void).
    fn num_dof_sets(&self, node: NodeId) -> usize;
}

/// Explicit per-node set counts; nodes not listed have one set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodalDofSets {
    sets: BTreeMap<NodeId, usize>,
}

impl NodalDofSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of dof sets at `node`.
    pub fn with_sets(mut self, node: NodeId, sets: usize) -> Self {
        self.sets.insert(node, sets);
        self
    }

    pub fn set(&mut self, node: NodeId, sets: usize) {
        self.sets.insert(node, sets);
    }
}

impl CutTopology for NodalDofSets {
    fn num_dof_sets(&self, node: NodeId) -> usize {
        self.sets.get(&node).copied().unwrap_or(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    sets: usize,
    per_set: usize,
}

/// Numbering of a cut discretization by `(node, set index)`.
#[derive(Clone, Debug)]
pub struct XDofSet {
    dofs: DofSet,
    layout: BTreeMap<NodeId, Layout>,
}

impl XDofSet {
    /// Number every node of `dis` with `num_dofs * num_dof_sets` ids,
    /// starting at `start` (collective).
    ///
    /// Ghost nodes take their set count from the owner's numbering, so the
    /// topology only needs to be right for owned nodes.
    pub fn assign_degrees_of_freedom<C>(
        dis: &Discretization,
        topology: &dyn CutTopology,
        start: Gid,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let dofs = DofSet::assign_with(dis, start, comm, |n| {
            n.num_dofs * topology.num_dof_sets(n.id)
        })?;

        let layout = agree(comm, set_layouts(dis, &dofs))?;
        let enriched = layout.values().filter(|l| l.sets > 1).count();
        info!(
            "{}: xfem numbering with {} dofs, {enriched} local nodes enriched",
            dis.name(),
            dofs.num_global_dofs()
        );
        Ok(XDofSet { dofs, layout })
    }

    fn layout(&self, node: NodeId) -> Result<Layout, CouplingError> {
        self.layout
            .get(&node)
            .copied()
            .ok_or(CouplingError::UnknownNode(node))
    }

    /// Number of nodal dof sets at `node`.
    pub fn num_dof_sets(&self, node: NodeId) -> Result<usize, CouplingError> {
        Ok(self.layout(node)?.sets)
    }

    pub fn dofs_per_set(&self, node: NodeId) -> Result<usize, CouplingError> {
        Ok(self.layout(node)?.per_set)
    }

    /// Ids of dof set `set` at `node`, or `None` if the node has fewer sets.
    pub fn set_dofs(
        &self,
        node: NodeId,
        set: usize,
    ) -> Result<Option<&[Gid]>, CouplingError> {
        let Layout { sets, per_set } = self.layout(node)?;
        if set >= sets {
            return Ok(None);
        }
        let all = self.dofs.dofs(node)?;
        Ok(Some(&all[set * per_set..(set + 1) * per_set]))
    }

    /// Ids of the standard set (set 0) at `node`.
    pub fn standard_dofs(&self, node: NodeId) -> Result<Option<&[Gid]>, CouplingError> {
        self.set_dofs(node, 0)
    }

    /// Nodes known to this numbering, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.layout.keys().copied()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.layout.contains_key(&node)
    }

    /// Map of the owned standard ids (set 0 of every owned node), the
    /// layout of the uncut field inside this numbering (collective).
    pub fn standard_row_map<C>(&self, comm: &C) -> Result<DofMap, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let row_map = self.row_map();
        let gids = self.nodes().try_fold(Vec::new(), |mut gids, node| {
            if let Some(ids) = self.standard_dofs(node)? {
                gids.extend(ids.iter().copied().filter(|&g| row_map.contains(g)));
            }
            Ok::<_, CouplingError>(gids)
        });
        DofMap::new(agree(comm, gids)?, comm)
    }

    pub fn max_gid(&self) -> Option<Gid> {
        self.dofs.max_gid()
    }
}

/// Split every column node's ids into sets of `Node::num_dofs`.
fn set_layouts(
    dis: &Discretization,
    dofs: &DofSet,
) -> Result<BTreeMap<NodeId, Layout>, CouplingError> {
    let mut layout = BTreeMap::new();
    for node in dis.col_nodes() {
        let total = dofs.num_dofs_per_node(node.id)?;
        let per_set = node.num_dofs;
        if per_set == 0 {
            layout.insert(node.id, Layout { sets: 0, per_set });
            continue;
        }
        if total % per_set != 0 {
            return Err(CouplingError::DofMapInconsistent(format!(
                "node {} holds {total} ids, not a multiple of {per_set} dofs per set",
                node.id
            )));
        }
        layout.insert(
            node.id,
            Layout {
                sets: total / per_set,
                per_set,
            },
        );
    }
    Ok(layout)
}

impl DofNumbering for XDofSet {
    fn dofs(&self, node: NodeId) -> Result<&[Gid], CouplingError> {
        self.dofs.dofs(node)
    }

    fn row_map(&self) -> &Arc<DofMap> {
        self.dofs.row_map()
    }

    fn col_map(&self) -> &Arc<DofMap> {
        self.dofs.col_map()
    }
}
