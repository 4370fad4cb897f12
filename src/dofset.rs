//! Global DOF numbering of a discretization.
//!
//! [`DofSet`] is the base numbering: every owned node receives a contiguous
//! block of ids, ranks numbered in ascending order starting at a caller
//! supplied offset, and ghosted nodes learn their ids from their owners.
//!
//! [`MortarDofSet`] runs the base numbering and then swaps every node's ids
//! for the node-level ids the discretization supplies, checking that the
//! replacement is one-to-one with the base numbering.
//!
//! # Invariants
//! - `row_map` ids are globally unique.
//! - Every id of `row_map` is also in `col_map` on the same rank.
//! - Each node holds the same number of ids in both numberings.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::algs::collective::{agree, allgather_u64, exchange};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireNodeDofs;
use crate::coupling_error::CouplingError;
use crate::debug_invariants::DebugInvariants;
use crate::discretization::{Discretization, Node, NodeId};
use crate::linalg::dof_map::{DofMap, Gid};

const TAG_REQUEST: CommTag = CommTag::DOFSET;
const TAG_REPLY: CommTag = CommTag::DOFSET.offset(2);

/// Read access shared by every numbering in this crate.
pub trait DofNumbering {
    /// Ids of `node` in local-dof order.
    fn dofs(&self, node: NodeId) -> Result<&[Gid], CouplingError>;
    fn row_map(&self) -> &Arc<DofMap>;
    fn col_map(&self) -> &Arc<DofMap>;

    /// The `index`-th id of `node`.
    fn dof(&self, node: NodeId, index: usize) -> Result<Gid, CouplingError> {
        let dofs = self.dofs(node)?;
        dofs.get(index).copied().ok_or_else(|| CouplingError::DofCountMismatch {
            node,
            expected: index + 1,
            found: dofs.len(),
        })
    }

    fn num_global_dofs(&self) -> usize {
        self.row_map().num_global()
    }
}

#[derive(Clone, Debug)]
pub struct DofSet {
    node_dofs: BTreeMap<NodeId, Vec<Gid>>,
    row_map: Arc<DofMap>,
    col_map: Arc<DofMap>,
    max_gid: Option<Gid>,
}

impl DofSet {
    /// Number `dis` with `Node::num_dofs` ids per node, starting at `start`
    /// (collective). Returns the set; its global size is
    /// [`DofNumbering::num_global_dofs`].
    pub fn assign_degrees_of_freedom<C>(
        dis: &Discretization,
        start: Gid,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        Self::assign_with(dis, start, comm, |n| n.num_dofs)
    }

    /// Like [`DofSet::assign_degrees_of_freedom`] with a caller-chosen dof
    /// count per node.
    pub fn assign_with<C, F>(
        dis: &Discretization,
        start: Gid,
        comm: &C,
        mut count: F,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
        F: FnMut(&Node) -> usize,
    {
        let me = comm.rank();
        let row_counts: Vec<(NodeId, usize)> =
            dis.row_nodes().map(|n| (n.id, count(n))).collect();
        let local_total: usize = row_counts.iter().map(|(_, c)| c).sum();
        let totals = allgather_u64(comm, local_total as u64)?;
        let offset: u64 = totals.iter().take(me).sum();
        let global_total: u64 = totals.iter().sum();

        let mut node_dofs = BTreeMap::new();
        let mut next = start + offset as Gid;
        for (id, c) in row_counts {
            node_dofs.insert(id, (next..next + c as Gid).collect::<Vec<_>>());
            next += c as Gid;
        }

        Self::fetch_ghost_dofs(dis, &mut node_dofs, comm)?;

        let row_gids = dis
            .row_nodes()
            .flat_map(|n| node_dofs[&n.id].iter().copied())
            .collect();
        let col_gids = dis
            .col_nodes()
            .flat_map(|n| node_dofs[&n.id].iter().copied())
            .collect();
        let set = DofSet {
            row_map: Arc::new(DofMap::new(row_gids, comm)?),
            col_map: Arc::new(DofMap::new(col_gids, comm)?),
            max_gid: (global_total > 0).then(|| start + global_total as Gid - 1),
            node_dofs,
        };
        crate::debug_invariants!(set.validate_invariants(), "DofSet::assign_with");
        info!(
            "{}: assigned {} dofs starting at {start}",
            dis.name(),
            global_total
        );
        Ok(set)
    }

    /// Ask each ghost node's owner for its ids.
    fn fetch_ghost_dofs<C>(
        dis: &Discretization,
        node_dofs: &mut BTreeMap<NodeId, Vec<Gid>>,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let me = comm.rank();
        let mut requests: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        for ghost in dis.col_nodes().filter(|n| n.owner != me) {
            requests.entry(ghost.owner).or_default().push(ghost.id.get());
        }
        let incoming = exchange(comm, TAG_REQUEST, &requests)?;

        // Answer every request we can before reporting any failure, so the
        // requesting ranks are not left waiting.
        let mut unknown = None;
        let mut replies: BTreeMap<usize, Vec<WireNodeDofs>> = BTreeMap::new();
        for (peer, ids) in incoming {
            let out = replies.entry(peer).or_default();
            for raw in ids {
                let known = NodeId::new(raw)
                    .ok()
                    .and_then(|id| node_dofs.get(&id).map(|d| (id, d)));
                match known {
                    Some((id, dofs)) => {
                        let first = dofs.first().copied().unwrap_or(0);
                        out.push(WireNodeDofs::new(id.get(), first, dofs.len()));
                    }
                    None => unknown = unknown.or(Some(raw)),
                }
            }
        }
        let answers = exchange(comm, TAG_REPLY, &replies)?;
        let stored = match unknown {
            Some(raw) => NodeId::new(raw).and_then(|id| Err(CouplingError::UnknownNode(id))),
            None => Self::store_answers(dis, node_dofs, answers),
        };
        agree(comm, stored)?;
        debug!(
            "dofset: rank {me} fetched ids of {} ghost nodes",
            requests.values().map(Vec::len).sum::<usize>()
        );
        Ok(())
    }

    fn store_answers(
        dis: &Discretization,
        node_dofs: &mut BTreeMap<NodeId, Vec<Gid>>,
        answers: BTreeMap<usize, Vec<WireNodeDofs>>,
    ) -> Result<(), CouplingError> {
        for record in answers.into_values().flatten() {
            let id = NodeId::new(record.node())?;
            let first = record.first();
            node_dofs.insert(id, (first..first + record.count() as Gid).collect());
        }
        match dis.col_nodes().find(|n| !node_dofs.contains_key(&n.id)) {
            Some(missing) => Err(CouplingError::UnknownNode(missing.id)),
            None => Ok(()),
        }
    }

    /// Largest id assigned on any rank.
    #[inline]
    pub fn max_gid(&self) -> Option<Gid> {
        self.max_gid
    }

    /// Nodes this numbering knows, in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_dofs.keys().copied()
    }

    pub fn num_dofs_per_node(&self, node: NodeId) -> Result<usize, CouplingError> {
        Ok(self.dofs(node)?.len())
    }
}

impl DofNumbering for DofSet {
    fn dofs(&self, node: NodeId) -> Result<&[Gid], CouplingError> {
        self.node_dofs
            .get(&node)
            .map(Vec::as_slice)
            .ok_or(CouplingError::UnknownNode(node))
    }

    fn row_map(&self) -> &Arc<DofMap> {
        &self.row_map
    }

    fn col_map(&self) -> &Arc<DofMap> {
        &self.col_map
    }
}

impl DebugInvariants for DofSet {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DofSet");
    }

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        if let Some(gid) = self.row_map.gids().iter().find(|&&g| !self.col_map.contains(g)) {
            return Err(CouplingError::DofMapInconsistent(format!(
                "row id {gid} missing from the column map"
            )));
        }
        let listed: usize = self.node_dofs.values().map(Vec::len).sum();
        if listed != self.col_map.num_my() {
            return Err(CouplingError::DofMapInconsistent(format!(
                "nodes list {listed} ids, column map holds {}",
                self.col_map.num_my()
            )));
        }
        Ok(())
    }
}

/// Numbering whose ids come from the nodes themselves
/// (`Node::custom_dofs`), validated against a base numbering.
#[derive(Clone, Debug)]
pub struct MortarDofSet {
    inner: DofSet,
}

impl MortarDofSet {
    /// Run the base numbering, then replace every node's ids by its
    /// node-level ids (collective).
    ///
    /// # Errors
    /// - `DofCountMismatch` if a node supplies no ids or a different number
    ///   of ids than the base numbering assigned.
    /// - `DofMapInconsistent` if the replaced row/column maps differ in size
    ///   from the base maps or the row ids are not globally unique.
    pub fn assign_degrees_of_freedom<C>(
        dis: &Discretization,
        start: Gid,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let base = DofSet::assign_degrees_of_freedom(dis, start, comm)?;

        let node_dofs = agree(comm, node_level_dofs(dis, &base))?;

        let row_gids: Vec<Gid> = dis
            .row_nodes()
            .flat_map(|n| node_dofs[&n.id].iter().copied())
            .collect();
        let col_gids: Vec<Gid> = dis
            .col_nodes()
            .flat_map(|n| node_dofs[&n.id].iter().copied())
            .collect();
        let row_map = DofMap::new(row_gids, comm).map_err(|e| inconsistent("row", e))?;
        let col_map = DofMap::new(col_gids, comm).map_err(|e| inconsistent("column", e))?;

        agree(
            comm,
            check_same_size("row", &row_map, &base.row_map)
                .and_then(|()| check_same_size("column", &col_map, &base.col_map)),
        )?;
        if !row_map.is_one_to_one(comm)? {
            return Err(CouplingError::DofMapInconsistent(
                "node-level row ids are not globally unique".into(),
            ));
        }

        let local_max = row_map.max_my_gid().unwrap_or(Gid::MIN);
        let max_gid = allgather_u64(comm, local_max as u64)?
            .into_iter()
            .map(|v| v as Gid)
            .max()
            .filter(|&m| m != Gid::MIN);

        let inner = DofSet {
            node_dofs,
            row_map: Arc::new(row_map),
            col_map: Arc::new(col_map),
            max_gid,
        };
        crate::debug_invariants!(inner.validate_invariants(), "MortarDofSet");
        info!(
            "{}: replaced {} base dofs by node-level ids",
            dis.name(),
            inner.num_global_dofs()
        );
        Ok(MortarDofSet { inner })
    }

    /// The validated numbering.
    pub fn as_dof_set(&self) -> &DofSet {
        &self.inner
    }

    pub fn into_dof_set(self) -> DofSet {
        self.inner
    }

    pub fn max_gid(&self) -> Option<Gid> {
        self.inner.max_gid()
    }
}

impl DofNumbering for MortarDofSet {
    fn dofs(&self, node: NodeId) -> Result<&[Gid], CouplingError> {
        self.inner.dofs(node)
    }

    fn row_map(&self) -> &Arc<DofMap> {
        &self.inner.row_map
    }

    fn col_map(&self) -> &Arc<DofMap> {
        &self.inner.col_map
    }
}

/// Node-level ids of every column node, checked against the base counts.
fn node_level_dofs(
    dis: &Discretization,
    base: &DofSet,
) -> Result<BTreeMap<NodeId, Vec<Gid>>, CouplingError> {
    let mut node_dofs = BTreeMap::new();
    for node in dis.col_nodes() {
        let expected = base.dofs(node.id)?.len();
        let custom = node.custom_dofs.as_deref().unwrap_or(&[]);
        if custom.len() != expected {
            return Err(CouplingError::DofCountMismatch {
                node: node.id,
                expected,
                found: custom.len(),
            });
        }
        node_dofs.insert(node.id, custom.to_vec());
    }
    Ok(node_dofs)
}

fn inconsistent(what: &str, e: CouplingError) -> CouplingError {
    match e {
        CouplingError::RankFailed { .. } => e,
        e => CouplingError::DofMapInconsistent(format!("{what} map: {e}")),
    }
}

fn check_same_size(what: &str, new: &DofMap, base: &DofMap) -> Result<(), CouplingError> {
    if new.num_my() != base.num_my() || new.num_global() != base.num_global() {
        return Err(CouplingError::DofMapInconsistent(format!(
            "{what} map has {} local / {} global ids, base numbering has {} / {}",
            new.num_my(),
            new.num_global(),
            base.num_my(),
            base.num_global()
        )));
    }
    Ok(())
}
