//! Read-only description of one rank's part of a discretization.
//!
//! A [`Discretization`] lists the nodes this rank sees (owned and ghosted),
//! the elements connecting them, and named node conditions (e.g. an FSI
//! interface or a contact surface). It is filled once by the caller and then
//! only borrowed by the coupling components.

pub mod node;

use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::coupling_error::CouplingError;
pub use node::{Node, NodeId};

/// Element shapes known to the interface machinery.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellShape {
    Line2,
    Tri3,
}

impl CellShape {
    #[inline]
    pub const fn num_nodes(self) -> usize {
        match self {
            CellShape::Line2 => 2,
            CellShape::Tri3 => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: u64,
    pub shape: CellShape,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Debug, Default)]
pub struct Discretization {
    name: String,
    rank: usize,
    nodes: BTreeMap<NodeId, Node>,
    elements: BTreeMap<u64, Element>,
    conditions: BTreeMap<String, BTreeSet<NodeId>>,
}

impl Discretization {
    pub fn new(name: impl Into<String>, rank: usize) -> Self {
        Discretization {
            name: name.into(),
            rank,
            ..Default::default()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Add or replace a node.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.insert(node.id, node);
        self
    }

    /// Add an element whose nodes must already be known.
    pub fn add_element(&mut self, element: Element) -> Result<&mut Self, CouplingError> {
        if element.nodes.len() != element.shape.num_nodes() {
            return Err(CouplingError::InvalidParameter(format!(
                "element {} of shape {:?} lists {} nodes",
                element.id,
                element.shape,
                element.nodes.len()
            )));
        }
        for n in &element.nodes {
            self.node(*n)?;
        }
        self.elements.insert(element.id, element);
        Ok(self)
    }

    /// Register a named node condition; every node must be known.
    pub fn add_condition<I>(
        &mut self,
        name: impl Into<String>,
        nodes: I,
    ) -> Result<&mut Self, CouplingError>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let name = name.into();
        let set: BTreeSet<NodeId> = nodes.into_iter().collect();
        for n in &set {
            self.node(*n)?;
        }
        if set.is_empty() {
            warn!("{}: condition `{name}` holds no nodes on rank {}", self.name, self.rank);
        }
        self.conditions.insert(name, set);
        Ok(self)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, CouplingError> {
        self.nodes.get(&id).ok_or(CouplingError::UnknownNode(id))
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Owned nodes in ascending id order.
    pub fn row_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values().filter(move |n| n.owner == self.rank)
    }

    /// Owned and ghosted nodes in ascending id order.
    pub fn col_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values()
    }

    pub fn num_row_nodes(&self) -> usize {
        self.row_nodes().count()
    }

    pub fn num_col_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.elements.values()
    }

    pub fn element(&self, id: u64) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn condition(&self, name: &str) -> Option<&BTreeSet<NodeId>> {
        self.conditions.get(name)
    }

    pub fn condition_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.conditions.keys().map(String::as_str)
    }
}
