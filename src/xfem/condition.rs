//! Named coupling conditions between an XFEM field and its cutting
//! discretizations.

use std::collections::BTreeSet;

use log::debug;

use crate::coupling_error::CouplingError;
use crate::discretization::{Discretization, NodeId};

/// How the interface of a condition is described.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CouplingKind {
    /// Interface given by the surface mesh of another discretization.
    Mesh,
    /// Interface given implicitly on the background mesh.
    LevelSet,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CouplingCondition {
    pub name: String,
    pub kind: CouplingKind,
    /// Discretization the condition was read from.
    pub source: String,
    /// Interface nodes of `source` visible on this rank.
    pub nodes: BTreeSet<NodeId>,
}

/// Ordered collection of coupling conditions; the position of a condition
/// is its coupling index.
#[derive(Clone, Debug, Default)]
pub struct ConditionManager {
    conditions: Vec<CouplingCondition>,
}

impl ConditionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the node condition `name` of `dis` as a mesh coupling.
    ///
    /// # Errors
    /// `InvalidParameter` if `dis` has no such condition or the name is
    /// already registered.
    pub fn add_mesh_coupling(
        &mut self,
        name: &str,
        dis: &Discretization,
    ) -> Result<usize, CouplingError> {
        let nodes = dis.condition(name).ok_or_else(|| {
            CouplingError::InvalidParameter(format!(
                "discretization `{}` has no condition `{name}`",
                dis.name()
            ))
        })?;
        self.push(CouplingCondition {
            name: name.to_owned(),
            kind: CouplingKind::Mesh,
            source: dis.name().to_owned(),
            nodes: nodes.clone(),
        })
    }

    /// Register a level-set coupling on the background discretization.
    pub fn add_levelset_coupling(
        &mut self,
        name: &str,
        background: &Discretization,
    ) -> Result<usize, CouplingError> {
        self.push(CouplingCondition {
            name: name.to_owned(),
            kind: CouplingKind::LevelSet,
            source: background.name().to_owned(),
            nodes: BTreeSet::new(),
        })
    }

    fn push(&mut self, condition: CouplingCondition) -> Result<usize, CouplingError> {
        if self.index_of(&condition.name).is_some() {
            return Err(CouplingError::InvalidParameter(format!(
                "coupling condition `{}` registered twice",
                condition.name
            )));
        }
        debug!(
            "condition manager: `{}` ({:?}) from `{}` with {} nodes",
            condition.name,
            condition.kind,
            condition.source,
            condition.nodes.len()
        );
        self.conditions.push(condition);
        Ok(self.conditions.len() - 1)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.conditions.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&CouplingCondition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    /// Like [`ConditionManager::get`] but failing with `UnknownSubset`.
    pub fn condition(&self, name: &str) -> Result<&CouplingCondition, CouplingError> {
        self.get(name)
            .ok_or_else(|| CouplingError::UnknownSubset(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.conditions.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn has_mesh_coupling(&self) -> bool {
        self.conditions.iter().any(|c| c.kind == CouplingKind::Mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::Node;

    #[test]
    fn conditions_keep_registration_order() {
        let id = NodeId::new(4).unwrap();
        let mut structure = Discretization::new("structure", 0);
        structure.add_node(Node::new(id, 0, [0.0; 3], 2));
        structure.add_condition("XFEMSurfFSIMono", [id]).unwrap();
        let fluid = Discretization::new("fluid", 0);

        let mut cm = ConditionManager::new();
        assert_eq!(cm.add_levelset_coupling("levelset", &fluid).unwrap(), 0);
        assert_eq!(cm.add_mesh_coupling("XFEMSurfFSIMono", &structure).unwrap(), 1);
        assert!(cm.has_mesh_coupling());
        assert_eq!(cm.names().collect::<Vec<_>>(), ["levelset", "XFEMSurfFSIMono"]);
        assert!(cm.condition("XFEMSurfFSIMono").unwrap().nodes.contains(&id));

        assert!(cm.add_mesh_coupling("XFEMSurfFSIMono", &structure).is_err());
        assert!(cm.add_mesh_coupling("missing", &structure).is_err());
        assert_eq!(
            cm.condition("missing").unwrap_err(),
            CouplingError::UnknownSubset("missing".into())
        );
    }
}
