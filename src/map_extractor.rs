//! Split a full DOF space into named, disjoint subsets and move vectors
//! between the full space and each subset.
//!
//! A [`MultiMapExtractor`] keeps an ordered list of named partial maps of one
//! full map. `extract` copies the subset entries of a full vector into a
//! vector on the partial map; `insert` writes them back and leaves every
//! other entry untouched. For any name, inserting an extracted vector into a
//! zero vector reproduces the original restricted to that subset, and
//! operations on different names never touch the same entry.
//!
//! [`MapExtractor`] is the common two-subset case (a condition and the rest),
//! and [`MultiMapExtractor::setup_from_conditions`] derives the subsets from
//! named node conditions of a discretization.

use std::ops::Range;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};

use crate::algs::collective::{agree, all_true};
use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::discretization::Discretization;
use crate::dofset::DofNumbering;
use crate::linalg::dof_map::{DofMap, Gid};
use crate::linalg::vector::DistVector;

/// Name of the remainder subset built by condition-based setups.
pub const OTHER: &str = "other";

#[derive(Clone, Debug)]
pub struct MultiMapExtractor {
    full_map: Arc<DofMap>,
    names: Vec<String>,
    maps: Vec<Arc<DofMap>>,
    /// Full-map lid of every partial-map lid, per subset.
    full_lids: Vec<Vec<usize>>,
}

impl MultiMapExtractor {
    /// Register `maps` as ordered, named subsets of `full_map`.
    ///
    /// # Errors
    /// - `MapMismatch` if a partial map holds an id `full_map` does not.
    /// - `OverlappingSubsets` if two subsets share an id.
    /// - `InvalidParameter` if a name is used twice.
    pub fn setup(
        full_map: Arc<DofMap>,
        maps: Vec<(String, Arc<DofMap>)>,
    ) -> Result<Self, CouplingError> {
        let mut owner_of: HashMap<Gid, usize> = HashMap::new();
        let mut names = Vec::with_capacity(maps.len());
        let mut partials = Vec::with_capacity(maps.len());
        let mut full_lids = Vec::with_capacity(maps.len());

        for (i, (name, map)) in maps.into_iter().enumerate() {
            if names.contains(&name) {
                return Err(CouplingError::InvalidParameter(format!(
                    "subset name `{name}` used twice"
                )));
            }
            let mut lids = Vec::with_capacity(map.num_my());
            for &gid in map.gids() {
                let lid = full_map.lid(gid).ok_or_else(|| {
                    CouplingError::MapMismatch(format!(
                        "subset `{name}` holds id {gid} outside the full map"
                    ))
                })?;
                if let Some(&first) = owner_of.get(&gid) {
                    return Err(CouplingError::OverlappingSubsets {
                        first: names[first].clone(),
                        second: name,
                        gid,
                    });
                }
                owner_of.insert(gid, i);
                lids.push(lid);
            }
            if map.num_global() == 0 {
                warn!("map extractor: subset `{name}` is empty");
            }
            names.push(name);
            partials.push(map);
            full_lids.push(lids);
        }
        debug!(
            "map extractor: {} subsets over {} local ids",
            names.len(),
            full_map.num_my()
        );
        Ok(MultiMapExtractor {
            full_map,
            names,
            maps: partials,
            full_lids,
        })
    }

    /// Build subsets from named node conditions of `dis`, followed by the
    /// remainder [`OTHER`] (collective). The remainder comes first, the
    /// conditions keep the order of `selectors`.
    pub fn setup_from_conditions<D, C>(
        numbering: &D,
        dis: &Discretization,
        selectors: &[ConditionSelector],
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        D: DofNumbering + ?Sized,
        C: Communicator + ?Sized,
    {
        let full_map = numbering.row_map().clone();
        let selections = selectors
            .iter()
            .map(|selector| selector.select(numbering, dis))
            .collect::<Result<Vec<_>, _>>();
        let selections = agree(comm, selections)?;

        let picked: HashSet<Gid> = selections.iter().flatten().copied().collect();
        let other: Vec<Gid> = full_map
            .gids()
            .iter()
            .copied()
            .filter(|g| !picked.contains(g))
            .collect();
        let mut maps = Vec::with_capacity(selectors.len() + 1);
        maps.push((OTHER.to_string(), Arc::new(DofMap::new(other, comm)?)));
        for (selector, gids) in selectors.iter().zip(selections) {
            let map = Arc::new(DofMap::new(gids, comm)?);
            maps.push((selector.condition.clone(), map));
        }
        agree(comm, Self::setup(full_map, maps))
    }

    /// Every full-map id belongs to exactly one subset (collective).
    pub fn check_for_valid_map_extractor<C>(&self, comm: &C) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let covered: usize = self.maps.iter().map(|m| m.num_my()).sum();
        let ok = all_true(comm, covered == self.full_map.num_my())?;
        if ok {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(
                "subsets do not cover the full map".into(),
            ))
        }
    }

    #[inline]
    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Result<usize, CouplingError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| CouplingError::UnknownSubset(name.to_string()))
    }

    #[inline]
    pub fn full_map(&self) -> &Arc<DofMap> {
        &self.full_map
    }

    pub fn map(&self, name: &str) -> Result<&Arc<DofMap>, CouplingError> {
        Ok(&self.maps[self.index_of(name)?])
    }

    pub fn map_at(&self, index: usize) -> Result<&Arc<DofMap>, CouplingError> {
        self.maps
            .get(index)
            .ok_or_else(|| CouplingError::UnknownSubset(format!("#{index}")))
    }

    /// Zero vector on the full map.
    pub fn full_vector(&self) -> DistVector {
        DistVector::new(self.full_map.clone())
    }

    /// Zero vector on subset `name`.
    pub fn vector(&self, name: &str) -> Result<DistVector, CouplingError> {
        Ok(DistVector::new(self.map(name)?.clone()))
    }

    fn check_full(&self, full: &DistVector) -> Result<(), CouplingError> {
        if full.map().same_as(&self.full_map) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(format!(
                "vector of {} local ids is not on the full map ({} ids)",
                full.len(),
                self.full_map.num_my()
            )))
        }
    }

    fn check_part(&self, index: usize, part: &DistVector) -> Result<(), CouplingError> {
        if part.map().same_as(&self.maps[index]) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(format!(
                "vector is not on the map of subset `{}`",
                self.names[index]
            )))
        }
    }

    pub fn extract(&self, name: &str, full: &DistVector) -> Result<DistVector, CouplingError> {
        let index = self.index_of(name)?;
        let mut part = DistVector::new(self.maps[index].clone());
        self.extract_at(index, full, &mut part)?;
        Ok(part)
    }

    pub fn extract_into(
        &self,
        name: &str,
        full: &DistVector,
        part: &mut DistVector,
    ) -> Result<(), CouplingError> {
        self.extract_at(self.index_of(name)?, full, part)
    }

    pub fn extract_at(
        &self,
        index: usize,
        full: &DistVector,
        part: &mut DistVector,
    ) -> Result<(), CouplingError> {
        self.map_at(index)?;
        self.check_full(full)?;
        self.check_part(index, part)?;
        let src = full.values();
        for (dst, &lid) in part.values_mut().iter_mut().zip(&self.full_lids[index]) {
            *dst = src[lid];
        }
        Ok(())
    }

    /// Write `part` into the subset positions of `full`.
    pub fn insert(
        &self,
        name: &str,
        part: &DistVector,
        full: &mut DistVector,
    ) -> Result<(), CouplingError> {
        self.insert_at(self.index_of(name)?, part, full)
    }

    /// New full vector holding `part` and zeros elsewhere.
    pub fn insert_vector(
        &self,
        name: &str,
        part: &DistVector,
    ) -> Result<DistVector, CouplingError> {
        let mut full = self.full_vector();
        self.insert(name, part, &mut full)?;
        Ok(full)
    }

    pub fn insert_at(
        &self,
        index: usize,
        part: &DistVector,
        full: &mut DistVector,
    ) -> Result<(), CouplingError> {
        self.map_at(index)?;
        self.check_full(full)?;
        self.check_part(index, part)?;
        let dst = full.values_mut();
        for (&v, &lid) in part.values().iter().zip(&self.full_lids[index]) {
            dst[lid] = v;
        }
        Ok(())
    }

    /// `full[subset] += scale * part`.
    pub fn add(
        &self,
        name: &str,
        part: &DistVector,
        full: &mut DistVector,
        scale: f64,
    ) -> Result<(), CouplingError> {
        self.add_at(self.index_of(name)?, part, full, scale)
    }

    pub fn add_at(
        &self,
        index: usize,
        part: &DistVector,
        full: &mut DistVector,
        scale: f64,
    ) -> Result<(), CouplingError> {
        self.map_at(index)?;
        self.check_full(full)?;
        self.check_part(index, part)?;
        let dst = full.values_mut();
        for (&v, &lid) in part.values().iter().zip(&self.full_lids[index]) {
            dst[lid] += scale * v;
        }
        Ok(())
    }

    /// Set every subset entry of `full` to `value`.
    pub fn put_scalar(
        &self,
        name: &str,
        value: f64,
        full: &mut DistVector,
    ) -> Result<(), CouplingError> {
        let index = self.index_of(name)?;
        self.check_full(full)?;
        let dst = full.values_mut();
        for &lid in &self.full_lids[index] {
            dst[lid] = value;
        }
        Ok(())
    }
}

/// Picks the dofs of the nodes of one named condition, optionally only a
/// range of each node's local dofs (e.g. the velocity part of a fluid node).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionSelector {
    pub condition: String,
    pub dofs: Option<Range<usize>>,
}

impl ConditionSelector {
    /// All dofs of the condition's nodes.
    pub fn new(condition: impl Into<String>) -> Self {
        ConditionSelector {
            condition: condition.into(),
            dofs: None,
        }
    }

    /// Only local dofs `range` of each node.
    pub fn with_dofs(condition: impl Into<String>, range: Range<usize>) -> Self {
        ConditionSelector {
            condition: condition.into(),
            dofs: Some(range),
        }
    }

    /// Owned ids selected on this rank, in node order.
    fn select<D>(&self, numbering: &D, dis: &Discretization) -> Result<Vec<Gid>, CouplingError>
    where
        D: DofNumbering + ?Sized,
    {
        let Some(nodes) = dis.condition(&self.condition) else {
            return Err(CouplingError::UnknownSubset(self.condition.clone()));
        };
        let row_map = numbering.row_map();
        let mut gids = Vec::new();
        for &node in nodes {
            let dofs = numbering.dofs(node)?;
            let picked = match &self.dofs {
                Some(range) => dofs.get(range.clone()).unwrap_or(&[]),
                None => dofs,
            };
            gids.extend(picked.iter().copied().filter(|&g| row_map.contains(g)));
        }
        Ok(gids)
    }
}

/// Two-subset extractor: [`OTHER`] at index 0, the condition at index 1.
#[derive(Clone, Debug)]
pub struct MapExtractor {
    inner: MultiMapExtractor,
}

macro_rules! subset_vector_methods {
    ($index:expr, $extract:ident, $insert:ident, $add:ident, $put:ident, $map:ident) => {
        pub fn $map(&self) -> &Arc<DofMap> {
            &self.inner.maps[$index]
        }

        pub fn $extract(&self, full: &DistVector) -> Result<DistVector, CouplingError> {
            let mut part = DistVector::new(self.$map().clone());
            self.inner.extract_at($index, full, &mut part)?;
            Ok(part)
        }

        pub fn $insert(
            &self,
            part: &DistVector,
            full: &mut DistVector,
        ) -> Result<(), CouplingError> {
            self.inner.insert_at($index, part, full)
        }

        pub fn $add(
            &self,
            part: &DistVector,
            full: &mut DistVector,
            scale: f64,
        ) -> Result<(), CouplingError> {
            self.inner.add_at($index, part, full, scale)
        }

        pub fn $put(&self, value: f64, full: &mut DistVector) -> Result<(), CouplingError> {
            let name = self.inner.names[$index].clone();
            self.inner.put_scalar(&name, value, full)
        }
    };
}

impl MapExtractor {
    pub const OTHER: usize = 0;
    pub const COND: usize = 1;

    /// Split `full_map` into `cond_map` and the rest (collective).
    pub fn setup<C>(
        full_map: Arc<DofMap>,
        cond_name: impl Into<String>,
        cond_map: Arc<DofMap>,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let other = Arc::new(full_map.complement(&cond_map, comm)?);
        let inner = agree(
            comm,
            MultiMapExtractor::setup(
                full_map,
                vec![(OTHER.to_string(), other), (cond_name.into(), cond_map)],
            ),
        )?;
        Ok(MapExtractor { inner })
    }

    /// Condition subset from the nodes of one named condition (collective).
    pub fn setup_from_condition<D, C>(
        numbering: &D,
        dis: &Discretization,
        selector: &ConditionSelector,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        D: DofNumbering + ?Sized,
        C: Communicator + ?Sized,
    {
        let inner = MultiMapExtractor::setup_from_conditions(
            numbering,
            dis,
            std::slice::from_ref(selector),
            comm,
        )?;
        Ok(MapExtractor { inner })
    }

    /// The underlying general extractor.
    pub fn as_multi(&self) -> &MultiMapExtractor {
        &self.inner
    }

    pub fn full_map(&self) -> &Arc<DofMap> {
        self.inner.full_map()
    }

    subset_vector_methods!(
        Self::COND,
        extract_cond_vector,
        insert_cond_vector,
        add_cond_vector,
        put_cond_scalar,
        cond_map
    );
    subset_vector_methods!(
        Self::OTHER,
        extract_other_vector,
        insert_other_vector,
        add_other_vector,
        put_other_scalar,
        other_map
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::discretization::{Node, NodeId};
    use crate::dofset::DofSet;

    fn extractor() -> MultiMapExtractor {
        let full = Arc::new(DofMap::serial_range(0, 6).unwrap());
        MultiMapExtractor::setup(
            full,
            vec![
                ("a".into(), Arc::new(DofMap::serial(vec![4, 0]).unwrap())),
                ("b".into(), Arc::new(DofMap::serial(vec![1, 2]).unwrap())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn extract_follows_partial_order() {
        let ex = extractor();
        let values = (0..6).map(f64::from).collect();
        let full = DistVector::from_values(ex.full_map().clone(), values).unwrap();
        assert_eq!(ex.extract("a", &full).unwrap().values(), &[4.0, 0.0]);
        assert_eq!(
            ex.extract("c", &full).unwrap_err(),
            CouplingError::UnknownSubset("c".into())
        );
    }

    #[test]
    fn insert_and_add_touch_only_the_subset() {
        let ex = extractor();
        let mut full = ex.full_vector();
        full.put_scalar(9.0);
        let part =
            DistVector::from_values(ex.map("b").unwrap().clone(), vec![1.0, 2.0]).unwrap();
        ex.insert("b", &part, &mut full).unwrap();
        ex.add("b", &part, &mut full, 0.5).unwrap();
        assert_eq!(full.values(), &[9.0, 1.5, 3.0, 9.0, 9.0, 9.0]);
        ex.put_scalar("a", 0.0, &mut full).unwrap();
        assert_eq!(full.values(), &[0.0, 1.5, 3.0, 9.0, 0.0, 9.0]);
    }

    #[test]
    fn overlapping_subsets_are_rejected() {
        let full = Arc::new(DofMap::serial_range(0, 3).unwrap());
        let err = MultiMapExtractor::setup(
            full,
            vec![
                ("x".into(), Arc::new(DofMap::serial(vec![0, 1]).unwrap())),
                ("y".into(), Arc::new(DofMap::serial(vec![1]).unwrap())),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CouplingError::OverlappingSubsets {
                first: "x".into(),
                second: "y".into(),
                gid: 1
            }
        );
    }

    #[test]
    fn wrong_vector_map_is_a_mismatch() {
        let ex = extractor();
        let stray = DistVector::new(Arc::new(DofMap::serial(vec![0]).unwrap()));
        assert!(matches!(
            ex.extract("a", &stray),
            Err(CouplingError::MapMismatch(_))
        ));
    }

    #[test]
    fn coverage_check() {
        let ex = extractor();
        assert!(ex.check_for_valid_map_extractor(&NoComm).is_err());
        let full = ex.full_map().clone();
        let rest = Arc::new(DofMap::serial(vec![3, 5]).unwrap());
        let complete = MultiMapExtractor::setup(
            full,
            vec![
                ("a".into(), ex.map("a").unwrap().clone()),
                ("b".into(), ex.map("b").unwrap().clone()),
                ("rest".into(), rest),
            ],
        )
        .unwrap();
        assert!(complete.check_for_valid_map_extractor(&NoComm).is_ok());
    }

    #[test]
    fn condition_selector_picks_velocity_dofs() {
        let nid = |r| NodeId::new(r).unwrap();
        let mut dis = Discretization::new("fluid", 0);
        for i in 1..=3 {
            dis.add_node(Node::new(nid(i), 0, [i as f64, 0.0, 0.0], 3));
        }
        dis.add_condition("FSICoupling", [nid(1), nid(3)]).unwrap();
        let ds = DofSet::assign_degrees_of_freedom(&dis, 0, &NoComm).unwrap();
        let ex = MapExtractor::setup_from_condition(
            &ds,
            &dis,
            &ConditionSelector::with_dofs("FSICoupling", 0..2),
            &NoComm,
        )
        .unwrap();
        assert_eq!(ex.cond_map().gids(), &[0, 1, 6, 7]);
        assert_eq!(ex.other_map().gids(), &[2, 3, 4, 5, 8]);
        assert!(ex.as_multi().check_for_valid_map_extractor(&NoComm).is_ok());

        let mut full = DistVector::new(ds.row_map().clone());
        let mut cond = DistVector::new(ex.cond_map().clone());
        cond.put_scalar(1.0);
        ex.insert_cond_vector(&cond, &mut full).unwrap();
        assert_eq!(full.values().iter().sum::<f64>(), 4.0);
        assert_eq!(ex.extract_other_vector(&full).unwrap().values().iter().sum::<f64>(), 0.0);
    }
}
