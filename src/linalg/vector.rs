//! Distributed vector: one `f64` per local id of a [`DofMap`].

use std::sync::Arc;

use crate::algs::collective::{agree, allgather_u64, sum_all_f64};
use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::{DofMap, Gid};

/// Values laid out on a (shared) [`DofMap`].
#[derive(Clone, Debug, PartialEq)]
pub struct DistVector {
    map: Arc<DofMap>,
    values: Vec<f64>,
}

impl DistVector {
    /// Zero vector on `map`.
    pub fn new(map: Arc<DofMap>) -> Self {
        let values = vec![0.0; map.num_my()];
        DistVector { map, values }
    }

    /// Vector on `map` with explicit local values.
    ///
    /// # Errors
    /// `MapMismatch` if the lengths differ.
    pub fn from_values(map: Arc<DofMap>, values: Vec<f64>) -> Result<Self, CouplingError> {
        if values.len() != map.num_my() {
            return Err(CouplingError::MapMismatch(format!(
                "{} values for a map of {} local ids",
                values.len(),
                map.num_my()
            )));
        }
        Ok(DistVector { map, values })
    }

    #[inline]
    pub fn map(&self) -> &Arc<DofMap> {
        &self.map
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a global id stored on this rank.
    pub fn get(&self, gid: Gid) -> Result<f64, CouplingError> {
        Ok(self.values[self.map.lid_or_err(gid)?])
    }

    /// Overwrite the value at a global id stored on this rank.
    pub fn replace(&mut self, gid: Gid, value: f64) -> Result<(), CouplingError> {
        let lid = self.map.lid_or_err(gid)?;
        self.values[lid] = value;
        Ok(())
    }

    /// Add to the value at a global id stored on this rank.
    pub fn sum_into(&mut self, gid: Gid, value: f64) -> Result<(), CouplingError> {
        let lid = self.map.lid_or_err(gid)?;
        self.values[lid] += value;
        Ok(())
    }

    /// `(gid, value)` pairs in local order.
    pub fn iter(&self) -> impl Iterator<Item = (Gid, f64)> + '_ {
        self.map.gids().iter().copied().zip(self.values.iter().copied())
    }

    pub fn put_scalar(&mut self, value: f64) {
        self.values.fill(value);
    }

    /// `self = a * other + b * self`; both vectors must share the map.
    pub fn update(&mut self, a: f64, other: &DistVector, b: f64) -> Result<(), CouplingError> {
        self.ensure_same_map(other)?;
        for (mine, theirs) in self.values.iter_mut().zip(&other.values) {
            *mine = a * theirs + b * *mine;
        }
        Ok(())
    }

    /// Global dot product (collective).
    pub fn dot<C>(&self, other: &DistVector, comm: &C) -> Result<f64, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        agree(comm, self.ensure_same_map(other))?;
        let local: f64 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        sum_all_f64(comm, local)
    }

    /// Global Euclidean norm (collective).
    pub fn norm2<C>(&self, comm: &C) -> Result<f64, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        Ok(self.dot(self, comm)?.sqrt())
    }

    /// Largest absolute value (collective).
    pub fn norm_inf<C>(&self, comm: &C) -> Result<f64, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let local = self.values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let all = allgather_u64(comm, local.to_bits())?;
        Ok(all.into_iter().map(f64::from_bits).fold(0.0, f64::max))
    }

    pub(crate) fn ensure_same_map(&self, other: &DistVector) -> Result<(), CouplingError> {
        if Arc::ptr_eq(&self.map, &other.map) || self.map.same_as(&other.map) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(
                "vectors live on different maps".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn map() -> Arc<DofMap> {
        Arc::new(DofMap::serial(vec![4, 5, 6]).unwrap())
    }

    #[test]
    fn gid_access() {
        let mut v = DistVector::new(map());
        v.replace(5, 2.0).unwrap();
        v.sum_into(5, 1.5).unwrap();
        assert_eq!(v.get(5).unwrap(), 3.5);
        assert_eq!(v.get(7), Err(CouplingError::GidNotInMap(7)));
    }

    #[test]
    fn update_and_norms() {
        let m = map();
        let mut a = DistVector::from_values(m.clone(), vec![1.0, 2.0, 2.0]).unwrap();
        let b = DistVector::from_values(m, vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(a.norm2(&NoComm).unwrap(), 3.0);
        a.update(2.0, &b, 1.0).unwrap();
        assert_eq!(a.values(), &[3.0, 2.0, 2.0]);
        assert_eq!(a.norm_inf(&NoComm).unwrap(), 3.0);
    }

    #[test]
    fn mismatched_maps_are_rejected() {
        let mut a = DistVector::new(map());
        let b = DistVector::new(Arc::new(DofMap::serial(vec![1]).unwrap()));
        assert!(matches!(a.update(1.0, &b, 1.0), Err(CouplingError::MapMismatch(_))));
    }
}
