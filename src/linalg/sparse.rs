//! Row-distributed sparse matrix addressed by global ids.
//!
//! Rows follow a (usually one-to-one) row map; within a row, entries are
//! keyed by global column id. An optional column map restricts which column
//! ids may be inserted. Structure is kept when values are zeroed, so a matrix
//! can be refilled in place without reallocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::algs::collective::{allgather_vec, sum_all_usize};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireEntry;
use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::{DofMap, Gid};
use crate::linalg::vector::DistVector;

#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix {
    row_map: Arc<DofMap>,
    col_map: Option<Arc<DofMap>>,
    rows: Vec<BTreeMap<Gid, f64>>,
}

impl SparseMatrix {
    /// Empty matrix with rows laid out on `row_map` and unrestricted columns.
    pub fn new(row_map: Arc<DofMap>) -> Self {
        let rows = vec![BTreeMap::new(); row_map.num_my()];
        SparseMatrix {
            row_map,
            col_map: None,
            rows,
        }
    }

    /// Empty matrix whose column ids must come from `col_map`.
    pub fn with_col_map(row_map: Arc<DofMap>, col_map: Arc<DofMap>) -> Self {
        let mut m = Self::new(row_map);
        m.col_map = Some(col_map);
        m
    }

    #[inline]
    pub fn row_map(&self) -> &Arc<DofMap> {
        &self.row_map
    }

    #[inline]
    pub fn col_map(&self) -> Option<&Arc<DofMap>> {
        self.col_map.as_ref()
    }

    fn check_col(&self, col: Gid) -> Result<(), CouplingError> {
        match &self.col_map {
            Some(map) if !map.contains(col) => Err(CouplingError::GidNotInMap(col)),
            _ => Ok(()),
        }
    }

    /// Add `value` to entry `(row, col)`, creating it if absent.
    pub fn sum_into(&mut self, row: Gid, col: Gid, value: f64) -> Result<(), CouplingError> {
        let lid = self.row_map.lid_or_err(row)?;
        self.check_col(col)?;
        *self.rows[lid].entry(col).or_insert(0.0) += value;
        Ok(())
    }

    /// Overwrite entry `(row, col)`, creating it if absent.
    pub fn replace(&mut self, row: Gid, col: Gid, value: f64) -> Result<(), CouplingError> {
        let lid = self.row_map.lid_or_err(row)?;
        self.check_col(col)?;
        self.rows[lid].insert(col, value);
        Ok(())
    }

    /// Stored value of `(row, col)` if the row is local and the entry exists.
    pub fn get(&self, row: Gid, col: Gid) -> Option<f64> {
        let lid = self.row_map.lid(row)?;
        self.rows[lid].get(&col).copied()
    }

    /// Entries of a local row, keyed by column id.
    pub fn row(&self, row: Gid) -> Option<&BTreeMap<Gid, f64>> {
        self.row_map.lid(row).map(|lid| &self.rows[lid])
    }

    pub(crate) fn row_by_lid(&self, lid: usize) -> &BTreeMap<Gid, f64> {
        &self.rows[lid]
    }

    pub(crate) fn row_by_lid_mut(&mut self, lid: usize) -> &mut BTreeMap<Gid, f64> {
        &mut self.rows[lid]
    }

    /// Set every stored value to zero; the sparsity pattern survives.
    pub fn zero(&mut self) {
        for row in &mut self.rows {
            row.values_mut().for_each(|v| *v = 0.0);
        }
    }

    /// `self += scale * other`; both matrices must share the row map.
    pub fn add(&mut self, other: &SparseMatrix, scale: f64) -> Result<(), CouplingError> {
        if !self.row_map.same_as(&other.row_map) {
            return Err(CouplingError::MapMismatch(
                "matrix add requires identical row maps".into(),
            ));
        }
        for (mine, theirs) in self.rows.iter_mut().zip(&other.rows) {
            for (&col, &v) in theirs {
                if let Some(map) = &self.col_map {
                    if !map.contains(col) {
                        return Err(CouplingError::GidNotInMap(col));
                    }
                }
                *mine.entry(col).or_insert(0.0) += scale * v;
            }
        }
        Ok(())
    }

    /// All local `(row, col, value)` triples, rows in local order.
    pub fn entries(&self) -> impl Iterator<Item = (Gid, Gid, f64)> + '_ {
        self.row_map
            .gids()
            .iter()
            .zip(&self.rows)
            .flat_map(|(&r, row)| row.iter().map(move |(&c, &v)| (r, c, v)))
    }

    pub fn num_my_nonzeros(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    /// Stored entries over all ranks (collective).
    pub fn num_global_nonzeros<C>(&self, comm: &C) -> Result<usize, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        sum_all_usize(comm, self.num_my_nonzeros())
    }

    /// `y = A x` where `x` holds every column id this rank references
    /// (e.g. a vector on the column map) and `y` lives on the row map.
    pub fn multiply(&self, x: &DistVector, y: &mut DistVector) -> Result<(), CouplingError> {
        if !y.map().same_as(&self.row_map) {
            return Err(CouplingError::MapMismatch(
                "result vector must live on the row map".into(),
            ));
        }
        for (lid, row) in self.rows.iter().enumerate() {
            let mut acc = 0.0;
            for (&col, &v) in row {
                acc += v * x.get(col)?;
            }
            y.values_mut()[lid] = acc;
        }
        Ok(())
    }

    /// Every entry of every rank keyed by `(row, col)` (collective).
    ///
    /// Duplicated rows (a non one-to-one row map) are summed, which is the
    /// logical content of the distributed matrix.
    pub fn gather_entries<C>(
        &self,
        comm: &C,
    ) -> Result<BTreeMap<(Gid, Gid), f64>, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let local: Vec<WireEntry> = self
            .entries()
            .map(|(r, c, v)| WireEntry::new(r, c, v))
            .collect();
        let mut out = BTreeMap::new();
        for e in allgather_vec(comm, CommTag::GATHER, &local)?.into_iter().flatten() {
            *out.entry((e.row(), e.col())).or_insert(0.0) += e.value();
        }
        Ok(out)
    }

    /// Same global-id-indexed content up to `tol`, regardless of layout
    /// (collective). Entries missing on one side compare as zero.
    pub fn logically_eq<C>(
        &self,
        other: &SparseMatrix,
        comm: &C,
        tol: f64,
    ) -> Result<bool, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let a = self.gather_entries(comm)?;
        let b = other.gather_entries(comm)?;
        let close = |x: f64, y: f64| (x - y).abs() <= tol;
        Ok(a.iter().all(|(k, &v)| close(v, b.get(k).copied().unwrap_or(0.0)))
            && b.iter().all(|(k, &v)| close(v, a.get(k).copied().unwrap_or(0.0))))
    }
}
