//! Block sparse matrix: a grid of [`SparseMatrix`] blocks sharing row and
//! column block maps.

use std::sync::Arc;

use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::DofMap;
use crate::linalg::sparse::SparseMatrix;

#[derive(Clone, Debug)]
pub struct BlockSparseMatrix {
    row_maps: Vec<Arc<DofMap>>,
    col_maps: Vec<Arc<DofMap>>,
    blocks: Vec<SparseMatrix>,
}

impl BlockSparseMatrix {
    /// Empty block matrix; block `(i, j)` has rows on `row_maps[i]` and
    /// columns restricted to `col_maps[j]`.
    pub fn new(row_maps: Vec<Arc<DofMap>>, col_maps: Vec<Arc<DofMap>>) -> Self {
        let blocks = row_maps
            .iter()
            .flat_map(|r| {
                col_maps
                    .iter()
                    .map(move |c| SparseMatrix::with_col_map(r.clone(), c.clone()))
            })
            .collect();
        BlockSparseMatrix {
            row_maps,
            col_maps,
            blocks,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.row_maps.len()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.col_maps.len()
    }

    fn index(&self, row: usize, col: usize) -> Result<usize, CouplingError> {
        if row >= self.rows() || col >= self.cols() {
            return Err(CouplingError::MapMismatch(format!(
                "block ({row}, {col}) outside a {}x{} block matrix",
                self.rows(),
                self.cols()
            )));
        }
        Ok(row * self.cols() + col)
    }

    pub fn block(&self, row: usize, col: usize) -> Result<&SparseMatrix, CouplingError> {
        Ok(&self.blocks[self.index(row, col)?])
    }

    pub fn block_mut(
        &mut self,
        row: usize,
        col: usize,
    ) -> Result<&mut SparseMatrix, CouplingError> {
        let i = self.index(row, col)?;
        Ok(&mut self.blocks[i])
    }

    /// Replace block `(row, col)`; the new block must use that block row map.
    pub fn assign(
        &mut self,
        row: usize,
        col: usize,
        block: SparseMatrix,
    ) -> Result<(), CouplingError> {
        let i = self.index(row, col)?;
        if !block.row_map().same_as(&self.row_maps[row]) {
            return Err(CouplingError::MapMismatch(format!(
                "block ({row}, {col}) rows do not follow block row map {row}"
            )));
        }
        self.blocks[i] = block;
        Ok(())
    }

    pub fn zero(&mut self) {
        self.blocks.iter_mut().for_each(SparseMatrix::zero);
    }

    /// Merge all blocks into one matrix on `full_row_map`, which must contain
    /// every block row id locally.
    pub fn merge(&self, full_row_map: Arc<DofMap>) -> Result<SparseMatrix, CouplingError> {
        let mut out = SparseMatrix::new(full_row_map);
        for block in &self.blocks {
            for (r, c, v) in block.entries() {
                out.sum_into(r, c, v)?;
            }
        }
        Ok(out)
    }
}
