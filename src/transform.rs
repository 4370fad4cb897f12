//! Move assembled block matrices between the redistributed (load balanced)
//! and the unredistributed (original) parallel layout.
//!
//! [`MatrixRowColTransformer`] is driven in three steps: `init` hands over
//! four sets of per-block maps (redistributed row/column, unredistributed
//! row/column) exactly once, `setup` builds and caches one exporter per block
//! and direction, and the transform calls reuse those plans. Any transform
//! before `init` and `setup` fails with [`CouplingError::LifecycleViolation`]
//! naming the missing step. [`TransformerBuilder`] collects the maps and
//! returns a transformer that is already set up.
//!
//! Only the global-id content of a transformed matrix is defined; its local
//! storage order follows the destination layout.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::algs::collective::agree;
use crate::algs::communicator::Communicator;
use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::DofMap;
use crate::linalg::exporter::{CombineMode, Exporter};
use crate::linalg::sparse::SparseMatrix;

const COMPONENT: &str = "MatrixRowColTransformer";

/// Blocks of a displacement / Lagrange-multiplier saddle point system.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    DisplDispl,
    DisplLm,
    LmDispl,
    LmLm,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One map per block type.
pub type BlockMapPairs = BTreeMap<BlockType, Arc<DofMap>>;

#[derive(Clone, Debug)]
struct BlockMaps {
    red_row: Arc<DofMap>,
    red_col: Arc<DofMap>,
    unred_row: Arc<DofMap>,
    unred_col: Arc<DofMap>,
}

#[derive(Clone, Debug)]
struct BlockExporters {
    to_unredistributed: Exporter,
    to_redistributed: Exporter,
}

pub struct MatrixRowColTransformer<C: Communicator> {
    num_transformer: usize,
    comm: C,
    maps: Option<BTreeMap<BlockType, BlockMaps>>,
    exporters: Option<BTreeMap<BlockType, BlockExporters>>,
}

impl<C: Communicator> MatrixRowColTransformer<C> {
    /// A transformer for at most `num_transformer` block types.
    pub fn new(num_transformer: usize, comm: C) -> Self {
        MatrixRowColTransformer {
            num_transformer,
            comm,
            maps: None,
            exporters: None,
        }
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn is_init(&self) -> bool {
        self.maps.is_some()
    }

    pub fn is_setup(&self) -> bool {
        self.exporters.is_some()
    }

    /// Hand over the four map sets. Every block must appear in all four.
    ///
    /// # Errors
    /// - `AlreadyInitialized` on a second call.
    /// - `IncompleteBlockMaps` if a block misses one of its maps.
    /// - `InvalidParameter` for more blocks than `num_transformer`.
    pub fn init(
        &mut self,
        redistributed_row: &BlockMapPairs,
        redistributed_col: &BlockMapPairs,
        unredistributed_row: &BlockMapPairs,
        unredistributed_col: &BlockMapPairs,
    ) -> Result<(), CouplingError> {
        if self.maps.is_some() {
            return Err(CouplingError::AlreadyInitialized(COMPONENT));
        }
        let sets = [
            ("redistributed row", redistributed_row),
            ("redistributed column", redistributed_col),
            ("unredistributed row", unredistributed_row),
            ("unredistributed column", unredistributed_col),
        ];
        let mut blocks: Vec<BlockType> =
            sets.iter().flat_map(|(_, s)| s.keys().copied()).collect();
        blocks.sort_unstable();
        blocks.dedup();
        if blocks.len() > self.num_transformer {
            return Err(CouplingError::InvalidParameter(format!(
                "{COMPONENT}: {} block types for {} transformers",
                blocks.len(),
                self.num_transformer
            )));
        }

        let mut maps = BTreeMap::new();
        for bt in blocks {
            let get = |i: usize| -> Result<Arc<DofMap>, CouplingError> {
                let (which, set) = sets[i];
                set.get(&bt).cloned().ok_or(CouplingError::IncompleteBlockMaps {
                    block: bt.to_string(),
                    which,
                })
            };
            maps.insert(
                bt,
                BlockMaps {
                    red_row: get(0)?,
                    red_col: get(1)?,
                    unred_row: get(2)?,
                    unred_col: get(3)?,
                },
            );
        }
        self.maps = Some(maps);
        Ok(())
    }

    /// Build the exporters of every block in both directions (collective).
    pub fn setup(&mut self) -> Result<(), CouplingError> {
        let maps = self
            .maps
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "init"));
        let maps = agree(&self.comm, maps)?;
        let mut exporters = BTreeMap::new();
        for (&bt, m) in maps {
            let to_unredistributed =
                Exporter::new(m.red_row.clone(), m.unred_row.clone(), &self.comm)?;
            let to_redistributed =
                Exporter::new(m.unred_row.clone(), m.red_row.clone(), &self.comm)?;
            debug!(
                "{COMPONENT}: block {bt}: {} rows move on redistribution",
                to_unredistributed.num_remote()
            );
            exporters.insert(
                bt,
                BlockExporters {
                    to_unredistributed,
                    to_redistributed,
                },
            );
        }
        info!("{COMPONENT}: set up {} block exporters", exporters.len());
        self.exporters = Some(exporters);
        Ok(())
    }

    fn block(&self, bt: BlockType) -> Result<(&BlockMaps, &BlockExporters), CouplingError> {
        let maps = self
            .maps
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "init"))?;
        let exporters = self
            .exporters
            .as_ref()
            .ok_or_else(|| CouplingError::lifecycle(COMPONENT, "setup"))?;
        match (maps.get(&bt), exporters.get(&bt)) {
            (Some(m), Some(e)) => Ok((m, e)),
            _ => Err(CouplingError::IncompleteBlockMaps {
                block: bt.to_string(),
                which: "initialized",
            }),
        }
    }

    fn check_rows(
        src: &SparseMatrix,
        expected: &DofMap,
        layout: &str,
    ) -> Result<(), CouplingError> {
        if src.row_map().same_as(expected) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(format!(
                "matrix rows do not follow the {layout} row map"
            )))
        }
    }

    /// New matrix in the unredistributed layout (collective).
    pub fn redistributed_to_unredistributed(
        &self,
        bt: BlockType,
        src: &SparseMatrix,
    ) -> Result<SparseMatrix, CouplingError> {
        let (maps, _) = agree(&self.comm, self.block(bt))?;
        let mut dst =
            SparseMatrix::with_col_map(maps.unred_row.clone(), maps.unred_col.clone());
        self.redistributed_to_unredistributed_into(bt, src, &mut dst)?;
        Ok(dst)
    }

    /// Overwrite `dst` (unredistributed layout) with `src`'s content; the
    /// existing structure of `dst` is zeroed and reused (collective).
    pub fn redistributed_to_unredistributed_into(
        &self,
        bt: BlockType,
        src: &SparseMatrix,
        dst: &mut SparseMatrix,
    ) -> Result<(), CouplingError> {
        let checked = self.block(bt).and_then(|(maps, exporters)| {
            Self::check_rows(src, &maps.red_row, "redistributed")?;
            Self::check_rows(dst, &maps.unred_row, "unredistributed")?;
            Ok(exporters)
        });
        let exporters = agree(&self.comm, checked)?;
        dst.zero();
        exporters
            .to_unredistributed
            .import_matrix(src, dst, CombineMode::Add, &self.comm)
    }

    /// New matrix in the redistributed layout (collective).
    pub fn unredistributed_to_redistributed(
        &self,
        bt: BlockType,
        src: &SparseMatrix,
    ) -> Result<SparseMatrix, CouplingError> {
        let (maps, _) = agree(&self.comm, self.block(bt))?;
        let mut dst = SparseMatrix::with_col_map(maps.red_row.clone(), maps.red_col.clone());
        self.unredistributed_to_redistributed_into(bt, src, &mut dst)?;
        Ok(dst)
    }

    /// Overwrite `dst` (redistributed layout) with `src`'s content
    /// (collective).
    pub fn unredistributed_to_redistributed_into(
        &self,
        bt: BlockType,
        src: &SparseMatrix,
        dst: &mut SparseMatrix,
    ) -> Result<(), CouplingError> {
        let checked = self.block(bt).and_then(|(maps, exporters)| {
            Self::check_rows(src, &maps.unred_row, "unredistributed")?;
            Self::check_rows(dst, &maps.red_row, "redistributed")?;
            Ok(exporters)
        });
        let exporters = agree(&self.comm, checked)?;
        dst.zero();
        exporters
            .to_redistributed
            .import_matrix(src, dst, CombineMode::Add, &self.comm)
    }
}

/// Collects per-block maps and returns a transformer that is set up.
pub struct TransformerBuilder<C: Communicator> {
    comm: C,
    red_row: BlockMapPairs,
    red_col: BlockMapPairs,
    unred_row: BlockMapPairs,
    unred_col: BlockMapPairs,
}

impl<C: Communicator> TransformerBuilder<C> {
    pub fn new(comm: C) -> Self {
        TransformerBuilder {
            comm,
            red_row: BTreeMap::new(),
            red_col: BTreeMap::new(),
            unred_row: BTreeMap::new(),
            unred_col: BTreeMap::new(),
        }
    }

    /// All four maps of one block.
    pub fn block(
        mut self,
        bt: BlockType,
        redistributed_row: Arc<DofMap>,
        redistributed_col: Arc<DofMap>,
        unredistributed_row: Arc<DofMap>,
        unredistributed_col: Arc<DofMap>,
    ) -> Self {
        self.red_row.insert(bt, redistributed_row);
        self.red_col.insert(bt, redistributed_col);
        self.unred_row.insert(bt, unredistributed_row);
        self.unred_col.insert(bt, unredistributed_col);
        self
    }

    /// Init and set up in one step (collective).
    pub fn build(self) -> Result<MatrixRowColTransformer<C>, CouplingError> {
        let mut t = MatrixRowColTransformer::new(self.red_row.len(), self.comm);
        t.init(&self.red_row, &self.red_col, &self.unred_row, &self.unred_col)?;
        t.setup()?;
        Ok(t)
    }
}
