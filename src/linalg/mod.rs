//! Minimal distributed linear algebra: maps, vectors, sparse matrices and
//! the communication plans that move them between layouts.

pub mod assemble;
pub mod block;
pub mod directory;
pub mod dof_map;
pub mod exporter;
pub mod sparse;
pub mod vector;

pub use block::BlockSparseMatrix;
pub use directory::Directory;
pub use dof_map::{DofMap, Gid};
pub use exporter::{CombineMode, Exporter};
pub use sparse::SparseMatrix;
pub use vector::DistVector;
