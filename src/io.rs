//! Name-tagged result and restart data.
//!
//! Components hand their vectors to a [`ResultWriter`] under a name and get
//! them back from a [`ResultReader`] on a map of their choice. Values are
//! stored by global id, so a restart may reorder ids within a rank. Storage
//! is per rank: each rank reads back what it wrote, and the map it reads
//! onto may only hold ids that rank stored. The file format is up to the
//! writer; [`InMemoryRestart`] keeps everything as serde-serializable
//! [`VectorSnapshot`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::coupling_error::CouplingError;
use crate::linalg::dof_map::{DofMap, Gid};
use crate::linalg::vector::DistVector;

pub trait ResultWriter {
    fn write_vector(&mut self, name: &str, vector: &DistVector) -> Result<(), CouplingError>;
}

pub trait ResultReader {
    /// Read `name` onto `map`.
    ///
    /// # Errors
    /// `MissingRestartEntry` if nothing was written under `name`,
    /// `GidNotInMap` if `map` holds an id the stored vector lacks.
    fn read_vector(&self, name: &str, map: &Arc<DofMap>) -> Result<DistVector, CouplingError>;
}

/// Local part of one vector, by global id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub gids: Vec<Gid>,
    pub values: Vec<f64>,
}

impl VectorSnapshot {
    pub fn of(vector: &DistVector) -> Self {
        VectorSnapshot {
            gids: vector.map().gids().to_vec(),
            values: vector.values().to_vec(),
        }
    }

    /// Lay the stored values out on `map`.
    pub fn restore(&self, map: &Arc<DofMap>) -> Result<DistVector, CouplingError> {
        let by_gid: BTreeMap<Gid, f64> = self
            .gids
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect();
        let values = map
            .gids()
            .iter()
            .map(|g| by_gid.get(g).copied().ok_or(CouplingError::GidNotInMap(*g)))
            .collect::<Result<Vec<_>, _>>()?;
        DistVector::from_values(map.clone(), values)
    }
}

/// Restart store for one rank and one step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryRestart {
    pub step: u64,
    pub time: f64,
    entries: BTreeMap<String, VectorSnapshot>,
}

impl InMemoryRestart {
    pub fn new(step: u64, time: f64) -> Self {
        InMemoryRestart {
            step,
            time,
            entries: BTreeMap::new(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn snapshot(&self, name: &str) -> Option<&VectorSnapshot> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResultWriter for InMemoryRestart {
    fn write_vector(&mut self, name: &str, vector: &DistVector) -> Result<(), CouplingError> {
        debug!("restart step {}: `{name}` with {} local values", self.step, vector.len());
        self.entries.insert(name.to_owned(), VectorSnapshot::of(vector));
        Ok(())
    }
}

impl ResultReader for InMemoryRestart {
    fn read_vector(&self, name: &str, map: &Arc<DofMap>) -> Result<DistVector, CouplingError> {
        self.entries
            .get(name)
            .ok_or_else(|| CouplingError::MissingRestartEntry(name.to_owned()))?
            .restore(map)
    }
}
