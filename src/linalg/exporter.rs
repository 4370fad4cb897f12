//! Cached communication plan between two layouts of the same logical ids.
//!
//! An [`Exporter`] is built once from a one-to-one *source* map and any
//! *target* map whose ids all exist in the source. It records which target
//! entries are filled locally (permutes) and which are shipped from other
//! ranks, so every later data movement is a single sparse all-to-all.
//!
//! Moving data source → target is an *import*; the reverse direction
//! (target → source) is an *export*, where several target copies of one id
//! may be combined into the single owned source entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::algs::collective::{agree, exchange};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireEntry, WireGid};
use crate::coupling_error::CouplingError;
use crate::linalg::directory::Directory;
use crate::linalg::dof_map::{DofMap, Gid};
use crate::linalg::sparse::SparseMatrix;
use crate::linalg::vector::DistVector;

/// How arriving values are merged into the destination.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum CombineMode {
    /// Overwrite.
    #[default]
    Insert,
    /// Accumulate.
    Add,
}

impl CombineMode {
    #[inline]
    fn apply(self, slot: &mut f64, value: f64) {
        match self {
            CombineMode::Insert => *slot = value,
            CombineMode::Add => *slot += value,
        }
    }
}

const TAG_SETUP: CommTag = CommTag::EXPORT;
const TAG_VALUES: CommTag = CommTag::EXPORT.offset(2);
const TAG_ROWS: CommTag = CommTag::EXPORT.offset(4);

#[derive(Clone, Debug)]
pub struct Exporter {
    source: Arc<DofMap>,
    target: Arc<DofMap>,
    /// `(source lid, target lid)` pairs satisfied on this rank.
    permutes: Vec<(usize, usize)>,
    /// Source lids shipped to each peer, in the peer's request order.
    sends: BTreeMap<usize, Vec<usize>>,
    /// Target lids filled from each peer, in request order.
    recvs: BTreeMap<usize, Vec<usize>>,
}

impl Exporter {
    /// Build the plan (collective).
    ///
    /// # Errors
    /// - `DuplicateGid` if `source` is not one-to-one.
    /// - `MissingOwner` if a target id is absent from `source`.
    pub fn new<C>(
        source: Arc<DofMap>,
        target: Arc<DofMap>,
        comm: &C,
    ) -> Result<Self, CouplingError>
    where
        C: Communicator + ?Sized,
    {
        let directory = Directory::build(&source, comm)?;
        let me = comm.rank();
        let plan = agree(comm, RequestPlan::build(&source, &target, &directory, me))?;

        let incoming = exchange(comm, TAG_SETUP, &plan.requests)?;
        let sends = incoming
            .into_iter()
            .filter(|(p, _)| *p != me)
            .map(|(peer, gids)| {
                let lids = gids
                    .iter()
                    .map(|g| source.lid_or_err(g.get()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, CouplingError>((peer, lids))
            })
            .collect::<Result<BTreeMap<_, _>, _>>();
        let sends = agree(comm, sends)?;

        let RequestPlan {
            permutes, recvs, ..
        } = plan;
        debug!(
            "exporter: {} permutes, {} remote ids from {} ranks, {} ids to {} ranks",
            permutes.len(),
            recvs.values().map(Vec::len).sum::<usize>(),
            recvs.len(),
            sends.values().map(Vec::len).sum::<usize>(),
            sends.len()
        );
        Ok(Exporter {
            source,
            target,
            permutes,
            sends,
            recvs,
        })
    }

    #[inline]
    pub fn source_map(&self) -> &Arc<DofMap> {
        &self.source
    }

    #[inline]
    pub fn target_map(&self) -> &Arc<DofMap> {
        &self.target
    }

    /// Target entries that arrive from other ranks.
    pub fn num_remote(&self) -> usize {
        self.recvs.values().map(Vec::len).sum()
    }

    fn check_vector(v: &DistVector, map: &DofMap, what: &str) -> Result<(), CouplingError> {
        if v.map().same_as(map) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(format!(
                "{what} vector does not live on the exporter's {what} map"
            )))
        }
    }

    fn check_matrix(m: &SparseMatrix, map: &DofMap, what: &str) -> Result<(), CouplingError> {
        if m.row_map().same_as(map) {
            Ok(())
        } else {
            Err(CouplingError::MapMismatch(format!(
                "{what} matrix rows do not follow the exporter's {what} map"
            )))
        }
    }

    /// Move values source → target (collective).
    pub fn import_vector<C>(
        &self,
        src: &DistVector,
        dst: &mut DistVector,
        mode: CombineMode,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        agree(
            comm,
            Self::check_vector(src, &self.source, "source")
                .and_then(|()| Self::check_vector(dst, &self.target, "target")),
        )?;
        move_values(
            src.values(),
            dst.values_mut(),
            self.permutes.iter().copied(),
            &self.sends,
            &self.recvs,
            mode,
            comm,
        )
    }

    /// Move values target → source (collective); copies of one id held by
    /// several target ranks are combined with `mode`.
    pub fn export_vector<C>(
        &self,
        src: &DistVector,
        dst: &mut DistVector,
        mode: CombineMode,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        agree(
            comm,
            Self::check_vector(src, &self.target, "target")
                .and_then(|()| Self::check_vector(dst, &self.source, "source")),
        )?;
        move_values(
            src.values(),
            dst.values_mut(),
            self.permutes.iter().map(|&(s, t)| (t, s)),
            &self.recvs,
            &self.sends,
            mode,
            comm,
        )
    }

    /// Move whole rows source → target (collective). Column ids are kept.
    pub fn import_matrix<C>(
        &self,
        src: &SparseMatrix,
        dst: &mut SparseMatrix,
        mode: CombineMode,
        comm: &C,
    ) -> Result<(), CouplingError>
    where
        C: Communicator + ?Sized,
    {
        agree(
            comm,
            Self::check_matrix(src, &self.source, "source")
                .and_then(|()| Self::check_matrix(dst, &self.target, "target")),
        )?;
        move_rows(
            src,
            dst,
            self.permutes.iter().copied(),
            &self.sends,
            mode,
            comm,
        )
    }
}

/// Local part of the exporter setup: what this rank fills itself and what
/// it asks each owner for.
struct RequestPlan {
    permutes: Vec<(usize, usize)>,
    requests: BTreeMap<usize, Vec<WireGid>>,
    recvs: BTreeMap<usize, Vec<usize>>,
}

impl RequestPlan {
    fn build(
        source: &DofMap,
        target: &DofMap,
        directory: &Directory,
        me: usize,
    ) -> Result<Self, CouplingError> {
        let mut plan = RequestPlan {
            permutes: Vec::new(),
            requests: BTreeMap::new(),
            recvs: BTreeMap::new(),
        };
        for (tlid, &gid) in target.gids().iter().enumerate() {
            let owner = directory.owner_or_err(gid)?;
            if owner == me {
                plan.permutes.push((source.lid_or_err(gid)?, tlid));
            } else {
                plan.requests.entry(owner).or_default().push(WireGid::of(gid));
                plan.recvs.entry(owner).or_default().push(tlid);
            }
        }
        Ok(plan)
    }
}

fn move_values<C, P>(
    src: &[f64],
    dst: &mut [f64],
    permutes: P,
    outgoing: &BTreeMap<usize, Vec<usize>>,
    incoming: &BTreeMap<usize, Vec<usize>>,
    mode: CombineMode,
    comm: &C,
) -> Result<(), CouplingError>
where
    C: Communicator + ?Sized,
    P: Iterator<Item = (usize, usize)>,
{
    for (from, to) in permutes {
        mode.apply(&mut dst[to], src[from]);
    }
    let sends: BTreeMap<usize, Vec<u64>> = outgoing
        .iter()
        .map(|(&peer, lids)| (peer, lids.iter().map(|&l| src[l].to_bits()).collect()))
        .collect();
    let received = exchange(comm, TAG_VALUES, &sends)?;
    agree(comm, unpack_values(dst, incoming, &received, mode))
}

fn unpack_values(
    dst: &mut [f64],
    incoming: &BTreeMap<usize, Vec<usize>>,
    received: &BTreeMap<usize, Vec<u64>>,
    mode: CombineMode,
) -> Result<(), CouplingError> {
    for (peer, lids) in incoming {
        let values = received.get(peer).map(Vec::as_slice).unwrap_or(&[]);
        if values.len() != lids.len() {
            return Err(CouplingError::BufferSizeMismatch {
                neighbor: *peer,
                expected: lids.len(),
                got: values.len(),
            });
        }
        for (&lid, &bits) in lids.iter().zip(values) {
            mode.apply(&mut dst[lid], f64::from_bits(bits));
        }
    }
    Ok(())
}

fn move_rows<C, P>(
    src: &SparseMatrix,
    dst: &mut SparseMatrix,
    permutes: P,
    outgoing: &BTreeMap<usize, Vec<usize>>,
    mode: CombineMode,
    comm: &C,
) -> Result<(), CouplingError>
where
    C: Communicator + ?Sized,
    P: Iterator<Item = (usize, usize)>,
{
    for (from, to) in permutes {
        let row = src.row_by_lid(from).clone();
        let target = dst.row_by_lid_mut(to);
        for (col, v) in row {
            mode.apply(target.entry(col).or_insert(0.0), v);
        }
    }
    let mut sends: BTreeMap<usize, Vec<WireEntry>> = BTreeMap::new();
    for (&peer, lids) in outgoing {
        let records = sends.entry(peer).or_default();
        for &lid in lids {
            let Some(row_gid) = src.row_map().gid(lid) else {
                continue;
            };
            records.extend(
                src.row_by_lid(lid)
                    .iter()
                    .map(|(&c, &v)| WireEntry::new(row_gid, c, v)),
            );
        }
    }
    let received = exchange(comm, TAG_ROWS, &sends)?;
    let me = comm.rank();
    let unpacked = received
        .into_iter()
        .filter(|(p, _)| *p != me)
        .flat_map(|(_, r)| r)
        .try_for_each(|record| {
            let lid = dst.row_map().lid_or_err(record.row())?;
            apply_entry(dst, lid, record.col(), record.value(), mode);
            Ok::<(), CouplingError>(())
        });
    agree(comm, unpacked)
}

fn apply_entry(dst: &mut SparseMatrix, lid: usize, col: Gid, value: f64, mode: CombineMode) {
    mode.apply(dst.row_by_lid_mut(lid).entry(col).or_insert(0.0), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn serial_permutation() {
        let src_map = Arc::new(DofMap::serial(vec![0, 1, 2]).unwrap());
        let dst_map = Arc::new(DofMap::serial(vec![2, 0]).unwrap());
        let ex = Exporter::new(src_map.clone(), dst_map.clone(), &NoComm).unwrap();
        let src = DistVector::from_values(src_map, vec![1.0, 2.0, 3.0]).unwrap();
        let mut dst = DistVector::new(dst_map);
        ex.import_vector(&src, &mut dst, CombineMode::Insert, &NoComm)
            .unwrap();
        assert_eq!(dst.values(), &[3.0, 1.0]);
        assert_eq!(ex.num_remote(), 0);
    }

    #[test]
    fn unknown_target_id_has_no_owner() {
        let src_map = Arc::new(DofMap::serial(vec![0, 1]).unwrap());
        let dst_map = Arc::new(DofMap::serial(vec![5]).unwrap());
        assert_eq!(
            Exporter::new(src_map, dst_map, &NoComm).unwrap_err(),
            CouplingError::MissingOwner(5)
        );
    }

    #[test]
    fn ghost_import_and_additive_export() {
        // rows: rank0 {0,1}, rank1 {2,3}; targets add ghosts 2 and 1
        let handles: Vec<_> = LocalComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let (rows, cols) = if comm.rank() == 0 {
                        (vec![0, 1], vec![0, 1, 2])
                    } else {
                        (vec![2, 3], vec![1, 2, 3])
                    };
                    let row_map = Arc::new(DofMap::new(rows, &comm).unwrap());
                    let col_map = Arc::new(DofMap::new(cols, &comm).unwrap());
                    let ex = Exporter::new(row_map.clone(), col_map.clone(), &comm).unwrap();

                    let owned = DistVector::from_values(
                        row_map.clone(),
                        row_map.gids().iter().map(|&g| g as f64 * 10.0).collect(),
                    )
                    .unwrap();
                    let mut ghosted = DistVector::new(col_map.clone());
                    ex.import_vector(&owned, &mut ghosted, CombineMode::Insert, &comm)
                        .unwrap();

                    let mut ones = DistVector::new(col_map);
                    ones.put_scalar(1.0);
                    let mut summed = DistVector::new(row_map);
                    ex.export_vector(&ones, &mut summed, CombineMode::Add, &comm)
                        .unwrap();
                    (ghosted.values().to_vec(), summed.values().to_vec())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].0, vec![0.0, 10.0, 20.0]);
        assert_eq!(results[1].0, vec![10.0, 20.0, 30.0]);
        // ids 1 and 2 are held twice
        assert_eq!(results[0].1, vec![1.0, 2.0]);
        assert_eq!(results[1].1, vec![2.0, 1.0]);
    }

    #[test]
    fn rows_follow_new_owners() {
        let handles: Vec<_> = LocalComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let (a, b) = if comm.rank() == 0 {
                        (vec![0, 1], vec![1])
                    } else {
                        (vec![2], vec![0, 2])
                    };
                    let a = Arc::new(DofMap::new(a, &comm).unwrap());
                    let b = Arc::new(DofMap::new(b, &comm).unwrap());
                    let mut m = SparseMatrix::new(a.clone());
                    for &r in a.gids() {
                        m.sum_into(r, r, r as f64 + 1.0).unwrap();
                        m.sum_into(r, 2, 0.5).unwrap();
                    }
                    let ex = Exporter::new(a, b.clone(), &comm).unwrap();
                    let mut moved = SparseMatrix::new(b);
                    ex.import_matrix(&m, &mut moved, CombineMode::Insert, &comm)
                        .unwrap();
                    moved.logically_eq(&m, &comm, 0.0).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn wrong_vector_on_one_rank_fails_everywhere() {
        let handles: Vec<_> = LocalComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let rows = if comm.rank() == 0 { vec![0, 1] } else { vec![2] };
                    let row_map = Arc::new(DofMap::new(rows, &comm).unwrap());
                    let col_map = Arc::new(DofMap::new(vec![0, 1, 2], &comm).unwrap());
                    let ex = Exporter::new(row_map.clone(), col_map.clone(), &comm).unwrap();
                    let src = DistVector::new(row_map.clone());
                    // rank 1 hands in a vector on the source map as target
                    let mut dst = if comm.rank() == 1 {
                        DistVector::new(row_map)
                    } else {
                        DistVector::new(col_map)
                    };
                    ex.import_vector(&src, &mut dst, CombineMode::Insert, &comm)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], Err(CouplingError::RankFailed { rank: 1 }));
        assert!(matches!(results[1], Err(CouplingError::MapMismatch(_))));
    }
}
