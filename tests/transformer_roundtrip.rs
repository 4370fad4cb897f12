mod util;

use std::sync::Arc;

use mesh_coupling::algs::communicator::{Communicator, LocalComm, NoComm};
use mesh_coupling::coupling_error::CouplingError;
use mesh_coupling::linalg::{DofMap, Gid, SparseMatrix};
use mesh_coupling::transform::{
    BlockMapPairs, BlockType, MatrixRowColTransformer, TransformerBuilder,
};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use util::{map, run_ranks};

const N: Gid = 12;
const LM: Gid = 100;

/// Contiguous blocks of `0..n` per rank.
fn contiguous(comm: &LocalComm, offset: Gid, n: Gid) -> Arc<DofMap> {
    let size = comm.size() as Gid;
    let r = comm.rank() as Gid;
    let lo = offset + r * n / size;
    let hi = offset + (r + 1) * n / size;
    map((lo..hi).collect(), comm)
}

/// Round-robin distribution of `0..n`.
fn cyclic(comm: &LocalComm, offset: Gid, n: Gid) -> Arc<DofMap> {
    let size = comm.size() as Gid;
    let r = comm.rank() as Gid;
    map((0..n).filter(|g| g % size == r).map(|g| offset + g).collect(), comm)
}

/// Every id of `offset..offset + n` gets a random owner; the draw is seeded
/// identically on all ranks so they agree on it. Local order is shuffled.
fn random_owners(comm: &LocalComm, offset: Gid, n: Gid, seed: u64) -> Arc<DofMap> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let owners: Vec<usize> = (0..n).map(|_| rng.gen_range(0..comm.size())).collect();
    let mut mine: Vec<Gid> = (0..n)
        .filter(|&g| owners[g as usize] == comm.rank())
        .map(|g| offset + g)
        .collect();
    mine.shuffle(&mut SmallRng::seed_from_u64(seed ^ comm.rank() as u64));
    map(mine, comm)
}

fn random_matrix(rows: &Arc<DofMap>, col_offset: Gid, seed: u64) -> SparseMatrix {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut m = SparseMatrix::new(rows.clone());
    for &r in rows.gids() {
        for _ in 0..3 {
            let c = col_offset + rng.gen_range(0..N);
            m.sum_into(r, c, rng.gen_range(-1.0..1.0)).unwrap();
        }
    }
    m
}

#[test]
fn round_trip_preserves_logical_content_for_every_block() {
    let results = run_ranks(3, |comm| {
        let all_displ = map((0..N).collect(), &comm);
        let all_lm = map((LM..LM + N).collect(), &comm);
        let (red_d, unred_d) = (cyclic(&comm, 0, N), contiguous(&comm, 0, N));
        let (red_l, unred_l) = (cyclic(&comm, LM, N), contiguous(&comm, LM, N));
        let (d, l) = (&all_displ, &all_lm);
        let t = TransformerBuilder::new(comm.clone())
            .block(BlockType::DisplDispl, red_d.clone(), d.clone(), unred_d.clone(), d.clone())
            .block(BlockType::DisplLm, red_d.clone(), l.clone(), unred_d.clone(), l.clone())
            .block(BlockType::LmDispl, red_l.clone(), d.clone(), unred_l.clone(), d.clone())
            .block(BlockType::LmLm, red_l.clone(), l.clone(), unred_l.clone(), l.clone())
            .build()
            .unwrap();

        let seed = 17 + comm.rank() as u64;
        let cases = [
            (BlockType::DisplDispl, &red_d, &unred_d, 0),
            (BlockType::DisplLm, &red_d, &unred_d, LM),
            (BlockType::LmDispl, &red_l, &unred_l, 0),
            (BlockType::LmLm, &red_l, &unred_l, LM),
        ];
        let mut ok = true;
        for (bt, rows, unred_rows, col_offset) in cases {
            let m = random_matrix(rows, col_offset, seed);
            let unred = t.redistributed_to_unredistributed(bt, &m).unwrap();
            ok &= unred.row_map().same_as(unred_rows);
            ok &= unred.logically_eq(&m, &comm, 1e-12).unwrap();

            let mut again = SparseMatrix::new(rows.clone());
            t.unredistributed_to_redistributed_into(bt, &unred, &mut again).unwrap();
            // a second transform into the same destination must not accumulate
            t.unredistributed_to_redistributed_into(bt, &unred, &mut again).unwrap();
            ok &= again.logically_eq(&m, &comm, 1e-12).unwrap();
        }
        ok
    });
    assert!(results.into_iter().all(|ok| ok));
}

#[test]
fn round_trip_over_random_row_ownerships() {
    for size in [2, 3, 4] {
        let results = run_ranks(size, |comm| {
            let cols = map((0..N).collect(), &comm);
            let mut ok = true;
            let bt = BlockType::DisplDispl;
            for seed in 0..6u64 {
                let red = random_owners(&comm, 0, N, seed);
                let unred = random_owners(&comm, 0, N, seed + 1000);
                let t = TransformerBuilder::new(comm.clone())
                    .block(bt, red.clone(), cols.clone(), unred.clone(), cols.clone())
                    .build()
                    .unwrap();
                let m = random_matrix(&red, 0, seed * 31 + comm.rank() as u64);
                let moved = t.redistributed_to_unredistributed(bt, &m).unwrap();
                ok &= moved.row_map().same_as(&unred);
                ok &= moved.logically_eq(&m, &comm, 1e-12).unwrap();
                let back = t.unredistributed_to_redistributed(bt, &moved).unwrap();
                ok &= back.logically_eq(&m, &comm, 1e-12).unwrap();
            }
            ok
        });
        assert!(results.into_iter().all(|ok| ok), "{size} ranks");
    }
}

#[test]
fn transformer_before_setup_reports_the_missing_step() {
    let rows = Arc::new(DofMap::serial_range(0, 3).unwrap());
    let maps: BlockMapPairs =
        [(BlockType::DisplDispl, rows.clone())].into_iter().collect();
    let mut t = MatrixRowColTransformer::new(1, NoComm);
    t.init(&maps, &maps, &maps, &maps).unwrap();

    let mut m = SparseMatrix::new(rows.clone());
    m.sum_into(0, 0, 1.0).unwrap();
    let err = t
        .redistributed_to_unredistributed(BlockType::DisplDispl, &m)
        .unwrap_err();
    assert_eq!(
        err,
        CouplingError::LifecycleViolation {
            component: "MatrixRowColTransformer",
            required: "setup"
        }
    );
    let mut dst = SparseMatrix::new(rows);
    assert!(t
        .redistributed_to_unredistributed_into(BlockType::DisplDispl, &m, &mut dst)
        .is_err());

    t.setup().unwrap();
    let out = t
        .redistributed_to_unredistributed(BlockType::DisplDispl, &m)
        .unwrap();
    assert_eq!(out.get(0, 0), Some(1.0));
}
