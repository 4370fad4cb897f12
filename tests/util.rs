#![allow(dead_code)]
use mesh_coupling::{
    algs::communicator::{Communicator, LocalComm},
    discretization::NodeId,
    linalg::{DofMap, Gid},
};
use std::sync::Arc;

pub fn nid(u: u64) -> NodeId {
    NodeId::new(u).unwrap()
}

/// Run `f` once per rank of a fresh `size`-rank world, results by rank.
pub fn run_ranks<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalComm::world(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

pub fn map<C: Communicator>(gids: Vec<Gid>, comm: &C) -> Arc<DofMap> {
    Arc::new(DofMap::new(gids, comm).unwrap())
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
