mod util;

use std::collections::BTreeMap;

use mesh_coupling::algs::communicator::Communicator;
use mesh_coupling::coupling_error::CouplingError;
use mesh_coupling::discretization::{Discretization, Node};
use mesh_coupling::dofset::{DofNumbering, DofSet, MortarDofSet};
use mesh_coupling::linalg::Gid;
use util::{assert_permutation, nid, run_ranks};

/// Six nodes, two per rank; each rank also ghosts the first node of the
/// next rank.
fn chain(rank: usize, size: usize, mortar: bool) -> Discretization {
    let mut dis = Discretization::new("chain", rank);
    let mut ids = vec![2 * rank as u64 + 1, 2 * rank as u64 + 2];
    if rank + 1 < size {
        ids.push(2 * rank as u64 + 3);
    }
    for id in ids {
        let owner = ((id - 1) / 2) as usize;
        let mut node = Node::new(nid(id), owner, [id as f64, 0.0, 0.0], 3);
        if mortar {
            node = node.with_custom_dofs((0..3).map(|k| 1000 + 10 * id as Gid + k).collect());
        }
        dis.add_node(node);
    }
    dis
}

#[test]
fn ids_are_unique_and_ghosts_agree_with_owners() {
    let results = run_ranks(3, |comm| {
        let dis = chain(comm.rank(), 3, false);
        let ds = DofSet::assign_degrees_of_freedom(&dis, 0, &comm).unwrap();
        let per_node: BTreeMap<u64, Vec<Gid>> = ds
            .nodes()
            .map(|n| (n.get(), ds.dofs(n).unwrap().to_vec()))
            .collect();
        (ds.row_map().gids().to_vec(), per_node, ds.max_gid())
    });

    let all_rows: Vec<Gid> = results.iter().flat_map(|(r, _, _)| r.clone()).collect();
    assert_permutation(&all_rows, &(0..18).collect::<Vec<_>>());

    let mut owned: BTreeMap<u64, Vec<Gid>> = BTreeMap::new();
    for (rank, (_, nodes, max)) in results.iter().enumerate() {
        assert_eq!(*max, Some(17));
        for id in [2 * rank as u64 + 1, 2 * rank as u64 + 2] {
            owned.insert(id, nodes[&id].clone());
        }
    }
    for (_, nodes, _) in &results {
        for (id, dofs) in nodes {
            assert_eq!(dofs.len(), 3);
            assert_eq!(dofs, &owned[id], "ghost node {id} disagrees with its owner");
        }
    }
}

#[test]
fn mortar_numbering_keeps_counts_per_node() {
    let results = run_ranks(3, |comm| {
        let dis = chain(comm.rank(), 3, true);
        let base = DofSet::assign_degrees_of_freedom(&dis, 0, &comm).unwrap();
        let ds = MortarDofSet::assign_degrees_of_freedom(&dis, 0, &comm).unwrap();
        for node in dis.col_nodes() {
            assert_eq!(
                ds.dofs(node.id).unwrap().len(),
                base.dofs(node.id).unwrap().len()
            );
        }
        (ds.row_map().gids().to_vec(), ds.max_gid(), ds.num_global_dofs())
    });
    let all_rows: Vec<Gid> = results.iter().flat_map(|(r, _, _)| r.clone()).collect();
    let expected: Vec<Gid> = (1..=6)
        .flat_map(|id| (0..3).map(move |k| 1000 + 10 * id + k))
        .collect();
    assert_permutation(&all_rows, &expected);
    for (_, max, n) in results {
        assert_eq!(max, Some(1062));
        assert_eq!(n, 18);
    }
}

#[test]
fn ghost_unknown_to_its_owner_fails_everywhere() {
    let results = run_ranks(2, |comm| {
        let mut dis = Discretization::new("broken", comm.rank());
        if comm.rank() == 0 {
            dis.add_node(Node::new(nid(1), 0, [0.0; 3], 1));
        } else {
            dis.add_node(Node::new(nid(2), 1, [0.0; 3], 1))
                .add_node(Node::new(nid(99), 0, [0.0; 3], 1));
        }
        DofSet::assign_degrees_of_freedom(&dis, 0, &comm).map(|_| ())
    });
    for r in results {
        assert_eq!(r.unwrap_err(), CouplingError::UnknownNode(nid(99)));
    }
}

#[test]
fn mortar_count_mismatch_on_one_rank_fails_everywhere() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut dis = Discretization::new("mortar", rank);
        // node 2 on rank 1 supplies one id where the base numbering assigns two
        let custom = if rank == 0 { vec![100, 101] } else { vec![102] };
        dis.add_node(Node::new(nid(rank as u64 + 1), rank, [0.0; 3], 2).with_custom_dofs(custom));
        MortarDofSet::assign_degrees_of_freedom(&dis, 0, &comm).map(|ds| ds.max_gid())
    });
    assert_eq!(results[0], Err(CouplingError::RankFailed { rank: 1 }));
    assert_eq!(
        results[1],
        Err(CouplingError::DofCountMismatch {
            node: nid(2),
            expected: 2,
            found: 1
        })
    );
}

#[test]
fn mortar_ids_clashing_across_ranks_are_rejected_everywhere() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut dis = Discretization::new("mortar", rank);
        dis.add_node(Node::new(nid(rank as u64 + 1), rank, [0.0; 3], 1).with_custom_dofs(vec![7]));
        MortarDofSet::assign_degrees_of_freedom(&dis, 0, &comm).map(|_| ())
    });
    for r in results {
        assert!(matches!(r, Err(CouplingError::DofMapInconsistent(_))));
    }
}
