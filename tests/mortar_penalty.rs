mod util;

use mesh_coupling::algs::communicator::{Communicator, NoComm};
use mesh_coupling::coupling_error::CouplingError;
use mesh_coupling::discretization::{CellShape, Discretization, Node};
use mesh_coupling::linalg::{DistVector, Gid, SparseMatrix};
use mesh_coupling::mortar::{InterfacePair, MortarManager, PairNode, Regularization};
use mesh_coupling::params::MortarParams;
use util::{map, nid, run_ranks};

fn params(regularization: Regularization) -> MortarParams {
    MortarParams {
        regularization,
        ..Default::default()
    }
}

/// Slave line (nodes 1, 2) at `y`, master line (nodes 3, 4) at y = 0.
/// Displacement ids: slave 0..4, master 4..8.
fn pair(y: f64) -> InterfacePair {
    let node = |id, x, yy, first: Gid| {
        PairNode::new(nid(id), [x, yy, 0.0], vec![first, first + 1])
    };
    InterfacePair {
        segment: 7,
        slave_shape: CellShape::Line2,
        slave: vec![node(1, 0.2, y, 0), node(2, 0.8, y, 2)],
        master_shape: CellShape::Line2,
        master: vec![node(3, 0.0, 0.0, 4), node(4, 1.0, 0.0, 6)],
    }
}

fn slave_surface(rank: usize, owners: [usize; 2]) -> Discretization {
    let mut dis = Discretization::new("contact", rank);
    dis.add_node(Node::new(nid(1), owners[0], [0.2, -0.01, 0.0], 2))
        .add_node(Node::new(nid(2), owners[1], [0.8, -0.01, 0.0], 2));
    dis
}

fn serial_manager(regularization: Regularization, u: &[f64]) -> MortarManager {
    let mut m = MortarManager::new(params(regularization), 1000).unwrap();
    m.setup(&slave_surface(0, [0, 0]), &NoComm).unwrap();
    m.set_pairs(vec![pair(-0.01)]);
    let displ = DistVector::from_values(map((0..8).collect(), &NoComm), u.to_vec()).unwrap();
    m.evaluate_global_coupling_contributions(&displ, &NoComm).unwrap();
    m
}

#[test]
fn penetrating_pair_gives_active_penalty_multipliers() {
    let m = serial_manager(Regularization::Contact { penalty: 100.0 }, &[0.0; 8]);
    assert_eq!(m.lambda_row_map().unwrap().gids(), &[1000, 1001]);
    let reg = m.get_penalty_regularization(true).unwrap();
    for lid in 0..2 {
        assert!((reg.lambda.values()[lid] + 1.0).abs() < 1e-10);
        assert_eq!(reg.active.values()[lid], 1.0);
    }
    assert_eq!(reg.dlambda_dgap.unwrap().values(), &[100.0, 100.0]);
    let points = m.contact_points().unwrap();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p.segment == 7 && (p.gap + 0.01).abs() < 1e-12));
}

#[test]
fn lifting_the_slave_opens_the_contact() {
    let mut u = [0.0; 8];
    u[1] = 0.02;
    u[3] = 0.02;
    let contact = serial_manager(Regularization::Contact { penalty: 100.0 }, &u);
    assert_eq!(contact.active_lambda_count(&NoComm).unwrap(), 0);
    let reg = contact.get_penalty_regularization(true).unwrap();
    assert!(reg.dlambda_dgap.unwrap().values().iter().all(|&d| d == 0.0));

    // meshtying pulls the surfaces back together
    let tied = serial_manager(Regularization::Meshtying { penalty: 100.0 }, &u);
    let reg = tied.get_penalty_regularization(false).unwrap();
    assert!(reg.lambda.values().iter().all(|&l| (l - 1.0).abs() < 1e-10));
}

#[test]
fn unsupported_master_shape_is_not_implemented() {
    let mut m = MortarManager::new(MortarParams::default(), 0).unwrap();
    m.setup(&slave_surface(0, [0, 0]), &NoComm).unwrap();
    let mut p = pair(-0.01);
    p.master_shape = CellShape::Tri3;
    p.master.push(PairNode::new(nid(5), [0.5, 0.0, 1.0], vec![8, 9]));
    m.set_pairs(vec![p]);
    let displ = DistVector::new(map((0..10).collect(), &NoComm));
    assert!(matches!(
        m.evaluate_global_coupling_contributions(&displ, &NoComm),
        Err(CouplingError::NotImplemented(_))
    ));
}

#[test]
fn extra_multiplier_dofs_stay_inactive() {
    let mut m = MortarManager::new(
        MortarParams {
            lambda_dofs_per_node: 2,
            ..params(Regularization::Contact { penalty: 100.0 })
        },
        1000,
    )
    .unwrap();
    m.setup(&slave_surface(0, [0, 0]), &NoComm).unwrap();
    m.set_pairs(vec![pair(-0.01)]);
    let displ = DistVector::new(map((0..8).collect(), &NoComm));
    m.evaluate_global_coupling_contributions(&displ, &NoComm).unwrap();

    assert_eq!(m.lambda_row_map().unwrap().gids(), &[1000, 1001, 1002, 1003]);
    let reg = m.get_penalty_regularization(true).unwrap();
    // node 1 owns 1000..1002, node 2 owns 1002..1004; the gap sits on the first
    for lid in [0, 2] {
        assert!((reg.lambda.values()[lid] + 1.0).abs() < 1e-10);
        assert_eq!(reg.active.values()[lid], 1.0);
    }
    for lid in [1, 3] {
        assert_eq!(m.kappa().unwrap().values()[lid], 0.0);
        assert_eq!(reg.lambda.values()[lid], 0.0);
        assert_eq!(reg.active.values()[lid], 0.0);
    }
    assert_eq!(m.active_lambda_count(&NoComm).unwrap(), 2);
}

#[test]
fn unsupported_pair_on_one_rank_fails_everywhere() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut m = MortarManager::new(MortarParams::default(), 1000).unwrap();
        let mut surface = Discretization::new("contact", rank);
        surface.add_node(Node::new(nid(rank as u64 + 1), rank, [0.0; 3], 2));
        m.setup(&surface, &comm).unwrap();
        // only rank 0 holds a pair: a triangle master with two dofs per
        // node, which no evaluator handles
        if rank == 0 {
            let mut p = pair(-0.01);
            p.master_shape = CellShape::Tri3;
            p.master.push(PairNode::new(nid(5), [0.5, 0.0, 1.0], vec![8, 9]));
            m.set_pairs(vec![p]);
        }
        let displ = DistVector::new(map((0..10).collect(), &comm));
        let outcome = m.evaluate_global_coupling_contributions(&displ, &comm);
        // every rank is still in step for the next collective
        let lambdas = m.lambda_row_map().unwrap().num_global();
        (outcome, lambdas)
    });
    assert!(matches!(results[0].0, Err(CouplingError::NotImplemented(_))));
    assert_eq!(results[1].0, Err(CouplingError::RankFailed { rank: 0 }));
    assert!(results.iter().all(|(_, n)| *n == 2));
}

#[test]
fn multipliers_reach_their_owners_across_ranks() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let contact = params(Regularization::Contact { penalty: 100.0 });
        let mut m = MortarManager::new(contact, 1000).unwrap();
        // slave node 1 on rank 0, node 2 on rank 1; the pair lives on rank 0
        let surface = if rank == 0 {
            slave_surface(0, [0, 1])
        } else {
            let mut dis = Discretization::new("contact", 1);
            dis.add_node(Node::new(nid(2), 1, [0.8, -0.01, 0.0], 2));
            dis
        };
        m.setup(&surface, &comm).unwrap();
        let (pairs, ghosted, owned): (Vec<_>, Vec<Gid>, Vec<Gid>) = if rank == 0 {
            (vec![pair(-0.01)], (0..8).collect(), (0..4).collect())
        } else {
            (vec![], vec![], (4..8).collect())
        };
        m.set_pairs(pairs);
        m.evaluate_global_coupling_contributions(&DistVector::new(map(ghosted, &comm)), &comm)
            .unwrap();

        let reg = m.get_penalty_regularization(false).unwrap();
        let active = m.active_lambda_count(&comm).unwrap();

        let owned = map(owned, &comm);
        let mut force = DistVector::new(owned.clone());
        let mut stiffness = SparseMatrix::new(owned);
        m.assemble_force_and_stiffness(&mut force, Some(&mut stiffness), &comm)
            .unwrap();
        let y_sum: f64 = force
            .iter()
            .filter(|(g, _)| g % 2 == 1)
            .map(|(_, f)| f)
            .sum();
        (
            m.lambda_row_map().unwrap().gids().to_vec(),
            reg.lambda.values().to_vec(),
            active,
            y_sum,
            stiffness.num_global_nonzeros(&comm).unwrap(),
        )
    });
    assert_eq!(results[0].0, vec![1000]);
    assert_eq!(results[1].0, vec![1001]);
    for (_, lambda, active, _, _) in &results {
        assert!((lambda[0] + 1.0).abs() < 1e-10);
        assert_eq!(*active, 2);
    }
    // slave side pushed down by 0.6 in total, master reacts
    assert!((results[0].3 + 0.6).abs() < 1e-10);
    assert!((results[1].3 - 0.6).abs() < 1e-10);
    assert_eq!(results[0].4, results[1].4);
}
