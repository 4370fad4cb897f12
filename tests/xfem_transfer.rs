mod util;

use std::sync::Arc;

use mesh_coupling::algs::communicator::{Communicator, LocalComm};
use mesh_coupling::discretization::{Discretization, Node};
use mesh_coupling::dofset::DofNumbering;
use mesh_coupling::xfem::{
    ConditionManager, FieldStateKind, FluidVector, NodalDofSets, StateContext, TransferPolicy,
    TransferReport, XDofSet, XFluidState,
};
use util::{nid, run_ranks};

/// Nodes 1, 2 on rank 0 (ghosting 3), nodes 3, 4 on rank 1.
fn fluid(rank: usize) -> Discretization {
    let mut dis = Discretization::new("xfluid", rank);
    let nodes: &[(u64, usize)] = if rank == 0 {
        &[(1, 0), (2, 0), (3, 1)]
    } else {
        &[(3, 1), (4, 1)]
    };
    for &(id, owner) in nodes {
        dis.add_node(Node::new(nid(id), owner, [id as f64, 0.0, 0.0], 1));
    }
    dis
}

fn state(comm: &LocalComm, cut: NodalDofSets) -> XFluidState {
    let dis = Arc::new(fluid(comm.rank()));
    let xdofset = XDofSet::assign_degrees_of_freedom(&dis, &cut, 0, comm).unwrap();
    let context = StateContext {
        condition_manager: Arc::new(ConditionManager::new()),
        cut_topology: Arc::new(cut),
        xdofset: Arc::new(xdofset),
        xfield_discret: dis.clone(),
        field_discret: dis,
    };
    let mut s = XFluidState::initialized(context, false);
    s.setup().unwrap();
    s
}

#[test]
fn recut_moves_values_to_the_new_numbering() {
    let results = run_ranks(2, |comm| {
        // the interface passes node 2 before and node 3 after the re-cut
        let mut old = state(&comm, NodalDofSets::new().with_sets(nid(2), 2));
        let velnp = old.vector_mut(FluidVector::Velnp).unwrap();
        let values: Vec<f64> = velnp.map().gids().iter().map(|&g| g as f64 * 10.0 + 1.0).collect();
        velnp.values_mut().copy_from_slice(&values);

        let mut new = state(&comm, NodalDofSets::new().with_sets(nid(3), 2));
        let report = old
            .transfer_to_new_state(&mut new, TransferPolicy::CopyStandard)
            .unwrap();
        let transferred = new.vector(FluidVector::Velnp).unwrap().values().to_vec();

        let standard = new
            .state()
            .xdofset()
            .unwrap()
            .standard_row_map(&comm)
            .unwrap();
        let reset = new.reset_non_standard_dofs(&standard).unwrap();
        let after_reset = new.vector(FluidVector::Velnp).unwrap().values().to_vec();

        assert!(old.destroy());
        (
            report,
            transferred,
            reset,
            after_reset,
            new.state().xdofset().unwrap().num_global_dofs(),
        )
    });

    let (report, transferred, reset, after_reset, n) = &results[0];
    assert_eq!(
        *report,
        TransferReport {
            carried: 2,
            defaulted: 0,
            dropped: 1
        }
    );
    assert_eq!(transferred, &vec![1.0, 11.0]);
    assert_eq!(*reset, 0);
    assert_eq!(after_reset, transferred);
    assert_eq!(*n, 5);

    let (report, transferred, reset, after_reset, _) = &results[1];
    assert_eq!(
        *report,
        TransferReport {
            carried: 2,
            defaulted: 1,
            dropped: 0
        }
    );
    assert_eq!(transferred, &vec![31.0, 31.0, 41.0]);
    assert_eq!(*reset, 1);
    assert_eq!(after_reset, &vec![31.0, 0.0, 41.0]);
}
