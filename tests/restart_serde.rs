use std::sync::Arc;

use mesh_coupling::io::{InMemoryRestart, ResultReader, ResultWriter, VectorSnapshot};
use mesh_coupling::linalg::{DistVector, DofMap};
use mesh_coupling::mortar::Regularization;
use mesh_coupling::params::{MortarParams, XfsCouplingParams};

#[test]
fn restart_store_survives_json() {
    let map = Arc::new(DofMap::serial(vec![4, 8, 15]).unwrap());
    let v = DistVector::from_values(map.clone(), vec![1.0, -2.5, 3.25]).unwrap();
    let mut restart = InMemoryRestart::new(12, 1.2);
    restart.write_vector("fsilambda", &v).unwrap();

    let text = serde_json::to_string(&restart).unwrap();
    let back: InMemoryRestart = serde_json::from_str(&text).unwrap();
    assert_eq!(back, restart);
    assert_eq!(back.step, 12);
    assert_eq!(back.read_vector("fsilambda", &map).unwrap(), v);
    assert_eq!(
        back.snapshot("fsilambda"),
        Some(&VectorSnapshot {
            gids: vec![4, 8, 15],
            values: vec![1.0, -2.5, 3.25]
        })
    );
}

#[test]
fn parameter_blocks_fill_defaults() {
    let mortar: MortarParams = serde_json::from_str(
        r#"{ "regularization": { "type": "meshtying", "penalty": 50.0 } }"#,
    )
    .unwrap();
    assert_eq!(mortar.regularization, Regularization::Meshtying { penalty: 50.0 });
    assert_eq!(mortar.lambda_dofs_per_node, 1);
    mortar.validate().unwrap();

    let xfs: XfsCouplingParams = serde_json::from_str(r#"{ "theta": 0.5, "dt": 0.01 }"#).unwrap();
    assert_eq!(xfs.condition_name, "XFEMSurfFSIMono");
    assert!((xfs.interface_timefac() - 200.0).abs() < 1e-9);

    let bad: MortarParams = serde_json::from_str(
        r#"{ "regularization": { "type": "contact", "penalty": -1.0 } }"#,
    )
    .unwrap();
    assert!(bad.validate().is_err());
}
