//! Parameter blocks consumed at construction.
//!
//! Each block is a plain struct with defaults that deserializes with serde
//! and checks itself with `validate()` before any collective work starts.

use serde::{Deserialize, Serialize};

use crate::coupling_error::CouplingError;
use crate::mortar::regularization::Regularization;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MortarParams {
    pub regularization: Regularization,
    /// Multiplier dofs per interface node. Only the first carries the gap;
    /// further dofs stay inactive zeros.
    pub lambda_dofs_per_node: usize,
    /// Slack on the facet parameter range when projecting slave nodes.
    pub projection_tolerance: f64,
}

impl Default for MortarParams {
    fn default() -> Self {
        Self {
            regularization: Regularization::default(),
            lambda_dofs_per_node: 1,
            projection_tolerance: 1e-8,
        }
    }
}

impl MortarParams {
    pub fn validate(&self) -> Result<(), CouplingError> {
        self.regularization.validate()?;
        if self.lambda_dofs_per_node == 0 {
            return Err(CouplingError::InvalidParameter(
                "lambda_dofs_per_node must be at least 1".into(),
            ));
        }
        if !(self.projection_tolerance >= 0.0 && self.projection_tolerance.is_finite()) {
            return Err(CouplingError::InvalidParameter(format!(
                "projection_tolerance must be a non-negative number, got {}",
                self.projection_tolerance
            )));
        }
        Ok(())
    }
}

/// Monolithic structure/fluid interface coupling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XfsCouplingParams {
    /// Interface condition of both discretizations.
    pub condition_name: String,
    /// Second-order interface time integration (`λ` carried with `1 - θ`).
    pub interface_second_order: bool,
    pub theta: f64,
    pub dt: f64,
    /// Block index of the structure in the global system.
    pub structure_block: usize,
    /// Block index of the fluid in the global system.
    pub fluid_block: usize,
}

impl Default for XfsCouplingParams {
    fn default() -> Self {
        Self {
            condition_name: "XFEMSurfFSIMono".into(),
            interface_second_order: false,
            theta: 1.0,
            dt: 0.1,
            structure_block: 0,
            fluid_block: 1,
        }
    }
}

impl XfsCouplingParams {
    pub fn validate(&self) -> Result<(), CouplingError> {
        if !(self.theta > 0.0 && self.theta <= 1.0) {
            return Err(CouplingError::InvalidParameter(format!(
                "theta must lie in (0, 1], got {}",
                self.theta
            )));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(CouplingError::InvalidParameter(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        if self.structure_block == self.fluid_block {
            return Err(CouplingError::InvalidParameter(
                "structure and fluid must use different blocks".into(),
            ));
        }
        if self.condition_name.is_empty() {
            return Err(CouplingError::InvalidParameter(
                "condition_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Scaling between interface forces and the time-integrated system,
    /// `1 / (θ Δt)`.
    pub fn interface_timefac(&self) -> f64 {
        1.0 / (self.theta * self.dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(MortarParams::default().validate().is_ok());
        assert!(XfsCouplingParams::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p: MortarParams = serde_json::from_str(
            r#"{"regularization":{"type":"contact","penalty":100.0}}"#,
        )
        .unwrap();
        assert_eq!(p.lambda_dofs_per_node, 1);
        let x: XfsCouplingParams = serde_json::from_str(r#"{"theta":0.5,"dt":0.01}"#).unwrap();
        assert_eq!(x.condition_name, "XFEMSurfFSIMono");
        assert!((x.interface_timefac() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_blocks_are_reported() {
        let bad = XfsCouplingParams {
            theta: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(CouplingError::InvalidParameter(_))));
        let zero = MortarParams {
            lambda_dofs_per_node: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
