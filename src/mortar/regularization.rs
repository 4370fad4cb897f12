//! Penalty regularization of a normalized gap.
//!
//! The regularized multiplier is a piecewise-linear function of the gap.
//! Contact is one-sided: no force while the surfaces are apart, a penalty
//! force proportional to the penetration otherwise. Meshtying penalizes any
//! gap in both directions.

use serde::{Deserialize, Serialize};

use crate::coupling_error::CouplingError;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Regularization {
    /// `λ = p·g` for `g < 0`, zero otherwise.
    Contact { penalty: f64 },
    /// `λ = p·g` everywhere.
    Meshtying { penalty: f64 },
}

/// Regularized value of one multiplier dof.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Regularized {
    pub lambda: f64,
    pub active: bool,
    /// `dλ/dg`.
    pub derivative: f64,
}

impl Regularized {
    const INACTIVE: Regularized = Regularized {
        lambda: 0.0,
        active: false,
        derivative: 0.0,
    };
}

impl Regularization {
    #[inline]
    pub fn penalty(&self) -> f64 {
        match *self {
            Regularization::Contact { penalty } | Regularization::Meshtying { penalty } => penalty,
        }
    }

    /// Regularize the normalized gap `gap`.
    pub fn regularize(&self, gap: f64) -> Regularized {
        match *self {
            Regularization::Contact { .. } if gap >= 0.0 => Regularized::INACTIVE,
            Regularization::Contact { penalty } | Regularization::Meshtying { penalty } => {
                Regularized {
                    lambda: penalty * gap,
                    active: true,
                    derivative: penalty,
                }
            }
        }
    }

    /// Value for a dof no pair contributed to.
    pub(crate) fn unconstrained() -> Regularized {
        Regularized::INACTIVE
    }

    pub fn validate(&self) -> Result<(), CouplingError> {
        let p = self.penalty();
        if p.is_finite() && p > 0.0 {
            Ok(())
        } else {
            Err(CouplingError::InvalidParameter(format!(
                "penalty parameter must be positive and finite, got {p}"
            )))
        }
    }
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization::Contact { penalty: 100.0 }
    }
}
