//! Maximum attainable power as a function of the remaining reserve.

use serde::{Deserialize, Serialize};

use crate::error::{PacingError, Result};

/// Power ceiling model. Both variants map reserve-balance (J) to the
/// highest instantaneous power (W) the athlete can produce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PowerBoundModel {
    /// `CP + alpha * balance`
    Linear { alpha: f64 },
    /// CP-linked ceiling shaped by a neuromuscular saturation term.
    Neuromuscular {
        alpha: f64,
        alpha_c: f64,
        c_max: f64,
        c: f64,
    },
}

impl PowerBoundModel {
    /// Linear bound reaching `max_power` at a full reserve of `w_prime`.
    pub fn linear_from_max_power(max_power: f64, cp: f64, w_prime: f64) -> Result<Self> {
        if w_prime <= 0.0 {
            return Err(PacingError::InvalidParameter(format!(
                "w_prime must be positive, got {}",
                w_prime
            )));
        }
        if max_power < cp {
            return Err(PacingError::InvalidParameter(format!(
                "max_power {} below critical power {}",
                max_power, cp
            )));
        }
        Ok(PowerBoundModel::Linear {
            alpha: (max_power - cp) / w_prime,
        })
    }

    pub fn neuromuscular(alpha: f64) -> Self {
        PowerBoundModel::Neuromuscular {
            alpha,
            alpha_c: 0.01,
            c_max: 150.0,
            c: 80.0,
        }
    }

    pub fn max_power(&self, balance: f64, cp: f64) -> f64 {
        match *self {
            PowerBoundModel::Linear { alpha } => cp + alpha * balance,
            PowerBoundModel::Neuromuscular {
                alpha,
                alpha_c,
                c_max,
                c,
            } => {
                let q = c / (alpha_c * balance + c_max);
                4.0 * (alpha * balance + cp) * q * (1.0 - q)
            }
        }
    }

    /// d(max_power)/d(balance)
    pub fn max_power_slope(&self, balance: f64, cp: f64) -> f64 {
        match *self {
            PowerBoundModel::Linear { alpha } => alpha,
            PowerBoundModel::Neuromuscular {
                alpha,
                alpha_c,
                c_max,
                c,
            } => {
                let denom = alpha_c * balance + c_max;
                let q = c / denom;
                let dq = -c * alpha_c / (denom * denom);
                4.0 * alpha * q * (1.0 - q) + 4.0 * (alpha * balance + cp) * (1.0 - 2.0 * q) * dq
            }
        }
    }

    /// d²(max_power)/d(balance)²
    pub fn max_power_curvature(&self, balance: f64, cp: f64) -> f64 {
        match *self {
            PowerBoundModel::Linear { .. } => 0.0,
            PowerBoundModel::Neuromuscular {
                alpha,
                alpha_c,
                c_max,
                c,
            } => {
                let denom = alpha_c * balance + c_max;
                let q = c / denom;
                let dq = -c * alpha_c / denom.powi(2);
                let ddq = 2.0 * c * alpha_c * alpha_c / denom.powi(3);
                let base = alpha * balance + cp;
                8.0 * alpha * (1.0 - 2.0 * q) * dq - 8.0 * base * dq * dq
                    + 4.0 * base * (1.0 - 2.0 * q) * ddq
            }
        }
    }
}
