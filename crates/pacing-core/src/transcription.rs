//! One-step integration rules that link successive discrete states.
//!
//! All three schemes are explicit Runge-Kutta methods whose stages only
//! depend on the previous stage, so a single tableau-driven routine
//! produces both the update `x[k+1] = g(x[k], u[k], dt)` and its
//! sensitivities with respect to state, control and step length.

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::dynamics::{DynamicsModel, StateVector};
use crate::error::PacingError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrationScheme {
    Euler,
    Midpoint,
    #[default]
    #[serde(rename = "RK4", alias = "Rk4", alias = "rk4")]
    Rk4,
}

impl IntegrationScheme {
    pub const ALL: [IntegrationScheme; 3] = [
        IntegrationScheme::Euler,
        IntegrationScheme::Midpoint,
        IntegrationScheme::Rk4,
    ];

    /// Stage offsets `c` and weights `b`.
    fn tableau(self) -> (&'static [f64], &'static [f64]) {
        match self {
            IntegrationScheme::Euler => (&[0.0], &[1.0]),
            IntegrationScheme::Midpoint => (&[0.0, 0.5], &[0.0, 1.0]),
            IntegrationScheme::Rk4 => (
                &[0.0, 0.5, 0.5, 1.0],
                &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            ),
        }
    }

    pub fn stages(self) -> usize {
        self.tableau().0.len()
    }
}

impl fmt::Display for IntegrationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrationScheme::Euler => "Euler",
            IntegrationScheme::Midpoint => "Midpoint",
            IntegrationScheme::Rk4 => "RK4",
        };
        f.write_str(name)
    }
}

impl FromStr for IntegrationScheme {
    type Err = PacingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euler" => Ok(IntegrationScheme::Euler),
            "midpoint" => Ok(IntegrationScheme::Midpoint),
            "rk4" => Ok(IntegrationScheme::Rk4),
            other => Err(PacingError::InvalidParameter(format!(
                "unknown integration method: {}",
                other
            ))),
        }
    }
}

/// Result of one step plus its partial derivatives.
#[derive(Debug, Clone, Copy)]
pub struct StepSensitivity {
    pub next: StateVector,
    pub d_state: Matrix3<f64>,
    pub d_control: Vector3<f64>,
    pub d_dt: Vector3<f64>,
}

/// Dynamics paired with an integration rule.
#[derive(Debug, Clone, Copy)]
pub struct Transcriber<'a> {
    model: DynamicsModel<'a>,
    scheme: IntegrationScheme,
}

impl<'a> Transcriber<'a> {
    pub fn new(model: DynamicsModel<'a>, scheme: IntegrationScheme) -> Self {
        Self { model, scheme }
    }

    pub fn model(&self) -> &DynamicsModel<'a> {
        &self.model
    }

    pub fn scheme(&self) -> IntegrationScheme {
        self.scheme
    }

    pub fn step(&self, x: &StateVector, power: f64, dt: f64) -> StateVector {
        let (c, b) = self.scheme.tableau();
        let mut next = *x;
        let mut k_prev = Vector3::zeros();
        for (&ci, &bi) in c.iter().zip(b) {
            let y = x + k_prev * (ci * dt);
            let k = self.model.derivative(&y, power);
            next += k * (bi * dt);
            k_prev = k;
        }
        next
    }

    pub fn step_with_sensitivity(&self, x: &StateVector, power: f64, dt: f64) -> StepSensitivity {
        let (c, b) = self.scheme.tableau();
        let identity = Matrix3::identity();

        let mut out = StepSensitivity {
            next: *x,
            d_state: identity,
            d_control: Vector3::zeros(),
            d_dt: Vector3::zeros(),
        };
        let mut k = Vector3::zeros();
        let mut k_x = Matrix3::zeros();
        let mut k_u = Vector3::zeros();
        let mut k_dt = Vector3::zeros();

        for (&ci, &bi) in c.iter().zip(b) {
            let y = x + k * (ci * dt);
            let y_x = identity + k_x * (ci * dt);
            let y_u = k_u * (ci * dt);
            let y_dt = k * ci + k_dt * (ci * dt);

            let (a, bu) = self.model.jacobian(&y, power);
            k = self.model.derivative(&y, power);
            k_x = a * y_x;
            k_u = a * y_u + bu;
            k_dt = a * y_dt;

            out.next += k * (bi * dt);
            out.d_state += k_x * (bi * dt);
            out.d_control += k_u * (bi * dt);
            out.d_dt += k * bi + k_dt * (bi * dt);
        }
        out
    }

    /// `x_next - g(x, u, dt)`; zero when the pair satisfies the rule.
    pub fn defect(&self, x: &StateVector, power: f64, x_next: &StateVector, dt: f64) -> StateVector {
        x_next - self.step(x, power, dt)
    }
}
