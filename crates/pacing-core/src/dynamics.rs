//! Continuous-time rider dynamics: position, speed and W'-balance.
//!
//! State vector layout is `[position, speed, balance]`; the control is
//! instantaneous power. Everything here is closed-form so the transcribed
//! problem gets exact Jacobians.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::athlete::AthleteParameters;
use crate::route::RouteProfile;

pub type StateVector = Vector3<f64>;

pub const POSITION: usize = 0;
pub const SPEED: usize = 1;
pub const BALANCE: usize = 2;

/// Default tanh sharpness of the depletion/recovery switch (1/W).
pub const DEFAULT_SWITCH_SHARPNESS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub position: f64,
    pub speed: f64,
    pub balance: f64,
}

impl State {
    pub fn new(position: f64, speed: f64, balance: f64) -> Self {
        Self {
            position,
            speed,
            balance,
        }
    }

    pub fn to_vector(self) -> StateVector {
        Vector3::new(self.position, self.speed, self.balance)
    }

    pub fn from_vector(v: &StateVector) -> Self {
        Self::new(v[POSITION], v[SPEED], v[BALANCE])
    }
}

/// How W'-balance evolves with power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum BalanceModel {
    /// Smooth blend of depletion above CP and headroom-scaled recovery
    /// below CP.
    Ode { sharpness: f64 },
    /// Linear depletion/recovery at `CP - power`.
    Simple,
}

impl Default for BalanceModel {
    fn default() -> Self {
        BalanceModel::Ode {
            sharpness: DEFAULT_SWITCH_SHARPNESS,
        }
    }
}

impl BalanceModel {
    pub fn label(&self) -> &'static str {
        match self {
            BalanceModel::Ode { .. } => "ODE",
            BalanceModel::Simple => "Simple",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DynamicsModel<'a> {
    route: &'a RouteProfile,
    athlete: &'a AthleteParameters,
    balance_model: BalanceModel,
    effective_mass: f64,
    weight: f64,
    drag: f64,
}

impl<'a> DynamicsModel<'a> {
    pub fn new(
        route: &'a RouteProfile,
        athlete: &'a AthleteParameters,
        balance_model: BalanceModel,
    ) -> Self {
        Self {
            route,
            athlete,
            balance_model,
            effective_mass: athlete.effective_mass(),
            weight: athlete.total_mass() * athlete.gravity,
            drag: 0.5 * athlete.drag_coefficient * athlete.air_density * athlete.frontal_area_m2,
        }
    }

    pub fn route(&self) -> &RouteProfile {
        self.route
    }

    pub fn athlete(&self) -> &AthleteParameters {
        self.athlete
    }

    pub fn balance_model(&self) -> BalanceModel {
        self.balance_model
    }

    /// Net propulsive power after rolling, gravity, mechanical and
    /// aerodynamic losses.
    fn net_power(&self, position: f64, speed: f64, power: f64) -> f64 {
        let a = self.athlete;
        let (gradient, _) = self.route.gradient_run_out(position);
        let (friction, _) = self.route.friction_run_out(position);
        a.drivetrain_efficiency * power
            - friction * self.weight * speed
            - self.weight * gradient * speed
            - a.b0 * speed
            - a.b1 * speed * speed
            - self.drag * speed.powi(3)
    }

    /// Rate of change of W'-balance.
    pub fn balance_rate(&self, balance: f64, power: f64) -> f64 {
        let cp = self.athlete.cp;
        match self.balance_model {
            BalanceModel::Ode { sharpness } => {
                let w = 0.5 * ((sharpness * (power - cp)).tanh() + 1.0);
                let headroom = 1.0 - balance / self.athlete.w_prime;
                (cp - power) * (w + (1.0 - w) * headroom)
            }
            BalanceModel::Simple => cp - power,
        }
    }

    pub fn derivative(&self, x: &StateVector, power: f64) -> StateVector {
        let speed = x[SPEED];
        Vector3::new(
            speed,
            self.net_power(x[POSITION], speed, power) / (speed * self.effective_mass),
            self.balance_rate(x[BALANCE], power),
        )
    }

    /// Jacobians `(df/dx, df/du)` at `(x, power)`.
    pub fn jacobian(&self, x: &StateVector, power: f64) -> (Matrix3<f64>, StateVector) {
        let a = self.athlete;
        let position = x[POSITION];
        let speed = x[SPEED];
        let balance = x[BALANCE];
        let (gradient, gradient_slope) = self.route.gradient_run_out(position);
        let (friction, friction_slope) = self.route.friction_run_out(position);

        let net = self.net_power(position, speed, power);
        let dnet_dv = -friction * self.weight
            - self.weight * gradient
            - a.b0
            - 2.0 * a.b1 * speed
            - 3.0 * self.drag * speed * speed;
        let m = self.effective_mass;

        let dvdot_dp = -self.weight * (friction_slope + gradient_slope) / m;
        let dvdot_dv = (dnet_dv * speed - net) / (speed * speed * m);
        let dvdot_du = a.drivetrain_efficiency / (speed * m);

        let cp = a.cp;
        let (dbal_db, dbal_du) = match self.balance_model {
            BalanceModel::Ode { sharpness } => {
                let th = (sharpness * (power - cp)).tanh();
                let w = 0.5 * (th + 1.0);
                let dw_du = 0.5 * sharpness * (1.0 - th * th);
                let fill = balance / a.w_prime;
                let headroom = 1.0 - fill;
                let blend = w + (1.0 - w) * headroom;
                (
                    -(cp - power) * (1.0 - w) / a.w_prime,
                    -blend + (cp - power) * dw_du * fill,
                )
            }
            BalanceModel::Simple => (0.0, -1.0),
        };

        #[rustfmt::skip]
        let dfdx = Matrix3::new(
            0.0,       1.0,       0.0,
            dvdot_dp,  dvdot_dv,  0.0,
            0.0,       0.0,       dbal_db,
        );
        (dfdx, Vector3::new(0.0, dvdot_du, dbal_du))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteData;

    fn rolling_route() -> RouteProfile {
        let distance: Vec<f64> = (0..=200).map(|i| i as f64 * 5.0).collect();
        let elevation = distance.iter().map(|d| 20.0 * (d / 150.0).sin()).collect();
        let friction = distance
            .iter()
            .map(|d| 0.004 + 0.001 * (d / 300.0).cos())
            .collect();
        RouteProfile::new(&RouteData {
            distance,
            elevation,
            friction,
        })
        .unwrap()
    }

    fn finite_difference_check(model: &DynamicsModel, x: StateVector, u: f64) {
        let (dfdx, dfdu) = model.jacobian(&x, u);
        for j in 0..3 {
            let h = 1e-6 * x[j].abs().max(1.0);
            let mut plus = x;
            let mut minus = x;
            plus[j] += h;
            minus[j] -= h;
            let fd = (model.derivative(&plus, u) - model.derivative(&minus, u)) / (2.0 * h);
            for i in 0..3 {
                assert!(
                    (dfdx[(i, j)] - fd[i]).abs() < 1e-5 * fd[i].abs().max(1.0),
                    "df{}/dx{}: analytic {} vs fd {}",
                    i,
                    j,
                    dfdx[(i, j)],
                    fd[i]
                );
            }
        }
        let h = 1e-4;
        let fd = (model.derivative(&x, u + h) - model.derivative(&x, u - h)) / (2.0 * h);
        for i in 0..3 {
            assert!((dfdu[i] - fd[i]).abs() < 1e-5 * fd[i].abs().max(1.0));
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let route = rolling_route();
        let athlete = AthleteParameters::default();
        for balance_model in [BalanceModel::default(), BalanceModel::Simple] {
            let model = DynamicsModel::new(&route, &athlete, balance_model);
            finite_difference_check(&model, Vector3::new(333.0, 9.5, 18000.0), 320.0);
            finite_difference_check(&model, Vector3::new(712.0, 4.0, 6000.0), 180.0);
        }
    }

    #[test]
    fn test_balance_depletes_above_and_recovers_below_cp() {
        let route = rolling_route();
        let athlete = AthleteParameters::default();
        let model = DynamicsModel::new(&route, &athlete, BalanceModel::default());

        // Well above CP the switch is saturated: rate ~ -(u - CP).
        let rate = model.balance_rate(20000.0, athlete.cp + 100.0);
        assert!((rate + 100.0).abs() < 1e-3);

        // Below CP recovery scales with the remaining headroom.
        let half = model.balance_rate(athlete.w_prime / 2.0, athlete.cp - 100.0);
        assert!((half - 50.0).abs() < 1e-3);
        let full = model.balance_rate(athlete.w_prime, athlete.cp - 100.0);
        assert!(full.abs() < 1e-3);
    }

    #[test]
    fn test_flat_steady_state_at_terminal_speed() {
        let distance: Vec<f64> = (0..=100).map(|i| i as f64 * 10.0).collect();
        let route = RouteProfile::new(&RouteData {
            elevation: vec![5.0; distance.len()],
            friction: vec![0.004; distance.len()],
            distance,
        })
        .unwrap();
        let athlete = AthleteParameters::default();
        let model = DynamicsModel::new(&route, &athlete, BalanceModel::Simple);

        // Bisect for the speed where CP exactly balances resistance.
        let (mut lo, mut hi) = (1.0, 30.0);
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            let accel = model.derivative(&Vector3::new(500.0, mid, 1.0), athlete.cp)[SPEED];
            if accel > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let terminal = 0.5 * (lo + hi);
        assert!(terminal > 5.0 && terminal < 15.0);
        let slower = model.derivative(&Vector3::new(500.0, terminal - 1.0, 1.0), athlete.cp);
        assert!(slower[SPEED] > 0.0);
    }
}
