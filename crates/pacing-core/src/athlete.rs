//! Rider, bike and physiological parameters for one optimization run.

use serde::{Deserialize, Serialize};

use crate::error::{PacingError, Result};
use crate::power_bound::PowerBoundModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteParameters {
    pub mass_rider_kg: f64,
    pub mass_bike_kg: f64,
    pub gravity: f64,
    /// Mechanical losses: constant and linear-in-speed terms.
    pub b0: f64,
    pub b1: f64,
    pub wheel_inertia: f64,
    pub wheel_radius_m: f64,
    pub drag_coefficient: f64,
    pub frontal_area_m2: f64,
    pub air_density: f64,
    pub drivetrain_efficiency: f64,
    /// Critical power (W).
    pub cp: f64,
    /// Anaerobic work capacity (J).
    pub w_prime: f64,
    pub power_bound: PowerBoundModel,
}

impl Default for AthleteParameters {
    fn default() -> Self {
        Self {
            mass_rider_kg: 78.0,
            mass_bike_kg: 8.4,
            gravity: 9.81,
            b0: 0.091,
            b1: 0.0087,
            wheel_inertia: 0.14,
            wheel_radius_m: 0.33,
            drag_coefficient: 0.7,
            frontal_area_m2: 0.4,
            air_density: 1.2,
            drivetrain_efficiency: 1.0,
            cp: 265.0,
            w_prime: 26630.0,
            power_bound: PowerBoundModel::Linear { alpha: 0.03 },
        }
    }
}

impl AthleteParameters {
    /// Default mechanics with the rider's own weight, CP, W' and a linear
    /// power bound peaking at `max_power`.
    pub fn for_rider(weight_kg: f64, cp: f64, w_prime: f64, max_power: f64) -> Result<Self> {
        let params = Self {
            mass_rider_kg: weight_kg,
            cp,
            w_prime,
            power_bound: PowerBoundModel::linear_from_max_power(max_power, cp, w_prime)?,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn total_mass(&self) -> f64 {
        self.mass_rider_kg + self.mass_bike_kg
    }

    /// Translational mass plus the rotational equivalent of the wheels.
    pub fn effective_mass(&self) -> f64 {
        self.total_mass() + self.wheel_inertia / self.wheel_radius_m.powi(2)
    }

    pub fn max_power(&self, balance: f64) -> f64 {
        self.power_bound.max_power(balance, self.cp)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("mass_rider_kg", self.mass_rider_kg),
            ("wheel_radius_m", self.wheel_radius_m),
            ("cp", self.cp),
            ("w_prime", self.w_prime),
            ("drivetrain_efficiency", self.drivetrain_efficiency),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PacingError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
