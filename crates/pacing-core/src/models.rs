//! Request and event payloads shared by the HTTP service and the CLI.

use serde::{Deserialize, Serialize};

use crate::athlete::AthleteParameters;
use crate::dynamics::BalanceModel;
use crate::error::{PacingError, Result};
use crate::power_bound::PowerBoundModel;
use crate::problem::{NegativeSplit, ProblemConfig};
use crate::replan::TelemetrySample;
use crate::route::{RouteData, RouteLibrary};
use crate::solver::SolveOptions;
use crate::transcription::IntegrationScheme;

fn default_laps() -> usize {
    1
}

fn default_bound_start() -> f64 {
    80.0
}

fn default_bound_end() -> f64 {
    20.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerBoundKind {
    #[default]
    Linear,
    Neuromuscular,
}

/// Fresh plan request for a named route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveRequest {
    pub route: String,
    #[serde(default = "default_laps")]
    pub num_laps: usize,
    /// Rider weight (kg).
    pub weight: f64,
    pub cp: f64,
    pub w_prime: f64,
    /// Power ceiling at a full reserve (W).
    pub max_power: f64,
    #[serde(default)]
    pub integration_method: IntegrationScheme,
    #[serde(default)]
    pub negative_split: bool,
    /// Negative-split corridor bounds in percent of W'.
    #[serde(default = "default_bound_start")]
    pub bound_start: f64,
    #[serde(default = "default_bound_end")]
    pub bound_end: f64,
    #[serde(default)]
    pub power_bound: PowerBoundKind,
    #[serde(default)]
    pub w_bal_model: BalanceModel,
}

impl SolveRequest {
    pub fn athlete(&self) -> Result<AthleteParameters> {
        let mut athlete =
            AthleteParameters::for_rider(self.weight, self.cp, self.w_prime, self.max_power)?;
        if self.power_bound == PowerBoundKind::Neuromuscular {
            athlete.power_bound =
                PowerBoundModel::neuromuscular((self.max_power - self.cp) / self.w_prime);
        }
        Ok(athlete)
    }

    pub fn negative_split_bounds(&self) -> Result<Option<NegativeSplit>> {
        if !self.negative_split {
            return Ok(None);
        }
        NegativeSplit::from_percent(self.bound_start, self.bound_end).map(Some)
    }

    pub fn problem_config(&self, solver: SolveOptions) -> Result<ProblemConfig> {
        Ok(ProblemConfig {
            integration_method: self.integration_method,
            w_bal_model: self.w_bal_model,
            negative_split: self.negative_split_bounds()?,
            solver,
            ..ProblemConfig::default()
        })
    }

    /// Resolve the route and stitch the requested number of laps.
    pub fn route_data(&self, library: &RouteLibrary) -> Result<RouteData> {
        library.resolve(&self.route)?.expand_laps(self.num_laps)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Mps,
    Kph,
}

impl SpeedUnit {
    pub fn to_mps(self, speed: f64) -> f64 {
        match self {
            SpeedUnit::Mps => speed,
            SpeedUnit::Kph => speed / 3.6,
        }
    }
}

/// Athlete state reported by the head unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AthleteState {
    pub distance: f64,
    pub speed: f64,
    #[serde(default)]
    pub speed_unit: SpeedUnit,
    pub w_bal: f64,
}

impl AthleteState {
    pub fn to_sample(&self) -> Result<TelemetrySample> {
        if !(self.distance.is_finite() && self.speed.is_finite() && self.w_bal.is_finite()) {
            return Err(PacingError::InvalidParameter(
                "telemetry contains non-finite values".to_string(),
            ));
        }
        Ok(TelemetrySample {
            distance_m: self.distance,
            speed_mps: self.speed_unit.to_mps(self.speed),
            w_bal: self.w_bal,
        })
    }
}

/// Solve request plus the athlete's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReoptimizationRequest {
    #[serde(flatten)]
    pub solve: SolveRequest,
    #[serde(flatten)]
    pub state: AthleteState,
}

/// One live telemetry event for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub state: AthleteState,
}
