//! Turn a committed plan back into a telemetry stream.
//!
//! The replayed athlete rides exactly to plan, except for an optional
//! linear W'-balance drift (going out too hard) and uniform sensor noise.

use pacing_core::{AthleteState, PacingPlan, SpeedUnit};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Balance deficit that grows linearly once past `start_m`.
#[derive(Debug, Clone, Copy)]
pub struct DriftProfile {
    pub start_m: f64,
    pub j_per_km: f64,
}

impl DriftProfile {
    pub fn offset_at(&self, distance: f64) -> f64 {
        ((distance - self.start_m).max(0.0) / 1000.0) * self.j_per_km
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayPoint {
    pub time_s: f64,
    pub state: AthleteState,
}

pub struct TelemetryReplay<'a> {
    plan: &'a PacingPlan,
    w_prime: f64,
    drift: Option<DriftProfile>,
    noise_j: f64,
    speed_unit: SpeedUnit,
    rng: StdRng,
    index: usize,
}

impl<'a> TelemetryReplay<'a> {
    pub fn new(plan: &'a PacingPlan, w_prime: f64) -> Self {
        Self {
            plan,
            w_prime,
            drift: None,
            noise_j: 0.0,
            speed_unit: SpeedUnit::Mps,
            rng: StdRng::seed_from_u64(0),
            index: 0,
        }
    }

    pub fn with_drift(mut self, drift: DriftProfile) -> Self {
        self.drift = Some(drift);
        self
    }

    pub fn with_noise(mut self, noise_j: f64, seed: u64) -> Self {
        self.noise_j = noise_j.abs();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_speed_unit(mut self, unit: SpeedUnit) -> Self {
        self.speed_unit = unit;
        self
    }
}

impl Iterator for TelemetryReplay<'_> {
    type Item = ReplayPoint;

    fn next(&mut self) -> Option<ReplayPoint> {
        let k = self.index;
        let plan = self.plan;
        if k >= plan.len() {
            return None;
        }
        self.index += 1;

        let distance = plan.distance[k];
        let mut w_bal = plan.w_bal[k];
        if let Some(drift) = self.drift {
            w_bal -= drift.offset_at(distance);
        }
        if self.noise_j > 0.0 {
            w_bal += self.rng.random_range(-self.noise_j..=self.noise_j);
        }
        let speed = match self.speed_unit {
            SpeedUnit::Mps => plan.speed[k],
            SpeedUnit::Kph => plan.speed[k] * 3.6,
        };

        Some(ReplayPoint {
            time_s: plan.time[k],
            state: AthleteState {
                distance,
                speed,
                speed_unit: self.speed_unit,
                w_bal: w_bal.clamp(0.0, self.w_prime),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacing_core::{IntegrationScheme, PlanDiagnostics};

    fn plan() -> PacingPlan {
        let n = 11;
        PacingPlan {
            power: vec![265.0; n],
            time: (0..n).map(|i| i as f64 * 100.0).collect(),
            distance: (0..n).map(|i| i as f64 * 1000.0).collect(),
            w_bal: vec![20_000.0; n],
            speed: vec![10.0; n],
            finish_time_s: 1000.0,
            diagnostics: PlanDiagnostics {
                integration_method: IntegrationScheme::Rk4,
                w_bal_model: "ODE".to_string(),
                intervals: n - 1,
                iterations: 0,
                wall_time_s: 0.0,
                time_init_guess_s: 1000.0,
                warm_start_slope: 0.0,
                warm_start_iterations: 0,
                negative_split: None,
                anchor_m: 0.0,
                solved_at: chrono::Utc::now(),
            },
        }
    }

    #[test]
    fn test_replay_follows_plan_without_drift() {
        let plan = plan();
        let points: Vec<_> = TelemetryReplay::new(&plan, 26_630.0).collect();
        assert_eq!(points.len(), plan.len());
        assert!(points.iter().all(|p| p.state.w_bal == 20_000.0));
        assert_eq!(points[3].time_s, 300.0);
    }

    #[test]
    fn test_drift_grows_after_start_and_clamps_at_zero() {
        let plan = plan();
        let drift = DriftProfile {
            start_m: 2_000.0,
            j_per_km: 4_000.0,
        };
        let points: Vec<_> = TelemetryReplay::new(&plan, 26_630.0)
            .with_drift(drift)
            .with_speed_unit(SpeedUnit::Kph)
            .collect();
        assert_eq!(points[2].state.w_bal, 20_000.0);
        assert_eq!(points[4].state.w_bal, 12_000.0);
        assert_eq!(points[10].state.w_bal, 0.0);
        assert!((points[0].state.speed - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_noise_is_bounded_and_seeded() {
        let plan = plan();
        let a: Vec<_> = TelemetryReplay::new(&plan, 26_630.0).with_noise(200.0, 7).collect();
        let b: Vec<_> = TelemetryReplay::new(&plan, 26_630.0).with_noise(200.0, 7).collect();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.state.w_bal, y.state.w_bal);
            assert!((x.state.w_bal - 20_000.0).abs() <= 200.0);
        }
    }
}
