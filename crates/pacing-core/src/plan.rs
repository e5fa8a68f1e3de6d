//! Solved pacing plans and their summary statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::problem::NegativeSplit;
use crate::transcription::IntegrationScheme;

/// Rolling window used for Normalized Power (s).
const NP_WINDOW_S: f64 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDiagnostics {
    pub integration_method: IntegrationScheme,
    pub w_bal_model: String,
    pub intervals: usize,
    pub iterations: usize,
    pub wall_time_s: f64,
    pub time_init_guess_s: f64,
    pub warm_start_slope: f64,
    pub warm_start_iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_split: Option<NegativeSplit>,
    /// Distance the plan was re-anchored at; 0 for a fresh plan.
    pub anchor_m: f64,
    pub solved_at: DateTime<Utc>,
}

/// Committed trajectory; all series have one entry per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingPlan {
    pub power: Vec<f64>,
    pub time: Vec<f64>,
    pub distance: Vec<f64>,
    pub w_bal: Vec<f64>,
    pub speed: Vec<f64>,
    pub finish_time_s: f64,
    pub diagnostics: PlanDiagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub finish_time_s: f64,
    pub avg_power_w: f64,
    pub normalized_power_w: f64,
    pub min_w_bal: f64,
}

impl PacingPlan {
    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    pub fn start_distance(&self) -> Option<f64> {
        self.distance.first().copied()
    }

    pub fn finish_distance(&self) -> Option<f64> {
        self.distance.last().copied()
    }

    /// Move the plan into another distance frame.
    pub fn shift_distance(&mut self, offset: f64) {
        self.distance.iter_mut().for_each(|d| *d += offset);
        self.diagnostics.anchor_m += offset;
    }

    /// Planned W'-balance at `distance`, linearly interpolated and held
    /// constant outside the plan.
    pub fn planned_balance_at(&self, distance: f64) -> Option<f64> {
        let (first, last) = (self.distance.first()?, self.distance.last()?);
        if distance <= *first {
            return self.w_bal.first().copied();
        }
        if distance >= *last {
            return self.w_bal.last().copied();
        }
        let i = self.distance.partition_point(|&d| d <= distance).max(1);
        let (d0, d1) = (self.distance[i - 1], self.distance[i]);
        let (w0, w1) = (self.w_bal[i - 1], self.w_bal[i]);
        if d1 <= d0 {
            return Some(w1);
        }
        Some(w0 + (w1 - w0) * (distance - d0) / (d1 - d0))
    }

    pub fn summary(&self) -> PlanSummary {
        let dt = if self.time.len() >= 2 {
            self.time[1] - self.time[0]
        } else {
            1.0
        };
        PlanSummary {
            finish_time_s: self.finish_time_s,
            avg_power_w: mean(&self.power),
            normalized_power_w: normalized_power(&self.power, dt),
            min_w_bal: self.w_bal.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Fourth-root of the mean fourth power of the 30 s rolling average.
pub fn normalized_power(power: &[f64], dt: f64) -> f64 {
    if power.is_empty() || dt <= 0.0 {
        return 0.0;
    }
    let window = ((NP_WINDOW_S / dt).round() as usize).max(1);
    if power.len() < window {
        return mean(power);
    }

    let mut sum: f64 = power[..window].iter().sum();
    let mut fourth = (sum / window as f64).powi(4);
    let mut count = 1;
    for i in window..power.len() {
        sum += power[i] - power[i - window];
        fourth += (sum / window as f64).powi(4);
        count += 1;
    }
    (fourth / count as f64).powf(0.25)
}
