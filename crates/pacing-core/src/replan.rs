//! Replanning against live telemetry.
//!
//! The trigger check is cheap and side-effect free; the replan itself runs
//! the full warm start + NLP pipeline on the remaining route and is meant to
//! be dispatched off the telemetry path.

use serde::{Deserialize, Serialize};

use crate::athlete::AthleteParameters;
use crate::dynamics::State;
use crate::error::Result;
use crate::plan::PacingPlan;
use crate::problem::{ProblemAssembler, ProblemConfig};
use crate::route::RouteProfile;
use crate::solver::NlpSolver;
use crate::warm_start::WarmStartConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanPolicy {
    /// Allowed |actual - planned| W'-balance before a replan (J).
    pub balance_threshold_j: f64,
    /// No replans closer than this to the finish (m).
    pub min_remaining_m: f64,
    /// No replans below this speed (m/s).
    pub min_speed_mps: f64,
}

impl Default for ReplanPolicy {
    fn default() -> Self {
        Self {
            balance_threshold_j: 3000.0,
            min_remaining_m: 500.0,
            min_speed_mps: 2.0,
        }
    }
}

/// One telemetry observation, already in SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub distance_m: f64,
    pub speed_mps: f64,
    pub w_bal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReplanDecision {
    Replan { planned_w_bal: f64, deviation: f64 },
    Hold(HoldReason),
}

impl ReplanDecision {
    pub fn should_replan(&self) -> bool {
        matches!(self, ReplanDecision::Replan { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HoldReason {
    EmptyPlan,
    WithinThreshold { deviation: f64 },
    NearFinish { remaining_m: f64 },
    TooSlow { speed_mps: f64 },
}

impl ReplanPolicy {
    pub fn evaluate(&self, plan: &PacingPlan, sample: &TelemetrySample, finish: f64) -> ReplanDecision {
        let Some(planned) = plan.planned_balance_at(sample.distance_m) else {
            return ReplanDecision::Hold(HoldReason::EmptyPlan);
        };
        let deviation = sample.w_bal - planned;
        if deviation.abs() <= self.balance_threshold_j {
            return ReplanDecision::Hold(HoldReason::WithinThreshold { deviation });
        }
        let remaining_m = finish - sample.distance_m;
        if remaining_m <= self.min_remaining_m {
            return ReplanDecision::Hold(HoldReason::NearFinish { remaining_m });
        }
        if sample.speed_mps <= self.min_speed_mps {
            return ReplanDecision::Hold(HoldReason::TooSlow {
                speed_mps: sample.speed_mps,
            });
        }
        ReplanDecision::Replan {
            planned_w_bal: planned,
            deviation,
        }
    }
}

/// Solve the rest of `route` from the athlete's current state and return
/// the plan in the full route's distance frame.
///
/// Speed and balance are clamped into the admissible ranges first;
/// telemetry is noisy and a few joules above W' should not fail a replan.
/// A negative-split corridor is not carried over: its floor is laid out
/// over the whole race and the athlete's live balance may already sit
/// below it.
pub fn replan(
    route: &RouteProfile,
    athlete: &AthleteParameters,
    config: &ProblemConfig,
    warm_config: &WarmStartConfig,
    sample: &TelemetrySample,
    solver: &dyn NlpSolver,
) -> Result<PacingPlan> {
    let slice = route.slice_from(sample.distance_m)?;
    let start = State::new(
        0.0,
        sample.speed_mps.clamp(config.min_speed_mps, config.max_speed_mps),
        sample.w_bal.clamp(0.0, athlete.w_prime),
    );
    tracing::info!(
        anchor_m = slice.offset,
        remaining_m = slice.profile.length(),
        speed_mps = start.speed,
        w_bal = start.balance,
        "replanning remaining route"
    );

    if let Some(split) = config.negative_split {
        tracing::debug!(
            start_pct = split.start_fraction * 100.0,
            end_pct = split.end_fraction * 100.0,
            "dropping negative-split corridor for replan"
        );
    }
    let config = ProblemConfig {
        negative_split: None,
        ..config.clone()
    };

    let assembler = ProblemAssembler::new(&slice.profile, athlete, &config);
    let mut plan = assembler.plan(start, warm_config, solver)?;
    plan.shift_distance(slice.offset);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacingError;
    use crate::problem::NegativeSplit;
    use crate::route::RouteData;
    use crate::solver::PassThroughSolver;

    fn flat_route() -> RouteProfile {
        let distance: Vec<f64> = (0..=1000).map(|i| i as f64 * 5.0).collect();
        RouteProfile::new(&RouteData {
            elevation: vec![12.0; distance.len()],
            friction: vec![0.004; distance.len()],
            distance,
        })
        .unwrap()
    }

    fn fresh_plan(route: &RouteProfile, athlete: &AthleteParameters) -> PacingPlan {
        let config = ProblemConfig::default();
        ProblemAssembler::new(route, athlete, &config)
            .plan(
                State::new(0.0, 1.0, athlete.w_prime),
                &WarmStartConfig::default(),
                &PassThroughSolver,
            )
            .unwrap()
    }

    #[test]
    fn test_small_deviation_holds() {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let plan = fresh_plan(&route, &athlete);
        let planned = plan.planned_balance_at(2000.0).unwrap();
        let sample = TelemetrySample {
            distance_m: 2000.0,
            speed_mps: 10.0,
            w_bal: planned - 1000.0,
        };
        let decision = ReplanPolicy::default().evaluate(&plan, &sample, route.finish());
        assert!(matches!(
            decision,
            ReplanDecision::Hold(HoldReason::WithinThreshold { .. })
        ));
    }

    #[test]
    fn test_large_deviation_triggers_unless_near_finish_or_slow() {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let plan = fresh_plan(&route, &athlete);
        let policy = ReplanPolicy::default();

        let mut sample = TelemetrySample {
            distance_m: 2000.0,
            speed_mps: 10.0,
            w_bal: 5000.0,
        };
        assert!(policy.evaluate(&plan, &sample, route.finish()).should_replan());

        sample.distance_m = route.finish() - 200.0;
        sample.w_bal = plan.planned_balance_at(sample.distance_m).unwrap() - 8000.0;
        assert!(matches!(
            policy.evaluate(&plan, &sample, route.finish()),
            ReplanDecision::Hold(HoldReason::NearFinish { .. })
        ));

        sample.distance_m = 2000.0;
        sample.speed_mps = 1.5;
        sample.w_bal = 5000.0;
        assert!(matches!(
            policy.evaluate(&plan, &sample, route.finish()),
            ReplanDecision::Hold(HoldReason::TooSlow { .. })
        ));
    }

    #[test]
    fn test_replan_is_anchored_in_route_frame() {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let sample = TelemetrySample {
            distance_m: 2_347.0,
            speed_mps: 11.0,
            w_bal: 15_000.0,
        };
        let plan = replan(
            &route,
            &athlete,
            &ProblemConfig::default(),
            &WarmStartConfig::default(),
            &sample,
            &PassThroughSolver,
        )
        .unwrap();

        let anchor = plan.diagnostics.anchor_m;
        assert_eq!(anchor, 2_350.0);
        assert!((plan.start_distance().unwrap() - anchor).abs() < 1e-9);
        assert_eq!(plan.w_bal[0], 15_000.0);
        assert_eq!(plan.speed[0], 11.0);
        assert!(plan.finish_distance().unwrap() < route.finish());
    }

    #[test]
    fn test_replan_below_split_corridor_drops_it() {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let config = ProblemConfig {
            negative_split: Some(NegativeSplit::from_percent(80.0, 20.0).unwrap()),
            ..ProblemConfig::default()
        };
        // 12 kJ at 3.5 km is under the corridor's 80 % starting floor.
        let sample = TelemetrySample {
            distance_m: 3_502.0,
            speed_mps: 10.0,
            w_bal: 12_000.0,
        };
        assert!(sample.w_bal < 0.8 * athlete.w_prime);

        let plan = replan(
            &route,
            &athlete,
            &config,
            &WarmStartConfig::default(),
            &sample,
            &PassThroughSolver,
        )
        .unwrap();
        assert!(plan.diagnostics.negative_split.is_none());
        assert_eq!(plan.w_bal[0], 12_000.0);
        assert!(plan.w_bal.iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn test_replan_past_last_segment_is_out_of_range() {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let sample = TelemetrySample {
            distance_m: route.finish() - 1.0,
            speed_mps: 11.0,
            w_bal: 15_000.0,
        };
        let err = replan(
            &route,
            &athlete,
            &ProblemConfig::default(),
            &WarmStartConfig::default(),
            &sample,
            &PassThroughSolver,
        )
        .unwrap_err();
        assert!(matches!(err, PacingError::OutOfRange { .. }));
    }
}
