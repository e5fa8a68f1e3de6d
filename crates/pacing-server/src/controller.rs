//! Per-session reoptimization control.
//!
//! Each session owns its route, athlete and the last committed plan. The
//! plan is swapped whole behind an `RwLock<Arc<_>>`, so readers either see
//! the old plan or the new one. At most one replan runs per session; the
//! in-flight flag is a CAS on an `AtomicBool` released by a drop guard.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use pacing_core::{
    replan, AthleteParameters, HoldReason, NlpSolver, PacingError, PacingPlan, ProblemConfig,
    ReplanDecision, ReplanPolicy, RouteProfile, TelemetrySample, WarmStartConfig,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::persistence::{self, PlanRecord};

#[derive(Debug, Error)]
pub enum ReplanError {
    #[error("a replan is already in flight for this session")]
    Busy,
    #[error(transparent)]
    Pacing(#[from] PacingError),
    #[error("replan worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryOutcome {
    Hold(HoldReason),
    Dispatched,
    /// Trigger fired while another replan was running.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplanStats {
    pub committed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    committed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Everything a session needs besides its first plan.
pub struct SessionSetup {
    pub session_id: String,
    pub route_name: String,
    pub route: Arc<RouteProfile>,
    pub athlete: AthleteParameters,
    pub problem: ProblemConfig,
    pub warm_start: WarmStartConfig,
    pub policy: ReplanPolicy,
    pub solver: Arc<dyn NlpSolver>,
    pub plan_output: Option<PathBuf>,
}

pub struct ReoptimizationController {
    setup: SessionSetup,
    plan: RwLock<Arc<PacingPlan>>,
    in_flight: AtomicBool,
    counters: Counters,
}

/// Clears the in-flight flag when the replan it guards ends, however it ends.
struct InFlight(Arc<ReoptimizationController>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl ReoptimizationController {
    pub fn new(setup: SessionSetup, plan: PacingPlan) -> Self {
        Self {
            setup,
            plan: RwLock::new(Arc::new(plan)),
            in_flight: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.setup.session_id
    }

    pub fn route_name(&self) -> &str {
        &self.setup.route_name
    }

    pub fn finish(&self) -> f64 {
        self.setup.route.finish()
    }

    pub async fn current_plan(&self) -> Arc<PacingPlan> {
        self.plan.read().await.clone()
    }

    pub fn is_replanning(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ReplanStats {
        ReplanStats {
            committed: self.counters.committed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn record(&self, plan: &PacingPlan) -> PlanRecord {
        PlanRecord {
            session_id: self.setup.session_id.clone(),
            route: self.setup.route_name.clone(),
            committed_at: Utc::now(),
            summary: plan.summary(),
            plan: plan.clone(),
        }
    }

    /// Mirror `plan` to the configured output file, if any.
    pub async fn persist(&self, plan: &PacingPlan) {
        let Some(path) = self.setup.plan_output.as_deref() else {
            return;
        };
        if let Err(err) = persistence::write_plan(path, &self.record(plan)).await {
            tracing::warn!(
                session_id = %self.setup.session_id,
                "Failed to persist plan: {:#}",
                err
            );
        }
    }

    fn try_begin(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(Arc::clone(self)))
    }

    async fn run_replan(self: &Arc<Self>, sample: TelemetrySample) -> Result<Arc<PacingPlan>, ReplanError> {
        let this = Arc::clone(self);
        let joined = tokio::task::spawn_blocking(move || {
            let s = &this.setup;
            replan(
                &s.route,
                &s.athlete,
                &s.problem,
                &s.warm_start,
                &sample,
                s.solver.as_ref(),
            )
        })
        .await;

        let plan = match joined {
            Ok(Ok(plan)) => Arc::new(plan),
            Ok(Err(err)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    session_id = %self.setup.session_id,
                    distance_m = sample.distance_m,
                    "Replan failed, keeping previous plan: {}",
                    err
                );
                return Err(err.into());
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(session_id = %self.setup.session_id, "Replan worker panicked: {}", err);
                return Err(ReplanError::Worker(err.to_string()));
            }
        };

        *self.plan.write().await = Arc::clone(&plan);
        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session_id = %self.setup.session_id,
            anchor_m = plan.diagnostics.anchor_m,
            finish_time_s = plan.finish_time_s,
            "Committed replanned pacing"
        );
        self.persist(&plan).await;
        Ok(plan)
    }

    /// Cheap trigger check; a firing trigger is handed to a background task
    /// so the caller can keep consuming telemetry.
    pub async fn on_telemetry(self: &Arc<Self>, sample: TelemetrySample) -> TelemetryOutcome {
        let plan = self.current_plan().await;
        let (planned_w_bal, deviation) =
            match self.setup.policy.evaluate(&plan, &sample, self.finish()) {
                ReplanDecision::Hold(reason) => return TelemetryOutcome::Hold(reason),
                ReplanDecision::Replan {
                    planned_w_bal,
                    deviation,
                } => (planned_w_bal, deviation),
            };

        let Some(guard) = self.try_begin() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id = %self.setup.session_id, "Replan already in flight, trigger dropped");
            return TelemetryOutcome::Dropped;
        };

        tracing::info!(
            session_id = %self.setup.session_id,
            distance_m = sample.distance_m,
            w_bal = sample.w_bal,
            planned_w_bal,
            deviation,
            "W' balance off plan, replanning"
        );
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            // Failures are logged and counted inside run_replan.
            let _ = this.run_replan(sample).await;
        });
        TelemetryOutcome::Dispatched
    }

    /// Replan from `sample` now and wait for the result.
    pub async fn reoptimize(self: &Arc<Self>, sample: TelemetrySample) -> Result<Arc<PacingPlan>, ReplanError> {
        let _guard = self.try_begin().ok_or(ReplanError::Busy)?;
        self.run_replan(sample).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacing_core::{
        NlpProblem, NlpSolution, PassThroughSolver, ProblemAssembler, RouteData, SolveOptions,
        SolverFailure, State,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Blocks every solve until released.
    struct GatedSolver {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl NlpSolver for GatedSolver {
        fn solve(
            &self,
            problem: &dyn NlpProblem,
            initial_guess: &[f64],
            options: &SolveOptions,
        ) -> Result<NlpSolution, SolverFailure> {
            if let Ok(rx) = self.gate.lock() {
                let _ = rx.recv_timeout(Duration::from_secs(10));
            }
            PassThroughSolver.solve(problem, initial_guess, options)
        }
    }

    fn flat_route() -> Arc<RouteProfile> {
        let distance: Vec<f64> = (0..=1000).map(|i| i as f64 * 5.0).collect();
        Arc::new(
            RouteProfile::new(&RouteData {
                elevation: vec![0.0; distance.len()],
                friction: vec![0.004; distance.len()],
                distance,
            })
            .unwrap(),
        )
    }

    fn controller(solver: Arc<dyn NlpSolver>) -> Arc<ReoptimizationController> {
        let route = flat_route();
        let athlete = AthleteParameters::default();
        let problem = ProblemConfig::default();
        let warm_start = WarmStartConfig::default();
        let plan = ProblemAssembler::new(&route, &athlete, &problem)
            .plan(State::new(0.0, 1.0, athlete.w_prime), &warm_start, &PassThroughSolver)
            .unwrap();
        Arc::new(ReoptimizationController::new(
            SessionSetup {
                session_id: "test".to_string(),
                route_name: "Flat".to_string(),
                route,
                athlete,
                problem,
                warm_start,
                policy: ReplanPolicy::default(),
                solver,
                plan_output: None,
            },
            plan,
        ))
    }

    fn off_plan_sample() -> TelemetrySample {
        TelemetrySample {
            distance_m: 1_502.0,
            speed_mps: 10.0,
            w_bal: 12_000.0,
        }
    }

    #[tokio::test]
    async fn test_on_plan_telemetry_holds() {
        let ctl = controller(Arc::new(PassThroughSolver));
        let sample = TelemetrySample {
            distance_m: 1_000.0,
            speed_mps: 10.0,
            w_bal: ctl.current_plan().await.planned_balance_at(1_000.0).unwrap(),
        };
        let outcome = ctl.on_telemetry(sample).await;
        assert!(matches!(
            outcome,
            TelemetryOutcome::Hold(HoldReason::WithinThreshold { .. })
        ));
    }

    #[tokio::test]
    async fn test_reoptimize_commits_anchored_plan() {
        let ctl = controller(Arc::new(PassThroughSolver));
        let plan = ctl.reoptimize(off_plan_sample()).await.unwrap();
        assert_eq!(plan.start_distance(), Some(1_505.0));
        assert_eq!(plan.w_bal[0], 12_000.0);

        let current = ctl.current_plan().await;
        assert!(Arc::ptr_eq(&plan, &current));
        assert_eq!(ctl.stats().committed, 1);
        assert!(!ctl.is_replanning());
    }

    #[tokio::test]
    async fn test_failed_replan_keeps_previous_plan() {
        let ctl = controller(Arc::new(PassThroughSolver));
        let before = ctl.current_plan().await;
        let sample = TelemetrySample {
            distance_m: 4_999.0,
            ..off_plan_sample()
        };
        let err = ctl.reoptimize(sample).await.unwrap_err();
        assert!(matches!(err, ReplanError::Pacing(PacingError::OutOfRange { .. })));
        assert!(Arc::ptr_eq(&before, &ctl.current_plan().await));
        assert_eq!(ctl.stats().failed, 1);
        assert!(!ctl.is_replanning());
    }

    #[tokio::test]
    async fn test_trigger_while_busy_is_dropped() {
        let (tx, rx) = std::sync::mpsc::channel();
        let ctl = controller(Arc::new(GatedSolver {
            gate: Mutex::new(rx),
        }));

        assert_eq!(ctl.on_telemetry(off_plan_sample()).await, TelemetryOutcome::Dispatched);
        assert!(ctl.is_replanning());
        assert_eq!(ctl.on_telemetry(off_plan_sample()).await, TelemetryOutcome::Dropped);
        assert!(matches!(
            ctl.reoptimize(off_plan_sample()).await,
            Err(ReplanError::Busy)
        ));

        tx.send(()).unwrap();
        for _ in 0..200 {
            if !ctl.is_replanning() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!ctl.is_replanning());
        let stats = ctl.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.dropped, 1);
    }
}
