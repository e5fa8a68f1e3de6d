//! Server configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use pacing_core::{ReplanPolicy, SolveOptions};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub routes_path: PathBuf,
    /// Committed plans are mirrored here as JSON when set.
    pub plan_output: Option<PathBuf>,
    pub replan_threshold_j: f64,
    pub replan_min_remaining_m: f64,
    pub replan_min_speed_mps: f64,
    pub solver_max_iterations: usize,
    pub telemetry_capacity: usize,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_port: parsed("PACING_PORT", 3000),
            routes_path: env::var("PACING_ROUTES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("routes.json")),
            plan_output: env::var("PACING_PLAN_OUTPUT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            replan_threshold_j: parsed("PACING_REPLAN_THRESHOLD_J", 3000.0),
            replan_min_remaining_m: parsed("PACING_REPLAN_MIN_REMAINING_M", 500.0),
            replan_min_speed_mps: parsed("PACING_REPLAN_MIN_SPEED_MPS", 2.0),
            solver_max_iterations: parsed("PACING_SOLVER_MAX_ITER", 20_000),
            telemetry_capacity: parsed::<usize>("PACING_TELEMETRY_CAPACITY", 256).max(1),
        }
    }

    pub fn replan_policy(&self) -> ReplanPolicy {
        ReplanPolicy {
            balance_threshold_j: self.replan_threshold_j,
            min_remaining_m: self.replan_min_remaining_m,
            min_speed_mps: self.replan_min_speed_mps,
        }
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            max_iterations: self.solver_max_iterations,
            ..SolveOptions::default()
        }
    }
}
