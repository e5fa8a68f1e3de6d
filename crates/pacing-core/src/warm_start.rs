//! Shooting-method warm start.
//!
//! A one-parameter policy `power(x) = CP + slope * gradient(x)` is
//! forward-simulated to the finish. The slope is bisected so the
//! W'-balance never drops below a safety floor; the highest slope that
//! stays above the floor seeds every NLP variable.

use serde::{Deserialize, Serialize};

use crate::dynamics::{State, StateVector, BALANCE, POSITION, SPEED};
use crate::error::{PacingError, Result};
use crate::transcription::Transcriber;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmStartConfig {
    /// Fixed simulation step (s).
    pub dt_s: f64,
    pub slope_min: f64,
    pub slope_max: f64,
    /// Bisection stops once the bracket is narrower than this.
    pub resolution: f64,
    /// Minimum W'-balance (J) a candidate may reach.
    pub balance_floor: f64,
    /// Simulation horizon, in seconds per remaining kilometre.
    pub max_seconds_per_km: f64,
}

impl Default for WarmStartConfig {
    fn default() -> Self {
        Self {
            dt_s: 0.75,
            slope_min: 0.0,
            slope_max: 2500.0,
            resolution: 50.0,
            balance_floor: 1000.0,
            max_seconds_per_km: 180.0,
        }
    }
}

/// Dynamically consistent initial trajectory, one entry per node.
#[derive(Debug, Clone)]
pub struct WarmStart {
    pub states: Vec<State>,
    pub power: Vec<f64>,
    pub dt_s: f64,
    pub slope: f64,
    pub iterations: usize,
}

impl WarmStart {
    pub fn intervals(&self) -> usize {
        self.states.len().saturating_sub(1)
    }

    pub fn total_time(&self) -> f64 {
        self.intervals() as f64 * self.dt_s
    }

    pub fn min_balance(&self) -> f64 {
        self.states
            .iter()
            .map(|s| s.balance)
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug)]
struct Simulation {
    states: Vec<State>,
    power: Vec<f64>,
    reached_finish: bool,
    /// Elapsed time at which the state went non-finite or the speed
    /// dropped to zero.
    diverged_at_s: Option<f64>,
    min_balance: f64,
}

impl Simulation {
    fn feasible(&self, floor: f64) -> bool {
        self.reached_finish && self.states.len() >= 2 && self.min_balance >= floor
    }
}

pub struct WarmStartSimulator<'a> {
    transcriber: Transcriber<'a>,
    config: &'a WarmStartConfig,
}

impl<'a> WarmStartSimulator<'a> {
    pub fn new(transcriber: Transcriber<'a>, config: &'a WarmStartConfig) -> Self {
        Self {
            transcriber,
            config,
        }
    }

    fn policy(&self, x: &StateVector, slope: f64) -> f64 {
        let model = self.transcriber.model();
        let athlete = model.athlete();
        let (gradient, _) = model.route().gradient_run_out(x[POSITION]);
        let ceiling = athlete.max_power(x[BALANCE]).max(0.0);
        (athlete.cp + slope * gradient).clamp(0.0, ceiling)
    }

    fn simulate(&self, start: State, slope: f64) -> Simulation {
        let finish = self.transcriber.model().route().finish();
        let remaining_km = ((finish - start.position) / 1000.0).max(0.0);
        let horizon = (remaining_km * self.config.max_seconds_per_km).max(self.config.dt_s);
        let max_steps = (horizon / self.config.dt_s).ceil() as usize;

        let mut x = start.to_vector();
        let mut states = vec![start];
        let mut power = Vec::new();
        let mut reached_finish = false;
        let mut diverged_at_s = None;

        for step in 0..max_steps {
            if x[POSITION] >= finish {
                reached_finish = true;
                break;
            }
            let u = self.policy(&x, slope);
            power.push(u);
            x = self.transcriber.step(&x, u, self.config.dt_s);
            if x.iter().any(|v| !v.is_finite()) || x[SPEED] <= 0.0 {
                diverged_at_s = Some((step + 1) as f64 * self.config.dt_s);
                break;
            }
            states.push(State::from_vector(&x));
        }
        if diverged_at_s.is_none() && x[POSITION] >= finish {
            reached_finish = true;
        }

        // Keep nodes strictly before the first one at/after the finish.
        let end = states
            .iter()
            .position(|s| s.position >= finish)
            .unwrap_or(states.len());
        states.truncate(end);
        power.truncate(end);

        let min_balance = states
            .iter()
            .map(|s| s.balance)
            .fold(f64::INFINITY, f64::min);
        Simulation {
            states,
            power,
            reached_finish,
            diverged_at_s,
            min_balance,
        }
    }

    /// Bisect the policy slope and return the most aggressive trajectory
    /// that respects the balance floor.
    pub fn run(&self, start: State) -> Result<WarmStart> {
        let cfg = self.config;
        if !(cfg.dt_s > 0.0 && cfg.resolution > 0.0 && cfg.slope_max >= cfg.slope_min) {
            return Err(PacingError::InvalidParameter(
                "warm start needs positive dt/resolution and an ordered slope bracket".to_string(),
            ));
        }

        let (mut lo, mut hi) = (cfg.slope_min, cfg.slope_max);
        let mut best: Option<(f64, Simulation)> = None;
        let mut iterations = 0;

        while hi - lo > cfg.resolution {
            iterations += 1;
            let slope = 0.5 * (lo + hi);
            let sim = self.simulate(start, slope);
            tracing::debug!(
                iterations,
                slope,
                min_balance = sim.min_balance,
                reached_finish = sim.reached_finish,
                diverged_at_s = ?sim.diverged_at_s,
                "warm start candidate"
            );
            if sim.feasible(cfg.balance_floor) {
                lo = slope;
                best = Some((slope, sim));
            } else {
                hi = slope;
            }
        }

        let (slope, sim) = match best {
            Some(found) => found,
            None => {
                let sim = self.simulate(start, lo);
                if !sim.feasible(cfg.balance_floor) {
                    let reason = if let Some(at) = sim.diverged_at_s {
                        format!(
                            "simulation diverged after {:.1} s (non-finite state or non-positive speed) \
                             at slope {:.1}; step {} s is too coarse",
                            at, lo, cfg.dt_s
                        )
                    } else if !sim.reached_finish {
                        format!("policy never reaches the finish (slope {:.1})", lo)
                    } else if sim.states.len() < 2 {
                        "remaining distance is shorter than one simulation step".to_string()
                    } else {
                        format!(
                            "balance falls to {:.0} J, below floor {:.0} J at slope {:.1}",
                            sim.min_balance, cfg.balance_floor, lo
                        )
                    };
                    return Err(PacingError::InfeasibleWarmStart { reason, iterations });
                }
                (lo, sim)
            }
        };

        Ok(WarmStart {
            states: sim.states,
            power: sim.power,
            dt_s: cfg.dt_s,
            slope,
            iterations,
        })
    }
}
