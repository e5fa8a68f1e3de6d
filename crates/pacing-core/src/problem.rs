//! Free-final-time pacing NLP.
//!
//! Decision vector layout (N intervals, N+1 nodes), interleaved per node so
//! the Hessian stays banded apart from the final-time row:
//!
//! ```text
//! [ pos_0 speed_0 bal_0 u_0 | ... | pos_N speed_N bal_N u_N | T ]
//! ```
//!
//! Equality rows are the transcription defects `x[k+1] - g(x[k], u[k], T/N)`
//! scaled per state component; inequality rows are the power ceiling
//! `u[k] <= Pmax(bal[k])`. Boundary conditions, speed limits, the reserve
//! range and the negative-split corridor are all plain variable bounds.

use chrono::Utc;
use nalgebra::{Matrix5, Vector3, Vector5};
use serde::{Deserialize, Serialize};

use crate::athlete::AthleteParameters;
use crate::dynamics::{BalanceModel, DynamicsModel, State, StateVector, BALANCE, POSITION, SPEED};
use crate::error::{PacingError, Result};
use crate::plan::{PacingPlan, PlanDiagnostics};
use crate::route::RouteProfile;
use crate::solver::{NlpProblem, NlpSolution, NlpSolver, SolveOptions, Triplet};
use crate::transcription::{IntegrationScheme, Transcriber};
use crate::warm_start::{WarmStart, WarmStartConfig, WarmStartSimulator};

const SPEED_SCALE: f64 = 10.0;
/// Relative step for differencing the step sensitivities.
const CURVATURE_STEP: f64 = 1e-6;

/// Lower envelope on W'-balance, linear in elapsed time, as fractions
/// of W'.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NegativeSplit {
    pub start_fraction: f64,
    pub end_fraction: f64,
}

impl NegativeSplit {
    pub fn from_percent(start: f64, end: f64) -> Result<Self> {
        for value in [start, end] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PacingError::InvalidParameter(format!(
                    "negative split bound {} outside 0..=100 %",
                    value
                )));
            }
        }
        Ok(Self {
            start_fraction: start / 100.0,
            end_fraction: end / 100.0,
        })
    }

    /// Envelope at node `k` of `n` intervals. Nodes are uniform in time, so
    /// the time fraction is `k / n` whatever the final time.
    pub fn lower_bound(&self, w_prime: f64, k: usize, n: usize) -> f64 {
        let frac = if n == 0 { 0.0 } else { k as f64 / n as f64 };
        w_prime * (self.start_fraction + (self.end_fraction - self.start_fraction) * frac)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub integration_method: IntegrationScheme,
    pub w_bal_model: BalanceModel,
    /// Penalize successive power differences.
    pub smooth_power: bool,
    pub smoothing_weight: f64,
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    /// Upper bound on the final time, in seconds per kilometre.
    pub max_seconds_per_km: f64,
    pub negative_split: Option<NegativeSplit>,
    pub solver: SolveOptions,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            integration_method: IntegrationScheme::default(),
            w_bal_model: BalanceModel::default(),
            smooth_power: true,
            smoothing_weight: 5e-5,
            min_speed_mps: 1.0,
            max_speed_mps: 25.0,
            max_seconds_per_km: 180.0,
            negative_split: None,
            solver: SolveOptions::default(),
        }
    }
}

pub struct PacingProblem<'a> {
    transcriber: Transcriber<'a>,
    config: &'a ProblemConfig,
    start: State,
    finish: f64,
    intervals: usize,
    time_ref: f64,
    state_scale: [f64; 3],
}

impl<'a> PacingProblem<'a> {
    pub fn intervals(&self) -> usize {
        self.intervals
    }

    fn nodes(&self) -> usize {
        self.intervals + 1
    }

    fn state_index(&self, k: usize, component: usize) -> usize {
        4 * k + component
    }

    fn control_index(&self, k: usize) -> usize {
        4 * k + 3
    }

    fn time_index(&self) -> usize {
        4 * self.nodes()
    }

    fn state_at(&self, z: &[f64], k: usize) -> StateVector {
        let i = self.state_index(k, 0);
        StateVector::new(z[i], z[i + 1], z[i + 2])
    }

    fn step_length(&self, z: &[f64]) -> f64 {
        z[self.time_index()] / self.intervals as f64
    }

    fn w_prime(&self) -> f64 {
        self.transcriber.model().athlete().w_prime
    }

    fn length(&self) -> f64 {
        self.finish - self.start.position
    }

    pub fn time_ceiling(&self) -> f64 {
        (self.length() / 1000.0 * self.config.max_seconds_per_km).max(self.time_ref)
    }

    /// Second derivatives of `weightsᵀ g(x, u, dt)` over `(pos, speed, bal,
    /// u, dt)` for interval `k`, by central differences of the analytic
    /// step sensitivities.
    fn step_curvature(&self, z: &[f64], k: usize, weights: &Vector3<f64>, dt: f64) -> Matrix5<f64> {
        let x = self.state_at(z, k);
        let point = Vector5::new(x[POSITION], x[SPEED], x[BALANCE], z[self.control_index(k)], dt);
        let typical = Vector5::new(
            self.state_scale[POSITION],
            self.state_scale[SPEED],
            self.state_scale[BALANCE],
            self.transcriber.model().athlete().cp,
            dt,
        );
        let gradient = |v: &Vector5<f64>| {
            let sens = self
                .transcriber
                .step_with_sensitivity(&StateVector::new(v[0], v[1], v[2]), v[3], v[4]);
            let state = sens.d_state.transpose() * weights;
            Vector5::new(
                state[0],
                state[1],
                state[2],
                sens.d_control.dot(weights),
                sens.d_dt.dot(weights),
            )
        };

        let mut hessian = Matrix5::zeros();
        for j in 0..5 {
            let h = CURVATURE_STEP * point[j].abs().max(1e-3 * typical[j]).max(1e-8);
            let mut plus = point;
            let mut minus = point;
            plus[j] += h;
            minus[j] -= h;
            hessian.set_column(j, &((gradient(&plus) - gradient(&minus)) / (2.0 * h)));
        }
        (hessian + hessian.transpose()) * 0.5
    }

    pub fn initial_guess(&self, warm: &WarmStart) -> Vec<f64> {
        let mut z = vec![0.0; self.num_variables()];
        for (k, state) in warm.states.iter().enumerate().take(self.nodes()) {
            z[self.state_index(k, POSITION)] = state.position;
            z[self.state_index(k, SPEED)] = state.speed;
            z[self.state_index(k, BALANCE)] = state.balance;
        }
        for (k, power) in warm.power.iter().enumerate().take(self.nodes()) {
            z[self.control_index(k)] = *power;
        }
        z[self.time_index()] = warm.total_time();
        z
    }

    /// Unpack a solution vector into a plan in the problem's own frame.
    pub fn extract_plan(&self, solution: &NlpSolution, warm: &WarmStart) -> PacingPlan {
        let z = &solution.variables;
        let n = self.nodes();
        let total = z[self.time_index()];
        let dt = total / self.intervals as f64;

        let states: Vec<StateVector> = (0..n).map(|k| self.state_at(z, k)).collect();
        PacingPlan {
            power: (0..n).map(|k| z[self.control_index(k)]).collect(),
            time: (0..n).map(|k| k as f64 * dt).collect(),
            distance: states.iter().map(|x| x[POSITION]).collect(),
            w_bal: states.iter().map(|x| x[BALANCE]).collect(),
            speed: states.iter().map(|x| x[SPEED]).collect(),
            finish_time_s: total,
            diagnostics: PlanDiagnostics {
                integration_method: self.transcriber.scheme(),
                w_bal_model: self.config.w_bal_model.label().to_string(),
                intervals: self.intervals,
                iterations: solution.iterations,
                wall_time_s: solution.wall_time_s,
                time_init_guess_s: warm.total_time(),
                warm_start_slope: warm.slope,
                warm_start_iterations: warm.iterations,
                negative_split: self.config.negative_split,
                anchor_m: 0.0,
                solved_at: Utc::now(),
            },
        }
    }
}

impl NlpProblem for PacingProblem<'_> {
    fn num_variables(&self) -> usize {
        4 * self.nodes() + 1
    }

    fn num_equalities(&self) -> usize {
        3 * self.intervals
    }

    fn num_inequalities(&self) -> usize {
        self.nodes()
    }

    fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.num_variables();
        let mut lower = vec![0.0; n];
        let mut upper = vec![f64::INFINITY; n];
        let w_prime = self.w_prime();

        for k in 0..self.nodes() {
            let pos = self.state_index(k, POSITION);
            lower[pos] = self.start.position;
            upper[pos] = self.finish;

            let speed = self.state_index(k, SPEED);
            lower[speed] = self.config.min_speed_mps;
            upper[speed] = self.config.max_speed_mps;

            let bal = self.state_index(k, BALANCE);
            lower[bal] = self
                .config
                .negative_split
                .map(|split| split.lower_bound(w_prime, k, self.intervals))
                .unwrap_or(0.0)
                .clamp(0.0, w_prime);
            upper[bal] = w_prime;

            lower[self.control_index(k)] = 0.0;
        }

        let start = [self.start.position, self.start.speed, self.start.balance];
        for (component, value) in start.into_iter().enumerate() {
            let i = self.state_index(0, component);
            lower[i] = value;
            upper[i] = value;
        }
        let end = self.state_index(self.intervals, POSITION);
        lower[end] = self.finish;
        upper[end] = self.finish;

        let t = self.time_index();
        lower[t] = self.length() / self.config.max_speed_mps;
        upper[t] = self.time_ceiling();

        (lower, upper)
    }

    fn variable_scale(&self) -> Vec<f64> {
        let mut scale = vec![1.0; self.num_variables()];
        for k in 0..self.nodes() {
            for component in 0..3 {
                scale[self.state_index(k, component)] = self.state_scale[component];
            }
            scale[self.control_index(k)] = self.transcriber.model().athlete().cp;
        }
        scale[self.time_index()] = self.time_ref;
        scale
    }

    fn objective(&self, z: &[f64]) -> f64 {
        let mut value = z[self.time_index()];
        if self.config.smooth_power {
            value += self.config.smoothing_weight
                * (0..self.intervals)
                    .map(|k| (z[self.control_index(k + 1)] - z[self.control_index(k)]).powi(2))
                    .sum::<f64>();
        }
        value / self.time_ref
    }

    fn objective_gradient(&self, z: &[f64], grad: &mut [f64]) {
        grad.iter_mut().for_each(|g| *g = 0.0);
        grad[self.time_index()] = 1.0 / self.time_ref;
        if self.config.smooth_power {
            let w = 2.0 * self.config.smoothing_weight / self.time_ref;
            for k in 0..self.intervals {
                let diff = z[self.control_index(k + 1)] - z[self.control_index(k)];
                grad[self.control_index(k + 1)] += w * diff;
                grad[self.control_index(k)] -= w * diff;
            }
        }
    }

    fn equalities(&self, z: &[f64], out: &mut [f64]) {
        let dt = self.step_length(z);
        for k in 0..self.intervals {
            let x = self.state_at(z, k);
            let next = self.state_at(z, k + 1);
            let defect = self.transcriber.defect(&x, z[self.control_index(k)], &next, dt);
            for component in 0..3 {
                out[3 * k + component] = defect[component] / self.state_scale[component];
            }
        }
    }

    fn inequalities(&self, z: &[f64], out: &mut [f64]) {
        let athlete = self.transcriber.model().athlete();
        for k in 0..self.nodes() {
            let balance = z[self.state_index(k, BALANCE)];
            out[k] = (z[self.control_index(k)] - athlete.max_power(balance)) / athlete.cp;
        }
    }

    fn equality_jacobian(&self, z: &[f64]) -> Vec<Triplet> {
        let dt = self.step_length(z);
        let n = self.intervals as f64;
        let t = self.time_index();
        let mut entries = Vec::with_capacity(18 * self.intervals);
        for k in 0..self.intervals {
            let x = self.state_at(z, k);
            let u = self.control_index(k);
            let sens = self.transcriber.step_with_sensitivity(&x, z[u], dt);
            for row in 0..3 {
                let r = 3 * k + row;
                let s = self.state_scale[row];
                entries.push((r, self.state_index(k + 1, row), 1.0 / s));
                for col in 0..3 {
                    entries.push((r, self.state_index(k, col), -sens.d_state[(row, col)] / s));
                }
                entries.push((r, u, -sens.d_control[row] / s));
                entries.push((r, t, -sens.d_dt[row] / (n * s)));
            }
        }
        entries
    }

    fn inequality_jacobian(&self, z: &[f64]) -> Vec<Triplet> {
        let athlete = self.transcriber.model().athlete();
        let mut entries = Vec::with_capacity(2 * self.nodes());
        for k in 0..self.nodes() {
            let bal = self.state_index(k, BALANCE);
            let slope = athlete.power_bound.max_power_slope(z[bal], athlete.cp);
            entries.push((k, self.control_index(k), 1.0 / athlete.cp));
            entries.push((k, bal, -slope / athlete.cp));
        }
        entries
    }

    fn lagrangian_hessian(&self, z: &[f64], eq_weights: &[f64], ineq_weights: &[f64]) -> Vec<Triplet> {
        let mut entries = Vec::with_capacity(18 * self.intervals);
        if self.config.smooth_power {
            let w = 2.0 * self.config.smoothing_weight / self.time_ref;
            for k in 0..self.intervals {
                let (a, b) = (self.control_index(k), self.control_index(k + 1));
                entries.extend([(a, a, w), (b, b, w), (b, a, -w)]);
            }
        }

        // Defects are `x[k+1] - g(x[k], u[k], T/N)`, so their curvature is
        // that of `-g`, with the chain rule through `dt = T/N`.
        let dt = self.step_length(z);
        let n = self.intervals as f64;
        let factor = [1.0, 1.0, 1.0, 1.0, 1.0 / n];
        for k in 0..self.intervals {
            let weights = Vector3::from_fn(|r, _| eq_weights[3 * k + r] / self.state_scale[r]);
            if weights.iter().all(|w| *w == 0.0) {
                continue;
            }
            let block = self.step_curvature(z, k, &weights, dt);
            let index = [
                self.state_index(k, POSITION),
                self.state_index(k, SPEED),
                self.state_index(k, BALANCE),
                self.control_index(k),
                self.time_index(),
            ];
            for i in 0..5 {
                for j in 0..=i {
                    let value = -block[(i, j)] * factor[i] * factor[j];
                    if value != 0.0 {
                        entries.push((index[i].max(index[j]), index[i].min(index[j]), value));
                    }
                }
            }
        }

        let athlete = self.transcriber.model().athlete();
        for (k, w) in ineq_weights.iter().enumerate().filter(|(_, w)| **w != 0.0) {
            let bal = self.state_index(k, BALANCE);
            let curvature = athlete.power_bound.max_power_curvature(z[bal], athlete.cp);
            if curvature != 0.0 {
                entries.push((bal, bal, -w * curvature / athlete.cp));
            }
        }
        entries
    }
}

/// Builds and solves the pacing NLP for one route/athlete/config triple.
pub struct ProblemAssembler<'a> {
    route: &'a RouteProfile,
    athlete: &'a AthleteParameters,
    config: &'a ProblemConfig,
}

impl<'a> ProblemAssembler<'a> {
    pub fn new(
        route: &'a RouteProfile,
        athlete: &'a AthleteParameters,
        config: &'a ProblemConfig,
    ) -> Self {
        Self {
            route,
            athlete,
            config,
        }
    }

    pub fn transcriber(&self) -> Transcriber<'a> {
        let model = DynamicsModel::new(self.route, self.athlete, self.config.w_bal_model);
        Transcriber::new(model, self.config.integration_method)
    }

    /// Forward-simulated initial trajectory using the same dynamics and
    /// integration rule as the NLP.
    pub fn warm_start(&self, start: State, config: &WarmStartConfig) -> Result<WarmStart> {
        self.validate_start(start)?;
        WarmStartSimulator::new(self.transcriber(), config).run(start)
    }

    fn validate_start(&self, start: State) -> Result<()> {
        self.athlete.validate()?;
        let cfg = self.config;
        if !(cfg.min_speed_mps > 0.0 && cfg.max_speed_mps > cfg.min_speed_mps) {
            return Err(PacingError::InvalidParameter(format!(
                "speed range [{}, {}] must be positive and non-empty",
                cfg.min_speed_mps, cfg.max_speed_mps
            )));
        }
        if start.position < self.route.start() || start.position >= self.route.finish() {
            return Err(PacingError::OutOfRange {
                x: start.position,
                lo: self.route.start(),
                hi: self.route.finish(),
            });
        }
        if start.speed < cfg.min_speed_mps || start.speed > cfg.max_speed_mps {
            return Err(PacingError::InvalidParameter(format!(
                "start speed {:.2} m/s outside admissible range [{}, {}]",
                start.speed, cfg.min_speed_mps, cfg.max_speed_mps
            )));
        }
        if start.balance < 0.0 || start.balance > self.athlete.w_prime {
            return Err(PacingError::InvalidParameter(format!(
                "start balance {:.0} J outside [0, {:.0}]",
                start.balance, self.athlete.w_prime
            )));
        }
        Ok(())
    }

    pub fn assemble(&self, start: State, warm: &WarmStart) -> Result<PacingProblem<'a>> {
        self.validate_start(start)?;
        let intervals = warm.intervals();
        if intervals == 0 || warm.power.len() != warm.states.len() {
            return Err(PacingError::InvalidParameter(format!(
                "warm start has {} states and {} controls; need at least 2 matching nodes",
                warm.states.len(),
                warm.power.len()
            )));
        }

        let finish = self.route.finish();
        Ok(PacingProblem {
            transcriber: self.transcriber(),
            config: self.config,
            start,
            finish,
            intervals,
            time_ref: warm.total_time().max(1.0),
            state_scale: [finish.abs().max(1.0), SPEED_SCALE, self.athlete.w_prime],
        })
    }

    pub fn solve(
        &self,
        start: State,
        warm: &WarmStart,
        solver: &dyn NlpSolver,
    ) -> Result<PacingPlan> {
        let problem = self.assemble(start, warm)?;
        let guess = problem.initial_guess(warm);
        tracing::info!(
            intervals = problem.intervals(),
            scheme = %self.config.integration_method,
            time_guess_s = warm.total_time(),
            "solving pacing problem"
        );

        let solution = solver
            .solve(&problem, &guess, &self.config.solver)
            .map_err(|failure| {
                tracing::warn!(%failure, "pacing solve failed");
                PacingError::Solver(failure)
            })?;
        tracing::info!(
            iterations = solution.iterations,
            wall_time_s = solution.wall_time_s,
            finish_time_s = solution.variables[problem.time_index()],
            "pacing problem solved"
        );
        Ok(problem.extract_plan(&solution, warm))
    }

    /// Warm start followed by the NLP solve.
    pub fn plan(
        &self,
        start: State,
        warm_config: &WarmStartConfig,
        solver: &dyn NlpSolver,
    ) -> Result<PacingPlan> {
        let warm = self.warm_start(start, warm_config)?;
        self.solve(start, &warm, solver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteData;
    use crate::solver::PassThroughSolver;

    fn rolling_profile() -> RouteProfile {
        let distance: Vec<f64> = (0..=400).map(|i| i as f64 * 5.0).collect();
        let elevation = distance.iter().map(|d| 8.0 * (d / 250.0).sin()).collect();
        RouteProfile::new(&RouteData {
            friction: vec![0.004; distance.len()],
            distance,
            elevation,
        })
        .unwrap()
    }

    fn fresh_start(athlete: &AthleteParameters) -> State {
        State::new(0.0, 1.0, athlete.w_prime)
    }

    #[test]
    fn test_warm_start_satisfies_defects_of_same_scheme() {
        let route = rolling_profile();
        let athlete = AthleteParameters::default();
        for scheme in IntegrationScheme::ALL {
            let config = ProblemConfig {
                integration_method: scheme,
                ..ProblemConfig::default()
            };
            let assembler = ProblemAssembler::new(&route, &athlete, &config);
            let start = fresh_start(&athlete);
            let warm = assembler.warm_start(start, &WarmStartConfig::default()).unwrap();
            let problem = assembler.assemble(start, &warm).unwrap();
            let z = problem.initial_guess(&warm);

            let mut defects = vec![0.0; problem.num_equalities()];
            problem.equalities(&z, &mut defects);
            let worst = defects.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            assert!(worst < 1e-9, "{} defect {}", scheme, worst);
        }
    }

    #[test]
    fn test_constraint_gradients_match_finite_differences() {
        let route = rolling_profile();
        let athlete = AthleteParameters {
            power_bound: crate::power_bound::PowerBoundModel::neuromuscular(0.03),
            ..AthleteParameters::default()
        };
        let config = ProblemConfig {
            integration_method: IntegrationScheme::Midpoint,
            ..ProblemConfig::default()
        };
        let assembler = ProblemAssembler::new(&route, &athlete, &config);
        let start = fresh_start(&athlete);
        let warm = assembler.warm_start(start, &WarmStartConfig::default()).unwrap();
        let problem = assembler.assemble(start, &warm).unwrap();

        let mut z = problem.initial_guess(&warm);
        // Perturb away from the exactly-feasible warm start.
        for (i, v) in z.iter_mut().enumerate() {
            *v *= 1.0 + 1e-3 * ((i % 7) as f64 - 3.0);
        }

        let m_eq = problem.num_equalities();
        let m_in = problem.num_inequalities();
        let eq_weights: Vec<f64> = (0..m_eq).map(|i| ((i % 5) as f64 - 2.0) * 0.3).collect();
        let in_weights: Vec<f64> = (0..m_in).map(|i| ((i % 3) as f64) * 0.5).collect();

        let mut analytic = vec![0.0; z.len()];
        for (row, col, v) in problem.equality_jacobian(&z) {
            analytic[col] += v * eq_weights[row];
        }
        for (row, col, v) in problem.inequality_jacobian(&z) {
            analytic[col] += v * in_weights[row];
        }

        let merit = |z: &[f64]| {
            let mut c = vec![0.0; m_eq];
            let mut h = vec![0.0; m_in];
            problem.equalities(z, &mut c);
            problem.inequalities(z, &mut h);
            c.iter().zip(&eq_weights).map(|(a, b)| a * b).sum::<f64>()
                + h.iter().zip(&in_weights).map(|(a, b)| a * b).sum::<f64>()
        };

        let scale = problem.variable_scale();
        let checked = [
            problem.state_index(1, POSITION),
            problem.state_index(4, SPEED),
            problem.state_index(17, SPEED),
            problem.state_index(40, BALANCE),
            problem.control_index(9),
            problem.time_index(),
        ];
        for &i in &checked {
            let h = 1e-6 * scale[i];
            let mut plus = z.clone();
            let mut minus = z.clone();
            plus[i] += h;
            minus[i] -= h;
            let fd = (merit(&plus) - merit(&minus)) / (2.0 * h);
            let tol = 1e-4 * fd.abs().max(1.0 / scale[i]);
            assert!(
                (analytic[i] - fd).abs() < tol,
                "variable {}: analytic {} vs fd {}",
                i,
                analytic[i],
                fd
            );
        }
    }

    #[test]
    fn test_lagrangian_hessian_matches_finite_differences() {
        let route = rolling_profile();
        let athlete = AthleteParameters {
            power_bound: crate::power_bound::PowerBoundModel::neuromuscular(0.03),
            ..AthleteParameters::default()
        };
        for scheme in [IntegrationScheme::Euler, IntegrationScheme::Rk4] {
            let config = ProblemConfig {
                integration_method: scheme,
                ..ProblemConfig::default()
            };
            let assembler = ProblemAssembler::new(&route, &athlete, &config);
            let start = fresh_start(&athlete);
            let warm = assembler.warm_start(start, &WarmStartConfig::default()).unwrap();
            let problem = assembler.assemble(start, &warm).unwrap();

            let mut z = problem.initial_guess(&warm);
            for (i, v) in z.iter_mut().enumerate() {
                *v *= 1.0 + 1e-3 * ((i % 7) as f64 - 3.0);
            }
            // Slopes are held constant past the route ends; stay off the kinks.
            for k in 0..=problem.intervals() {
                let i = problem.state_index(k, POSITION);
                z[i] = z[i].clamp(1.0, route.finish() - 1.0);
            }
            let m_eq = problem.num_equalities();
            let m_in = problem.num_inequalities();
            let eq_weights: Vec<f64> = (0..m_eq).map(|i| ((i % 5) as f64 - 2.0) * 0.3).collect();
            let in_weights: Vec<f64> = (0..m_in).map(|i| ((i % 3) as f64) * 0.5).collect();

            let lagrangian_gradient = |z: &[f64]| {
                let mut grad = vec![0.0; z.len()];
                problem.objective_gradient(z, &mut grad);
                for (row, col, v) in problem.equality_jacobian(z) {
                    grad[col] += v * eq_weights[row];
                }
                for (row, col, v) in problem.inequality_jacobian(z) {
                    grad[col] += v * in_weights[row];
                }
                grad
            };

            // Hessian-vector product against a difference of gradients
            // along a direction that moves every variable class.
            let scale = problem.variable_scale();
            let direction: Vec<f64> = scale
                .iter()
                .enumerate()
                .map(|(i, s)| s * 0.1 * (((i * 37) % 11) as f64 / 11.0 - 0.5))
                .collect();
            let eps = 1e-4;
            let shifted = |sign: f64| -> Vec<f64> {
                z.iter().zip(&direction).map(|(a, d)| a + sign * eps * d).collect()
            };
            let plus = lagrangian_gradient(&shifted(1.0));
            let minus = lagrangian_gradient(&shifted(-1.0));
            let fd: Vec<f64> = plus.iter().zip(&minus).map(|(p, m)| (p - m) / (2.0 * eps)).collect();

            let mut product = vec![0.0; z.len()];
            for (row, col, v) in problem.lagrangian_hessian(&z, &eq_weights, &in_weights) {
                assert!(row >= col);
                product[row] += v * direction[col];
                if row != col {
                    product[col] += v * direction[row];
                }
            }

            let magnitude = fd.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            for i in 0..z.len() {
                assert!(
                    (product[i] - fd[i]).abs() < 1e-4 * magnitude,
                    "{} variable {}: analytic {} vs fd {}",
                    scheme,
                    i,
                    product[i],
                    fd[i]
                );
            }
        }
    }

    #[test]
    fn test_objective_gradient_matches_finite_differences() {
        let route = rolling_profile();
        let athlete = AthleteParameters::default();
        let config = ProblemConfig::default();
        let assembler = ProblemAssembler::new(&route, &athlete, &config);
        let start = fresh_start(&athlete);
        let warm = assembler.warm_start(start, &WarmStartConfig::default()).unwrap();
        let problem = assembler.assemble(start, &warm).unwrap();
        let z = problem.initial_guess(&warm);

        let mut grad = vec![0.0; z.len()];
        problem.objective_gradient(&z, &mut grad);
        for i in [problem.control_index(3), problem.time_index()] {
            let h = 1e-3;
            let mut plus = z.clone();
            let mut minus = z.clone();
            plus[i] += h;
            minus[i] -= h;
            let fd = (problem.objective(&plus) - problem.objective(&minus)) / (2.0 * h);
            assert!((grad[i] - fd).abs() < 1e-8);
        }
    }

    #[test]
    fn test_bounds_pin_boundary_conditions_and_corridor() {
        let route = rolling_profile();
        let athlete = AthleteParameters::default();
        let config = ProblemConfig {
            negative_split: Some(NegativeSplit::from_percent(80.0, 20.0).unwrap()),
            ..ProblemConfig::default()
        };
        let assembler = ProblemAssembler::new(&route, &athlete, &config);
        let start = fresh_start(&athlete);
        let warm = assembler.warm_start(start, &WarmStartConfig::default()).unwrap();
        let problem = assembler.assemble(start, &warm).unwrap();
        let (lower, upper) = problem.bounds();
        let n = problem.intervals();

        assert_eq!(lower[0], 0.0);
        assert_eq!(upper[0], 0.0);
        assert_eq!(lower[1], 1.0);
        assert_eq!(upper[2], athlete.w_prime);
        assert_eq!(lower[2], athlete.w_prime);
        let end = problem.state_index(n, POSITION);
        assert_eq!(lower[end], route.finish());
        assert_eq!(upper[end], route.finish());

        let mid = n / 2;
        let expected = NegativeSplit::from_percent(80.0, 20.0)
            .unwrap()
            .lower_bound(athlete.w_prime, mid, n);
        assert!((lower[problem.state_index(mid, BALANCE)] - expected).abs() < 1e-9);
        let last_bal = problem.state_index(n, BALANCE);
        assert!((lower[last_bal] - 0.2 * athlete.w_prime).abs() < 1e-6);
        assert!(upper[problem.time_index()] >= route.length() / 1000.0 * 180.0);
    }

    #[test]
    fn test_pass_through_solve_reports_warm_start_as_plan() {
        let route = rolling_profile();
        let athlete = AthleteParameters::default();
        let config = ProblemConfig::default();
        let assembler = ProblemAssembler::new(&route, &athlete, &config);
        let start = fresh_start(&athlete);
        let plan = assembler
            .plan(start, &WarmStartConfig::default(), &PassThroughSolver)
            .unwrap();

        let n = plan.len();
        assert_eq!(plan.time.len(), n);
        assert_eq!(plan.distance.len(), n);
        assert_eq!(plan.w_bal.len(), n);
        assert_eq!(plan.distance[0], 0.0);
        assert_eq!(plan.w_bal[0], athlete.w_prime);
        assert_eq!(plan.diagnostics.intervals, n - 1);
        assert!((plan.time[n - 1] - plan.finish_time_s).abs() < 1e-9);
    }

    #[test]
    fn test_start_speed_outside_range_rejected() {
        let route = rolling_profile();
        let athlete = AthleteParameters::default();
        let config = ProblemConfig::default();
        let assembler = ProblemAssembler::new(&route, &athlete, &config);
        let err = assembler
            .warm_start(State::new(0.0, 0.2, athlete.w_prime), &WarmStartConfig::default())
            .unwrap_err();
        assert!(matches!(err, PacingError::InvalidParameter(_)));
    }

    #[test]
    fn test_negative_split_rejects_bad_percent() {
        assert!(NegativeSplit::from_percent(120.0, 20.0).is_err());
        let split = NegativeSplit::from_percent(80.0, 20.0).unwrap();
        assert!((split.lower_bound(1000.0, 0, 10) - 800.0).abs() < 1e-9);
        assert!((split.lower_bound(1000.0, 10, 10) - 200.0).abs() < 1e-9);
    }
}
