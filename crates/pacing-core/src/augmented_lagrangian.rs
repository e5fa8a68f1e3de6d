//! Built-in NLP solver: bound-constrained augmented Lagrangian with a
//! projected Newton inner loop.
//!
//! Equality and inequality constraints are folded into the merit function;
//! variable bounds are kept exact by projection. Each inner step solves the
//! merit Hessian restricted to the free variables with a skyline `L D Lᵀ`,
//! so a transcription whose Hessian is banded costs linear time per step
//! however long the chain of defects gets. Multipliers take the first-order
//! update after every inner solve; the penalty grows only while the
//! violation stops shrinking.

use std::time::Instant;

use crate::skyline::SkylineMatrix;
use crate::solver::{
    NlpProblem, NlpSolution, NlpSolver, SolveOptions, SolverFailure, SolverStatus, Triplet,
};

const ARMIJO_C1: f64 = 1e-4;
const MAX_LINE_SEARCH_TRIALS: usize = 40;
const MAX_REGULARIZATION_TRIALS: usize = 40;
const MIN_PIVOT: f64 = 1e-14;
const MULTIPLIER_CAP: f64 = 1e12;
/// Variables closer than this to a bound, with the gradient pushing
/// outward, are held for the Newton step.
const ACTIVE_BAND: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct AugmentedLagrangianSolver {
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub max_penalty: f64,
    pub max_outer_iterations: usize,
    /// The penalty grows when an outer step keeps more than this share of
    /// the previous violation.
    pub required_reduction: f64,
}

impl Default for AugmentedLagrangianSolver {
    fn default() -> Self {
        Self {
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e10,
            max_outer_iterations: 60,
            required_reduction: 0.25,
        }
    }
}

/// Merit function in scaled variables `y = z / scale`.
struct Merit<'a> {
    problem: &'a dyn NlpProblem,
    scale: &'a [f64],
    lambda: &'a [f64],
    mu: &'a [f64],
    penalty: f64,
}

/// Merit value with the first-order data a Newton step needs.
struct MeritPoint {
    value: f64,
    gradient: Vec<f64>,
    z: Vec<f64>,
    eq_weights: Vec<f64>,
    ineq_weights: Vec<f64>,
    eq_jacobian: Vec<Triplet>,
    ineq_jacobian: Vec<Triplet>,
}

impl MeritPoint {
    fn is_finite(&self) -> bool {
        self.value.is_finite() && self.gradient.iter().all(|g| g.is_finite())
    }
}

impl Merit<'_> {
    fn unscale(&self, y: &[f64]) -> Vec<f64> {
        y.iter().zip(self.scale).map(|(v, s)| v * s).collect()
    }

    /// Merit value plus the effective multipliers `λ + ρc` and `(μ + ρh)₊`.
    fn weighted(&self, z: &[f64]) -> (f64, Vec<f64>, Vec<f64>) {
        let rho = self.penalty;
        let mut value = self.problem.objective(z);

        let mut c = vec![0.0; self.problem.num_equalities()];
        self.problem.equalities(z, &mut c);
        let mut eq_weights = Vec::with_capacity(c.len());
        for (ci, li) in c.iter().zip(self.lambda) {
            value += li * ci + 0.5 * rho * ci * ci;
            eq_weights.push(li + rho * ci);
        }

        let mut h = vec![0.0; self.problem.num_inequalities()];
        self.problem.inequalities(z, &mut h);
        let mut ineq_weights = Vec::with_capacity(h.len());
        for (hi, mi) in h.iter().zip(self.mu) {
            let shifted = mi + rho * hi;
            if shifted > 0.0 {
                value += (shifted * shifted - mi * mi) / (2.0 * rho);
                ineq_weights.push(shifted);
            } else {
                value -= mi * mi / (2.0 * rho);
                ineq_weights.push(0.0);
            }
        }
        (value, eq_weights, ineq_weights)
    }

    fn value(&self, y: &[f64]) -> f64 {
        self.weighted(&self.unscale(y)).0
    }

    fn evaluate(&self, y: &[f64]) -> MeritPoint {
        let z = self.unscale(y);
        let (value, eq_weights, ineq_weights) = self.weighted(&z);

        let mut gradient = vec![0.0; z.len()];
        self.problem.objective_gradient(&z, &mut gradient);
        let eq_jacobian = self.problem.equality_jacobian(&z);
        for &(row, col, v) in &eq_jacobian {
            gradient[col] += v * eq_weights[row];
        }
        let ineq_jacobian = self.problem.inequality_jacobian(&z);
        for &(row, col, v) in &ineq_jacobian {
            gradient[col] += v * ineq_weights[row];
        }
        for (g, s) in gradient.iter_mut().zip(self.scale) {
            *g *= s;
        }

        MeritPoint {
            value,
            gradient,
            z,
            eq_weights,
            ineq_weights,
            eq_jacobian,
            ineq_jacobian,
        }
    }

    /// Lower triangle of the merit Hessian in scaled variables, restricted
    /// to the free variables.
    fn hessian(&self, point: &MeritPoint, free: &[bool]) -> Vec<Triplet> {
        let mut entries =
            self.problem
                .lagrangian_hessian(&point.z, &point.eq_weights, &point.ineq_weights);
        add_gauss_newton(&mut entries, &point.eq_jacobian, |_| self.penalty);
        add_gauss_newton(&mut entries, &point.ineq_jacobian, |row| {
            if point.ineq_weights[row] > 0.0 {
                self.penalty
            } else {
                0.0
            }
        });
        entries.retain(|&(row, col, _)| free[row] && free[col]);
        for entry in entries.iter_mut() {
            entry.2 *= self.scale[entry.0] * self.scale[entry.1];
        }
        entries
    }
}

/// Append `weight(row) * J_rowᵀ J_row` (lower triangle) for each Jacobian row.
fn add_gauss_newton(entries: &mut Vec<Triplet>, jacobian: &[Triplet], weight: impl Fn(usize) -> f64) {
    let mut sorted = jacobian.to_vec();
    sorted.sort_unstable_by_key(|&(row, col, _)| (row, col));

    let mut start = 0;
    while start < sorted.len() {
        let row = sorted[start].0;
        let len = sorted[start..].iter().take_while(|e| e.0 == row).count();
        let group = &sorted[start..start + len];
        let w = weight(row);
        if w != 0.0 {
            for a in group {
                for b in group.iter().filter(|b| b.1 <= a.1) {
                    entries.push((a.1, b.1, w * a.2 * b.2));
                }
            }
        }
        start += len;
    }
}

fn projected_gradient_norm(y: &[f64], g: &[f64], lo: &[f64], hi: &[f64]) -> f64 {
    y.iter()
        .zip(g)
        .zip(lo.iter().zip(hi))
        .map(|((yi, gi), (l, u))| ((yi - gi).clamp(*l, *u) - yi).abs())
        .fold(0.0, f64::max)
}

/// Solve `(H + δI) d = -g` over the free variables, raising `δ` until the
/// factorization succeeds. Held variables fall back to steepest descent
/// and are cut back by the projection.
fn newton_direction(
    n: usize,
    entries: &[Triplet],
    gradient: &[f64],
    free: &[bool],
    fixed: &[bool],
    regularization: &mut f64,
) -> Option<Vec<f64>> {
    let mut matrix = SkylineMatrix::from_lower_triplets(n, entries);
    for i in (0..n).filter(|&i| !free[i]) {
        matrix.add(i, i, 1.0);
    }
    let rhs: Vec<f64> = (0..n)
        .map(|i| if free[i] { -gradient[i] } else { 0.0 })
        .collect();

    let mut delta = if *regularization > 0.0 {
        (*regularization / 3.0).max(1e-10)
    } else {
        0.0
    };
    for _ in 0..MAX_REGULARIZATION_TRIALS {
        let mut shifted = matrix.clone();
        if delta > 0.0 {
            for i in (0..n).filter(|&i| free[i]) {
                shifted.add(i, i, delta);
            }
        }
        if let Ok(factor) = shifted.factor(MIN_PIVOT) {
            *regularization = delta;
            let mut direction = factor.solve(&rhs);
            for i in (0..n).filter(|&i| !free[i]) {
                direction[i] = if fixed[i] { 0.0 } else { -gradient[i] };
            }
            return Some(direction);
        }
        delta = if delta == 0.0 { 1e-8 } else { delta * 10.0 };
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerStatus {
    Converged,
    Budget,
    Stalled,
    NonFinite,
}

struct InnerResult {
    status: InnerStatus,
    iterations: usize,
    projected_gradient: f64,
}

impl AugmentedLagrangianSolver {
    #[allow(clippy::too_many_arguments)]
    fn minimize(
        &self,
        merit: &Merit,
        y: &mut Vec<f64>,
        lo: &[f64],
        hi: &[f64],
        budget: usize,
        tolerance: f64,
        regularization: &mut f64,
    ) -> InnerResult {
        let n = y.len();
        let fixed: Vec<bool> = lo.iter().zip(hi).map(|(l, u)| l == u).collect();
        let mut point = merit.evaluate(y);
        if !point.is_finite() {
            return InnerResult {
                status: InnerStatus::NonFinite,
                iterations: 0,
                projected_gradient: f64::INFINITY,
            };
        }
        let mut pg = projected_gradient_norm(y, &point.gradient, lo, hi);
        let mut iterations = 0;

        while iterations < budget {
            if pg <= tolerance {
                break;
            }
            iterations += 1;

            let g = &point.gradient;
            let band = ACTIVE_BAND.min(pg);
            let free: Vec<bool> = (0..n)
                .map(|i| {
                    let held_low = y[i] <= lo[i] + band && g[i] > 0.0;
                    let held_high = y[i] >= hi[i] - band && g[i] < 0.0;
                    !(fixed[i] || held_low || held_high)
                })
                .collect();

            let entries = merit.hessian(&point, &free);
            let Some(direction) = newton_direction(n, &entries, g, &free, &fixed, regularization)
            else {
                return InnerResult {
                    status: InnerStatus::Stalled,
                    iterations,
                    projected_gradient: pg,
                };
            };

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_LINE_SEARCH_TRIALS {
                let candidate: Vec<f64> = y
                    .iter()
                    .zip(&direction)
                    .zip(lo.iter().zip(hi))
                    .map(|((yi, di), (l, u))| (yi + step * di).clamp(*l, *u))
                    .collect();
                let decrease: f64 = candidate
                    .iter()
                    .zip(y.iter())
                    .zip(g)
                    .map(|((c, yi), gi)| gi * (c - yi))
                    .sum();
                if decrease < 0.0 {
                    let value = merit.value(&candidate);
                    if value.is_finite() && value <= point.value + ARMIJO_C1 * decrease {
                        accepted = Some(candidate);
                        break;
                    }
                }
                step *= 0.5;
            }

            let Some(candidate) = accepted else {
                return InnerResult {
                    status: InnerStatus::Stalled,
                    iterations,
                    projected_gradient: pg,
                };
            };
            *y = candidate;
            point = merit.evaluate(y);
            if !point.is_finite() {
                return InnerResult {
                    status: InnerStatus::NonFinite,
                    iterations,
                    projected_gradient: f64::INFINITY,
                };
            }
            pg = projected_gradient_norm(y, &point.gradient, lo, hi);
            tracing::trace!(iterations, merit = point.value, projected_gradient = pg, step, "newton step");
        }

        let status = if pg <= tolerance {
            InnerStatus::Converged
        } else {
            InnerStatus::Budget
        };
        InnerResult {
            status,
            iterations,
            projected_gradient: pg,
        }
    }
}

fn violation(problem: &dyn NlpProblem, z: &[f64]) -> (Vec<f64>, Vec<f64>, f64) {
    let mut c = vec![0.0; problem.num_equalities()];
    let mut h = vec![0.0; problem.num_inequalities()];
    problem.equalities(z, &mut c);
    problem.inequalities(z, &mut h);
    let worst = c
        .iter()
        .map(|v| v.abs())
        .chain(h.iter().map(|v| v.max(0.0)))
        .fold(0.0, f64::max);
    (c, h, worst)
}

impl NlpSolver for AugmentedLagrangianSolver {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        initial_guess: &[f64],
        options: &SolveOptions,
    ) -> Result<NlpSolution, SolverFailure> {
        let started = Instant::now();
        let n = problem.num_variables();
        let fail = |status, iterations, violation: f64| SolverFailure {
            status,
            iterations,
            wall_time_s: started.elapsed().as_secs_f64(),
            constraint_violation: violation,
        };

        if initial_guess.len() != n {
            return Err(fail(SolverStatus::NonFinite, 0, f64::INFINITY));
        }

        let scale: Vec<f64> = problem
            .variable_scale()
            .into_iter()
            .map(|s| if s.is_finite() && s > 0.0 { s } else { 1.0 })
            .collect();
        let (lower, upper) = problem.bounds();
        let lo: Vec<f64> = lower.iter().zip(&scale).map(|(b, s)| b / s).collect();
        let hi: Vec<f64> = upper.iter().zip(&scale).map(|(b, s)| b / s).collect();
        let mut y: Vec<f64> = initial_guess
            .iter()
            .zip(&scale)
            .zip(lo.iter().zip(&hi))
            .map(|((z, s), (l, u))| (z / s).clamp(*l, *u))
            .collect();

        let mut lambda = vec![0.0; problem.num_equalities()];
        let mut mu = vec![0.0; problem.num_inequalities()];
        let mut penalty = self.initial_penalty;
        let mut inner_tolerance = 1e-2_f64.max(options.optimality_tolerance);
        let mut regularization = 0.0;
        let mut previous = f64::INFINITY;
        let mut iterations = 0;
        let mut worst = f64::INFINITY;

        for outer in 0..self.max_outer_iterations {
            let budget = options.max_iterations.saturating_sub(iterations);
            if budget == 0 {
                return Err(fail(SolverStatus::IterationLimit, iterations, worst));
            }

            let merit = Merit {
                problem,
                scale: &scale,
                lambda: &lambda,
                mu: &mu,
                penalty,
            };
            let inner = self.minimize(
                &merit,
                &mut y,
                &lo,
                &hi,
                budget,
                inner_tolerance,
                &mut regularization,
            );
            iterations += inner.iterations;
            if inner.status == InnerStatus::NonFinite {
                return Err(fail(SolverStatus::NonFinite, iterations, worst));
            }

            let z = merit.unscale(&y);
            let (c, h, current) = violation(problem, &z);
            worst = current;
            let complementarity = h
                .iter()
                .zip(&mu)
                .map(|(hj, mj)| (-hj).min(mj / penalty).abs())
                .fold(0.0, f64::max);
            let progress = worst.max(complementarity);
            tracing::debug!(
                outer,
                iterations,
                penalty,
                violation = worst,
                projected_gradient = inner.projected_gradient,
                status = ?inner.status,
                "augmented lagrangian outer step"
            );

            if worst <= options.feasibility_tolerance
                && inner.projected_gradient <= options.optimality_tolerance
            {
                return Ok(NlpSolution {
                    objective: problem.objective(&z),
                    variables: z,
                    iterations,
                    wall_time_s: started.elapsed().as_secs_f64(),
                    constraint_violation: worst,
                });
            }
            match inner.status {
                InnerStatus::Budget => {
                    return Err(fail(SolverStatus::IterationLimit, iterations, worst));
                }
                InnerStatus::Stalled
                    if penalty >= self.max_penalty && worst > options.feasibility_tolerance =>
                {
                    return Err(fail(SolverStatus::Infeasible, iterations, worst));
                }
                _ => {}
            }

            for (l, ci) in lambda.iter_mut().zip(&c) {
                *l = (*l + penalty * ci).clamp(-MULTIPLIER_CAP, MULTIPLIER_CAP);
            }
            for (m, hj) in mu.iter_mut().zip(&h) {
                *m = (*m + penalty * hj).clamp(0.0, MULTIPLIER_CAP);
            }
            if progress > self.required_reduction * previous {
                penalty = (penalty * self.penalty_growth).min(self.max_penalty);
            }
            previous = progress;
            inner_tolerance = (inner_tolerance * 0.1).max(options.optimality_tolerance);
        }

        let status = if worst <= options.feasibility_tolerance {
            SolverStatus::Stalled
        } else {
            SolverStatus::Infeasible
        };
        Err(fail(status, iterations, worst))
    }
}
