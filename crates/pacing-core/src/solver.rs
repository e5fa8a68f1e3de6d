//! Contract between the transcribed problem and whatever NLP solver runs it.
//!
//! Problems are posed as
//!
//! ```text
//! minimize    f(z)
//! subject to  c(z) = 0,  h(z) <= 0,  lower <= z <= upper
//! ```
//!
//! Derivatives are handed over as sparse triplets so a solver can work on
//! thousands of variables without materializing dense matrices.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sparse matrix entry `(row, col, value)`. Repeated positions are summed.
pub type Triplet = (usize, usize, f64);

pub trait NlpProblem: Sync {
    fn num_variables(&self) -> usize;
    fn num_equalities(&self) -> usize;
    fn num_inequalities(&self) -> usize;

    /// Variable bounds `(lower, upper)`; equal entries pin a variable.
    fn bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Typical magnitude of each variable. Solvers may work in `z / scale`.
    fn variable_scale(&self) -> Vec<f64> {
        vec![1.0; self.num_variables()]
    }

    fn objective(&self, z: &[f64]) -> f64;
    fn objective_gradient(&self, z: &[f64], grad: &mut [f64]);

    fn equalities(&self, z: &[f64], out: &mut [f64]);
    fn inequalities(&self, z: &[f64], out: &mut [f64]);

    /// Nonzeros of `J_c(z)`, rows indexed by equality.
    fn equality_jacobian(&self, z: &[f64]) -> Vec<Triplet>;
    /// Nonzeros of `J_h(z)`, rows indexed by inequality.
    fn inequality_jacobian(&self, z: &[f64]) -> Vec<Triplet>;

    /// Lower triangle (`row >= col`) of
    /// `∇²f + Σ eq_weights[i] ∇²c_i + Σ ineq_weights[j] ∇²h_j`.
    fn lagrangian_hessian(&self, z: &[f64], eq_weights: &[f64], ineq_weights: &[f64]) -> Vec<Triplet>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    pub max_iterations: usize,
    /// Max allowed constraint violation (scaled units).
    pub feasibility_tolerance: f64,
    /// Max allowed projected-gradient norm (scaled units).
    pub optimality_tolerance: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            feasibility_tolerance: 1e-6,
            optimality_tolerance: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    IterationLimit,
    Infeasible,
    NonFinite,
    Stalled,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SolverStatus::Converged => "converged",
            SolverStatus::IterationLimit => "iteration limit reached",
            SolverStatus::Infeasible => "locally infeasible",
            SolverStatus::NonFinite => "non-finite evaluation",
            SolverStatus::Stalled => "line search stalled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct NlpSolution {
    pub variables: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub wall_time_s: f64,
    pub constraint_violation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverFailure {
    pub status: SolverStatus,
    pub iterations: usize,
    pub wall_time_s: f64,
    pub constraint_violation: f64,
}

impl fmt::Display for SolverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations ({:.2}s, violation {:.2e})",
            self.status, self.iterations, self.wall_time_s, self.constraint_violation
        )
    }
}

impl std::error::Error for SolverFailure {}

pub trait NlpSolver: Send + Sync {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        initial_guess: &[f64],
        options: &SolveOptions,
    ) -> Result<NlpSolution, SolverFailure>;
}

/// Hands the initial guess back untouched. Useful for inspecting warm
/// starts, and for exercising the pipeline without an optimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughSolver;

impl NlpSolver for PassThroughSolver {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        initial_guess: &[f64],
        _options: &SolveOptions,
    ) -> Result<NlpSolution, SolverFailure> {
        if initial_guess.len() != problem.num_variables() {
            return Err(SolverFailure {
                status: SolverStatus::NonFinite,
                iterations: 0,
                wall_time_s: 0.0,
                constraint_violation: f64::INFINITY,
            });
        }
        let mut eq = vec![0.0; problem.num_equalities()];
        let mut ineq = vec![0.0; problem.num_inequalities()];
        problem.equalities(initial_guess, &mut eq);
        problem.inequalities(initial_guess, &mut ineq);
        let violation = eq
            .iter()
            .map(|c| c.abs())
            .chain(ineq.iter().map(|h| h.max(0.0)))
            .fold(0.0, f64::max);

        Ok(NlpSolution {
            variables: initial_guess.to_vec(),
            objective: problem.objective(initial_guess),
            iterations: 0,
            wall_time_s: 0.0,
            constraint_violation: violation,
        })
    }
}
