//! Error types for the pacing engine.

use thiserror::Error;

use crate::solver::SolverFailure;

#[derive(Error, Debug, Clone)]
pub enum PacingError {
    /// Route samples that cannot be turned into a usable profile.
    #[error("invalid route data: {0}")]
    RouteData(String),
    #[error("unknown route: {0}")]
    UnknownRoute(String),
    #[error("distance {x:.2} outside route range [{lo:.2}, {hi:.2}]")]
    OutOfRange { x: f64, lo: f64, hi: f64 },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// No policy slope in the search bracket keeps the reserve above the floor.
    #[error("no feasible warm start: {reason}")]
    InfeasibleWarmStart { reason: String, iterations: usize },
    #[error("solver failed: {0}")]
    Solver(SolverFailure),
}

impl From<SolverFailure> for PacingError {
    fn from(failure: SolverFailure) -> Self {
        PacingError::Solver(failure)
    }
}

pub type Result<T> = std::result::Result<T, PacingError>;
