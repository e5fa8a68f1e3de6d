pub mod athlete;
pub mod augmented_lagrangian;
pub mod dynamics;
pub mod error;
pub mod interp;
pub mod models;
pub mod plan;
pub mod power_bound;
pub mod problem;
pub mod replan;
pub mod route;
pub mod skyline;
pub mod solver;
pub mod transcription;
pub mod warm_start;

pub use athlete::AthleteParameters;
pub use augmented_lagrangian::AugmentedLagrangianSolver;
pub use dynamics::{BalanceModel, DynamicsModel, State};
pub use error::{PacingError, Result};
pub use models::{
    AthleteState, PowerBoundKind, ReoptimizationRequest, SolveRequest, SpeedUnit, TelemetryEvent,
};
pub use plan::{normalized_power, PacingPlan, PlanDiagnostics, PlanSummary};
pub use power_bound::PowerBoundModel;
pub use problem::{NegativeSplit, PacingProblem, ProblemAssembler, ProblemConfig};
pub use replan::{replan, HoldReason, ReplanDecision, ReplanPolicy, TelemetrySample};
pub use route::{RouteData, RouteLibrary, RouteProfile, RouteSlice};
pub use solver::{
    NlpProblem, NlpSolution, NlpSolver, PassThroughSolver, SolveOptions, SolverFailure,
    SolverStatus, Triplet,
};
pub use transcription::{IntegrationScheme, Transcriber};
pub use warm_start::{WarmStart, WarmStartConfig, WarmStartSimulator};
