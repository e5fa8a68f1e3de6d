//! Offline pacing solve for one route of a route file.
//!
//! Usage:
//!   cargo run -p pacing-cli --bin solve_route -- --route "Hilly Route" --cp 265 --w-prime 26630
//!
//! With `--from-distance`, `--speed` and `--w-bal` the solve is a
//! reoptimization of the remaining route from that athlete state.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pacing_core::{
    replan, AthleteState, AugmentedLagrangianSolver, IntegrationScheme, NlpSolver,
    PassThroughSolver, PowerBoundKind, ProblemAssembler, ReoptimizationRequest, RouteLibrary,
    RouteProfile, SolveOptions, SolveRequest, SpeedUnit, State, WarmStartConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    Euler,
    Midpoint,
    Rk4,
}

impl From<Method> for IntegrationScheme {
    fn from(method: Method) -> Self {
        match method {
            Method::Euler => IntegrationScheme::Euler,
            Method::Midpoint => IntegrationScheme::Midpoint,
            Method::Rk4 => IntegrationScheme::Rk4,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bound {
    Linear,
    Neuromuscular,
}

/// Solve a time-optimal pacing plan
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Route file (JSON map of route name -> samples)
    #[arg(long, default_value = "routes.json")]
    routes: PathBuf,

    /// Route name or slug
    #[arg(long)]
    route: String,

    #[arg(long, default_value_t = 1)]
    laps: usize,

    /// Rider weight (kg)
    #[arg(long, default_value_t = 78.0)]
    weight: f64,

    /// Critical power (W)
    #[arg(long, default_value_t = 265.0)]
    cp: f64,

    /// W' (J)
    #[arg(long, default_value_t = 26630.0)]
    w_prime: f64,

    /// Power ceiling at full W' (W)
    #[arg(long, default_value_t = 1000.0)]
    max_power: f64,

    #[arg(long, value_enum, default_value = "rk4")]
    method: Method,

    #[arg(long, value_enum, default_value = "linear")]
    power_bound: Bound,

    /// Enforce a W' balance corridor from --bound-start to --bound-end percent
    #[arg(long)]
    negative_split: bool,

    #[arg(long, default_value_t = 80.0)]
    bound_start: f64,

    #[arg(long, default_value_t = 20.0)]
    bound_end: f64,

    /// Reoptimize from this distance (m) instead of the route start
    #[arg(long, requires_all = ["speed", "w_bal"])]
    from_distance: Option<f64>,

    /// Current speed (m/s) for reoptimization
    #[arg(long)]
    speed: Option<f64>,

    /// Current W' balance (J) for reoptimization
    #[arg(long)]
    w_bal: Option<f64>,

    /// Skip the NLP and emit the warm start trajectory
    #[arg(long)]
    warm_start_only: bool,

    #[arg(long, default_value_t = 20_000)]
    max_iter: usize,

    /// Write the plan as JSON here
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn solve_request(&self) -> SolveRequest {
        SolveRequest {
            route: self.route.clone(),
            num_laps: self.laps,
            weight: self.weight,
            cp: self.cp,
            w_prime: self.w_prime,
            max_power: self.max_power,
            integration_method: self.method.into(),
            negative_split: self.negative_split,
            bound_start: self.bound_start,
            bound_end: self.bound_end,
            power_bound: match self.power_bound {
                Bound::Linear => PowerBoundKind::Linear,
                Bound::Neuromuscular => PowerBoundKind::Neuromuscular,
            },
            w_bal_model: Default::default(),
        }
    }

    fn reoptimization(&self) -> Option<ReoptimizationRequest> {
        let (distance, speed, w_bal) = (self.from_distance?, self.speed?, self.w_bal?);
        Some(ReoptimizationRequest {
            solve: self.solve_request(),
            state: AthleteState {
                distance,
                speed,
                speed_unit: SpeedUnit::Mps,
                w_bal,
            },
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pacing_core=info".parse()?))
        .init();

    let args = Args::parse();
    let library = RouteLibrary::load(&args.routes)
        .with_context(|| format!("loading {}", args.routes.display()))?;

    let solver: Box<dyn NlpSolver> = if args.warm_start_only {
        Box::new(PassThroughSolver)
    } else {
        Box::new(AugmentedLagrangianSolver::default())
    };
    let options = SolveOptions {
        max_iterations: args.max_iter,
        ..SolveOptions::default()
    };

    let request = args.solve_request();
    let data = request.route_data(&library)?;
    let route = RouteProfile::new(&data)?;
    let athlete = request.athlete()?;
    let config = request.problem_config(options)?;
    let warm_start = WarmStartConfig::default();

    println!(
        "Route {:?}: {:.0} m over {} lap(s), {} samples",
        args.route,
        route.length(),
        args.laps,
        route.distance().len()
    );

    let plan = match args.reoptimization() {
        Some(reopt) => {
            let sample = reopt.state.to_sample()?;
            println!(
                "Reoptimizing from {:.0} m at {:.1} m/s with W' balance {:.0} J",
                sample.distance_m, sample.speed_mps, sample.w_bal
            );
            replan(&route, &athlete, &config, &warm_start, &sample, solver.as_ref())?
        }
        None => {
            let start = State::new(route.start(), 1.0, athlete.w_prime);
            ProblemAssembler::new(&route, &athlete, &config).plan(start, &warm_start, solver.as_ref())?
        }
    };

    let summary = plan.summary();
    let diag = &plan.diagnostics;
    println!("Finish time:      {:.1} s", summary.finish_time_s);
    println!("Average power:    {:.0} W", summary.avg_power_w);
    println!("Normalized power: {:.0} W", summary.normalized_power_w);
    println!("Min W' balance:   {:.0} J", summary.min_w_bal);
    println!(
        "Solver: {} intervals, {} iterations, {:.2} s ({} / {} model, warm start slope {:.0})",
        diag.intervals, diag.iterations, diag.wall_time_s, diag.integration_method, diag.w_bal_model, diag.warm_start_slope
    );

    if let Some(path) = &args.output {
        let body = serde_json::to_string_pretty(&plan)?;
        std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
        println!("Plan written to {}", path.display());
    }
    Ok(())
}
