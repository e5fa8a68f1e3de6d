//! Replay a plan against a running pacing server as live telemetry.
//!
//! Creates a plan session (or attaches to `--session`), then streams the
//! plan's own nodes back as telemetry. `--drift-j-per-km` makes the rider
//! burn W' faster than planned so the server's replan trigger fires.
//!
//! Usage:
//!   cargo run -p pacing-cli --bin replay_telemetry -- --route "Flat Route" --drift-j-per-km 3000

use anyhow::Result;
use clap::Parser;
use pacing_cli::{DriftProfile, PacingClient, TelemetryReplay};
use pacing_core::{IntegrationScheme, SolveRequest, SpeedUnit};
use std::time::Duration;
use tokio::time;

/// Stream a plan back to the pacing server as telemetry
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Pacing Server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Existing session to replay; a new plan is solved when omitted
    #[arg(long)]
    session: Option<String>,

    #[arg(long, default_value = "Flat Route")]
    route: String,

    #[arg(long, default_value_t = 265.0)]
    cp: f64,

    #[arg(long, default_value_t = 26630.0)]
    w_prime: f64,

    #[arg(long, default_value_t = 1000.0)]
    max_power: f64,

    /// Replay speed-up over real time
    #[arg(long, default_value_t = 20.0)]
    speedup: f64,

    /// Extra W' spent per km beyond plan
    #[arg(long, default_value_t = 0.0)]
    drift_j_per_km: f64,

    /// Distance at which the drift starts (m)
    #[arg(long, default_value_t = 0.0)]
    drift_start_m: f64,

    /// Uniform W' sensor noise amplitude (J)
    #[arg(long, default_value_t = 0.0)]
    noise_j: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Report speed in km/h like most head units
    #[arg(long)]
    kph: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("Connecting to Pacing Server at {}...", args.url);
    let mut client = PacingClient::new(&args.url);

    let plan = match &args.session {
        Some(session) => {
            client = client.with_session(session.clone());
            let status = client.plan_status().await?;
            println!("Attached to session {} on {}", status.session_id, status.route);
            status.plan
        }
        None => {
            let request = SolveRequest {
                route: args.route.clone(),
                num_laps: 1,
                weight: 78.0,
                cp: args.cp,
                w_prime: args.w_prime,
                max_power: args.max_power,
                integration_method: IntegrationScheme::Rk4,
                negative_split: false,
                bound_start: 80.0,
                bound_end: 20.0,
                power_bound: Default::default(),
                w_bal_model: Default::default(),
            };
            println!("Solving plan for {:?}...", args.route);
            let created = client.create_plan(&request).await?;
            println!(
                "Session {}: finish {:.1} s, NP {:.0} W",
                created.session_id, created.summary.finish_time_s, created.summary.normalized_power_w
            );
            created.plan
        }
    };

    let mut replay = TelemetryReplay::new(&plan, args.w_prime)
        .with_noise(args.noise_j, args.seed)
        .with_speed_unit(if args.kph { SpeedUnit::Kph } else { SpeedUnit::Mps });
    if args.drift_j_per_km != 0.0 {
        replay = replay.with_drift(DriftProfile {
            start_m: args.drift_start_m,
            j_per_km: args.drift_j_per_km,
        });
    }

    let speedup = args.speedup.max(1e-3);
    let mut last_time = 0.0;
    let mut sent = 0usize;
    for point in replay {
        let wait = (point.time_s - last_time).max(0.0) / speedup;
        last_time = point.time_s;
        time::sleep(Duration::from_secs_f64(wait)).await;

        if let Err(e) = client.send_telemetry(point.state).await {
            eprintln!("Telemetry rejected at {:.0} m: {}", point.state.distance, e);
            continue;
        }
        sent += 1;
        if sent % 50 == 0 {
            let status = client.plan_status().await?;
            println!(
                "[{:>6.0} m] W' {:>6.0} J | replans committed {} failed {} dropped {}{}",
                point.state.distance,
                point.state.w_bal,
                status.replans.committed,
                status.replans.failed,
                status.replans.dropped,
                if status.replan_in_flight { " (solving)" } else { "" }
            );
        }
    }

    let status = client.plan_status().await?;
    println!();
    println!("Replay complete: {} events sent", sent);
    println!(
        "Current plan anchored at {:.0} m, finish {:.1} s ({} replans committed)",
        status.plan.diagnostics.anchor_m, status.summary.finish_time_s, status.replans.committed
    );
    Ok(())
}
