//! Pacing Server - plan solves and live replanning over REST

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use pacing_core::{AugmentedLagrangianSolver, RouteLibrary};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pacing_server::config::Config;
use pacing_server::loops;
use pacing_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pacing_server=debug".parse()?))
        .init();

    tracing::info!("Starting Pacing Server...");

    let config = Config::from_env();
    let port = config.server_port;
    let routes = RouteLibrary::load(&config.routes_path)
        .with_context(|| format!("loading routes from {}", config.routes_path.display()))?;
    tracing::info!("Loaded {} route(s)", routes.names().len());

    let (state, telemetry_rx) = AppState::new(config, routes, Arc::new(AugmentedLagrangianSolver::default()));
    let state = Arc::new(state);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start background loops
    let replan_loop = tokio::spawn(loops::replan_loop::run_replan_loop(
        state.clone(),
        telemetry_rx,
        shutdown_tx.subscribe(),
    ));

    let app = pacing_server::app(state);

    // Run server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = replan_loop.await;
    Ok(())
}
