//! In-memory session store using DashMap.

use std::sync::Arc;

use dashmap::DashMap;
use pacing_core::{NlpSolver, RouteLibrary, TelemetryEvent};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::controller::ReoptimizationController;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("telemetry queue is full")]
    Full,
    #[error("telemetry loop is not running")]
    Closed,
}

/// Application state - route library, solver and live sessions.
pub struct AppState {
    config: Config,
    routes: RouteLibrary,
    solver: Arc<dyn NlpSolver>,
    sessions: DashMap<String, Arc<ReoptimizationController>>,
    telemetry_tx: mpsc::Sender<TelemetryEvent>,
}

impl AppState {
    /// Build the state and the receiving end of the telemetry queue.
    pub fn new(
        config: Config,
        routes: RouteLibrary,
        solver: Arc<dyn NlpSolver>,
    ) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (telemetry_tx, telemetry_rx) = mpsc::channel(config.telemetry_capacity);
        let state = Self {
            config,
            routes,
            solver,
            sessions: DashMap::new(),
            telemetry_tx,
        };
        (state, telemetry_rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routes(&self) -> &RouteLibrary {
        &self.routes
    }

    pub fn solver(&self) -> Arc<dyn NlpSolver> {
        Arc::clone(&self.solver)
    }

    pub fn insert_session(&self, controller: Arc<ReoptimizationController>) {
        self.sessions
            .insert(controller.session_id().to_string(), controller);
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<ReoptimizationController>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Hand a telemetry event to the replan loop without waiting.
    pub fn enqueue_telemetry(&self, event: TelemetryEvent) -> Result<(), EnqueueError> {
        self.telemetry_tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}
