//! Shared library surface for the pacing server and its tests.

pub mod api;
pub mod config;
pub mod controller;
pub mod loops;
pub mod persistence;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router, health check included.
pub fn app(state: Arc<AppState>) -> Router {
    api::routes()
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
