//! REST API routes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use pacing_core::TelemetryEvent;
use serde_json::{json, Value};

use crate::api::error::{enqueue_error, pacing_error, session_not_found, ApiError};
use crate::api::plans;
use crate::state::AppState;

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/routes", get(list_routes))
        .route("/v1/plans", post(plans::create_plan))
        .route("/v1/plans/:session_id", get(plans::get_plan))
        .route("/v1/plans/:session_id/reoptimize", post(plans::reoptimize_plan))
        .route("/v1/telemetry", post(receive_telemetry))
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.routes().names())
}

async fn receive_telemetry(
    State(state): State<Arc<AppState>>,
    Json(event): Json<TelemetryEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if state.session(&event.session_id).is_none() {
        return Err(session_not_found(&event.session_id));
    }
    event.state.to_sample().map_err(pacing_error)?;
    state.enqueue_telemetry(event).map_err(enqueue_error)?;
    Ok((StatusCode::ACCEPTED, Json(json!({"queued": true}))))
}
