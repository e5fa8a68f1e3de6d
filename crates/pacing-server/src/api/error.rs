//! Error responses.

use axum::http::StatusCode;
use axum::Json;
use pacing_core::PacingError;
use serde_json::{json, Value};

use crate::controller::ReplanError;
use crate::state::EnqueueError;

pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, error: &str, details: impl ToString) -> ApiError {
    (
        status,
        Json(json!({
            "error": error,
            "details": details.to_string(),
        })),
    )
}

pub fn pacing_error(err: PacingError) -> ApiError {
    let (status, kind) = match &err {
        PacingError::UnknownRoute(_) => (StatusCode::NOT_FOUND, "unknown_route"),
        PacingError::RouteData(_) => (StatusCode::UNPROCESSABLE_ENTITY, "route_data"),
        PacingError::OutOfRange { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "out_of_range"),
        PacingError::InvalidParameter(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_parameter"),
        PacingError::InfeasibleWarmStart { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "infeasible_warm_start")
        }
        PacingError::Solver(failure) => {
            let (status, body) = api_error(StatusCode::BAD_GATEWAY, "solver_failure", &err);
            let mut body = body.0;
            body["solver"] = json!(failure);
            return (status, Json(body));
        }
    };
    api_error(status, kind, err)
}

pub fn replan_error(err: ReplanError) -> ApiError {
    match err {
        ReplanError::Busy => api_error(StatusCode::CONFLICT, "replan_in_flight", ReplanError::Busy),
        ReplanError::Pacing(err) => pacing_error(err),
        ReplanError::Worker(details) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "worker_failure", details)
        }
    }
}

pub fn enqueue_error(err: EnqueueError) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "telemetry_unavailable", err)
}

pub fn session_not_found(session_id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "unknown_session",
        format!("no session {}", session_id),
    )
}
