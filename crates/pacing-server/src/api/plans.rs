//! Plan sessions: solve, inspect, reoptimize.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pacing_core::{
    AthleteState, PacingPlan, PlanSummary, ProblemAssembler, RouteProfile, SolveRequest,
    State as StartState, WarmStartConfig,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::error::{api_error, pacing_error, replan_error, session_not_found, ApiError};
use crate::controller::{ReoptimizationController, ReplanStats, SessionSetup};
use crate::state::AppState;

/// Fresh plans start from a rolling start at 1 m/s with a full reserve.
const START_SPEED_MPS: f64 = 1.0;

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub session_id: String,
    pub plan: PacingPlan,
    pub summary: PlanSummary,
}

#[derive(Debug, Serialize)]
pub struct PlanStatusResponse {
    pub session_id: String,
    pub route: String,
    pub plan: PacingPlan,
    pub summary: PlanSummary,
    pub replan_in_flight: bool,
    pub replans: ReplanStats,
}

fn plan_response(session_id: &str, plan: &PacingPlan) -> PlanResponse {
    PlanResponse {
        session_id: session_id.to_string(),
        summary: plan.summary(),
        plan: plan.clone(),
    }
}

pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SolveRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), ApiError> {
    let data = request.route_data(state.routes()).map_err(pacing_error)?;
    let route = Arc::new(RouteProfile::new(&data).map_err(pacing_error)?);
    let athlete = request.athlete().map_err(pacing_error)?;
    let problem = request
        .problem_config(state.config().solve_options())
        .map_err(pacing_error)?;
    let warm_start = WarmStartConfig::default();
    let solver = state.solver();

    tracing::info!(
        route = %request.route,
        laps = request.num_laps,
        scheme = %request.integration_method,
        length_m = route.length(),
        "Solving fresh plan"
    );

    let plan = {
        let route = Arc::clone(&route);
        let athlete = athlete.clone();
        let problem = problem.clone();
        let warm_start = warm_start.clone();
        let solver = Arc::clone(&solver);
        tokio::task::spawn_blocking(move || {
            let start = StartState::new(route.start(), START_SPEED_MPS, athlete.w_prime);
            ProblemAssembler::new(&route, &athlete, &problem).plan(start, &warm_start, solver.as_ref())
        })
        .await
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, "worker_failure", err))?
        .map_err(pacing_error)?
    };

    let session_id = Uuid::new_v4().to_string();
    let controller = Arc::new(ReoptimizationController::new(
        SessionSetup {
            session_id: session_id.clone(),
            route_name: request.route.clone(),
            route,
            athlete,
            problem,
            warm_start,
            policy: state.config().replan_policy(),
            solver,
            plan_output: state.config().plan_output.clone(),
        },
        plan,
    ));

    let plan = controller.current_plan().await;
    controller.persist(&plan).await;
    state.insert_session(controller);
    tracing::info!(%session_id, finish_time_s = plan.finish_time_s, "Plan session created");

    Ok((StatusCode::CREATED, Json(plan_response(&session_id, &plan))))
}

pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<PlanStatusResponse>, ApiError> {
    let controller = state
        .session(&session_id)
        .ok_or_else(|| session_not_found(&session_id))?;
    let plan = controller.current_plan().await;
    Ok(Json(PlanStatusResponse {
        session_id,
        route: controller.route_name().to_string(),
        summary: plan.summary(),
        plan: (*plan).clone(),
        replan_in_flight: controller.is_replanning(),
        replans: controller.stats(),
    }))
}

pub async fn reoptimize_plan(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(athlete_state): Json<AthleteState>,
) -> Result<Json<PlanResponse>, ApiError> {
    let controller = state
        .session(&session_id)
        .ok_or_else(|| session_not_found(&session_id))?;
    let sample = athlete_state.to_sample().map_err(pacing_error)?;
    let plan = controller.reoptimize(sample).await.map_err(replan_error)?;
    Ok(Json(plan_response(&session_id, &plan)))
}
