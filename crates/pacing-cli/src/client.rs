//! HTTP client for the pacing server.

use anyhow::{bail, Result};
use pacing_core::{AthleteState, PacingPlan, PlanSummary, SolveRequest, TelemetryEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PlanResponse {
    pub session_id: String,
    pub plan: PacingPlan,
    pub summary: PlanSummary,
}

#[derive(Debug, Deserialize)]
pub struct ReplanCounts {
    pub committed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Deserialize)]
pub struct PlanStatus {
    pub session_id: String,
    pub route: String,
    pub plan: PacingPlan,
    pub summary: PlanSummary,
    pub replan_in_flight: bool,
    pub replans: ReplanCounts,
}

/// Client for one plan session on a pacing server.
pub struct PacingClient {
    base_url: String,
    session_id: Option<String>,
    client: reqwest::Client,
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("server returned {}: {}", status, body)
}

impl PacingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach to an existing session instead of creating one.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn require_session(&self) -> Result<&str> {
        match self.session_id.as_deref() {
            Some(id) => Ok(id),
            None => bail!("no plan session; create a plan first"),
        }
    }

    /// Solve a fresh plan and remember its session.
    pub async fn create_plan(&mut self, request: &SolveRequest) -> Result<PlanResponse> {
        let url = format!("{}/v1/plans", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        let created: PlanResponse = error_for_status(response).await?.json().await?;
        self.session_id = Some(created.session_id.clone());
        Ok(created)
    }

    pub async fn plan_status(&self) -> Result<PlanStatus> {
        let url = format!("{}/v1/plans/{}", self.base_url, self.require_session()?);
        let response = self.client.get(&url).send().await?;
        Ok(error_for_status(response).await?.json().await?)
    }

    pub async fn reoptimize(&self, state: &AthleteState) -> Result<PlanResponse> {
        let url = format!(
            "{}/v1/plans/{}/reoptimize",
            self.base_url,
            self.require_session()?
        );
        let response = self.client.post(&url).json(state).send().await?;
        Ok(error_for_status(response).await?.json().await?)
    }

    pub async fn send_telemetry(&self, state: AthleteState) -> Result<()> {
        let url = format!("{}/v1/telemetry", self.base_url);
        let event = TelemetryEvent {
            session_id: self.require_session()?.to_string(),
            state,
        };
        let response = self.client.post(&url).json(&event).send().await?;
        error_for_status(response).await?;
        Ok(())
    }
}
