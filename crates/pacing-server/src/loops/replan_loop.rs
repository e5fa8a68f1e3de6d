//! Telemetry consumer loop.
//!
//! Events are consumed in order. A burst is coalesced to the newest sample
//! per session, since only the freshest state matters for the trigger
//! check. Replans themselves are dispatched by the controller and never
//! block this loop.

use std::collections::HashMap;
use std::sync::Arc;

use pacing_core::{TelemetryEvent, TelemetrySample};
use tokio::sync::{broadcast, mpsc};

use crate::controller::TelemetryOutcome;
use crate::state::AppState;

pub async fn run_replan_loop(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<TelemetryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut pending: HashMap<String, TelemetrySample> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Replan loop shutting down");
                break;
            }
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        queue_event(&mut pending, event);
                        drain_queue(&mut pending, &mut rx);
                        process_pending(&state, &mut pending).await;
                    }
                    None => {
                        tracing::info!("Telemetry channel closed");
                        break;
                    }
                }
            }
        }
    }
}

fn queue_event(pending: &mut HashMap<String, TelemetrySample>, event: TelemetryEvent) {
    match event.state.to_sample() {
        Ok(sample) => {
            pending.insert(event.session_id, sample);
        }
        Err(err) => {
            tracing::warn!(session_id = %event.session_id, "Discarding telemetry: {}", err);
        }
    }
}

fn drain_queue(pending: &mut HashMap<String, TelemetrySample>, rx: &mut mpsc::Receiver<TelemetryEvent>) {
    while let Ok(event) = rx.try_recv() {
        queue_event(pending, event);
    }
}

async fn process_pending(state: &AppState, pending: &mut HashMap<String, TelemetrySample>) {
    for (session_id, sample) in pending.drain() {
        let Some(controller) = state.session(&session_id) else {
            tracing::debug!(%session_id, "Telemetry for unknown session");
            continue;
        };
        match controller.on_telemetry(sample).await {
            TelemetryOutcome::Hold(reason) => {
                tracing::trace!(%session_id, ?reason, "Holding plan");
            }
            TelemetryOutcome::Dispatched => {
                tracing::debug!(%session_id, "Replan dispatched");
            }
            TelemetryOutcome::Dropped => {}
        }
    }
}
