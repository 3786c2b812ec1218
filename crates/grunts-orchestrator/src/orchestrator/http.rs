//! Orchestrator HTTP surface (§4.G, §6): a single read-only dashboard feed,
//! `GET /run`, serving the current Orchestration Run snapshot. The
//! Orchestrator is the sole writer of this state (via the lifecycle poller
//! task); this module only ever reads it.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::lifecycle::RunHandle;

pub struct OrchestratorHttpState {
    pub run: Arc<RunHandle>,
}

async fn get_run(State(state): State<Arc<OrchestratorHttpState>>) -> impl IntoResponse {
    let snapshot = state.run.snapshot.read().await.clone();
    Json(snapshot)
}

pub fn router(state: Arc<OrchestratorHttpState>) -> Router {
    Router::new().route("/run", get(get_run)).with_state(state)
}
