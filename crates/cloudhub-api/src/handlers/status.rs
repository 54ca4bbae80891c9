//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub cloud_id: String,
    pub id_type: String,
    pub node_number: usize,
    pub node_limit: usize,
    pub reach_limit: bool,
    pub connections: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let identity = state.sessions.identity();
    Json(StatusResponse {
        cloud_id: identity.id().to_string(),
        id_type: identity.id_type().to_string(),
        node_number: state.sessions.node_number(),
        node_limit: state.sessions.node_limit(),
        reach_limit: state.sessions.reach_limit(),
        connections: state.connections.len(),
    })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
