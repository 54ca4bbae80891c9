//! /nodes handlers — attached edge node inspection and eviction.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use cloudhub_session::TerminateCode;

use super::ApiState;

#[derive(Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub cloud_id: String,
    pub is_self: bool,
}

// ── /nodes ────────────────────────────────────────────────────────────────────

pub async fn handle_nodes(State(state): State<ApiState>) -> Json<Vec<NodeInfo>> {
    let mut nodes: Vec<NodeInfo> = state
        .sessions
        .sessions()
        .iter()
        .map(|s| NodeInfo {
            node_id: s.node_id().to_string(),
            cloud_id: s.connected_cloud_id().to_string(),
            is_self: state.sessions.is_cloud_self(s.connected_cloud_id()),
        })
        .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    Json(nodes)
}

// ── /nodes/:id (GET) ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct NodeInspectResponse {
    pub node_id: String,
    pub cloud_id: String,
    pub is_self: bool,
    pub terminate_code: TerminateCode,
    pub pending_acks: usize,
}

pub async fn handle_node_inspect(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeInspectResponse>, (StatusCode, String)> {
    let session = state
        .sessions
        .get_session(&node_id)
        .ok_or((StatusCode::NOT_FOUND, "session not found".to_string()))?;

    let (cloud_id, is_self) = state.sessions.is_node_connect_self(&node_id);
    Ok(Json(NodeInspectResponse {
        node_id,
        cloud_id,
        is_self,
        terminate_code: session.terminate_code(),
        pending_acks: session.message_pool().pending_acks(),
    }))
}

// ── /nodes/:id (DELETE) ───────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct NodeDropResponse {
    pub node_id: String,
    pub dropped: bool,
}

pub async fn handle_node_drop(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> Json<NodeDropResponse> {
    let dropped = match state.sessions.get_session(&node_id) {
        Some(session) => {
            session.set_terminate_code(TerminateCode::Evicted);
            session.terminate();
            state.sessions.delete_session(&*session)
        }
        None => false,
    };

    if dropped {
        tracing::info!(node_id = %node_id, "node session dropped via API");
    }

    Json(NodeDropResponse { node_id, dropped })
}

// ── /connections/sync ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SyncResponse {
    pub added: usize,
    pub removed: usize,
    pub connections: usize,
}

pub async fn handle_connections_sync(State(state): State<ApiState>) -> Json<SyncResponse> {
    let (added, removed) = state.connections.sync_from_sessions(&state.sessions);
    Json(SyncResponse {
        added,
        removed,
        connections: state.connections.len(),
    })
}
