//! Operator-facing REST endpoints.
//!
//! - `GET  /api/health`            — liveness + connection/pending counts
//! - `GET  /api/nodes`             — list connected nodes
//! - `GET  /api/nodes/{id}`        — detail for one node
//! - `POST /api/nodes/{id}/exec`   — run an action on a node, wait for result
//! - `GET  /api/plugins`           — capability → node ids, across the fleet
//!
//! Dispatch rejections map to HTTP status codes; a command the node
//! actually ran (including one that failed or timed out there) comes back
//! as 200 with a `status` field, so callers can tell "refused" from
//! "executed and reported".

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stagehand_protocol::Denial;

use crate::router::DispatchError;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    nodes_connected: usize,
    pending_commands: usize,
}

#[derive(Deserialize)]
pub struct ExecRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    /// Override of the server's default command timeout, in seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct ExecResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

fn error_json(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "detail": detail.into() })),
    )
        .into_response()
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        nodes_connected: state.nodes.len(),
        pending_commands: state.router.pending_count(),
    })
}

/// GET /api/nodes
pub async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let nodes = state.nodes.list();
    Json(serde_json::json!({
        "nodes": nodes,
        "count": nodes.len(),
    }))
}

/// GET /api/nodes/{node_id}
pub async fn get_node(State(state): State<AppState>, Path(node_id): Path<String>) -> Response {
    match state.nodes.lookup(&node_id) {
        Some(node) => Json(node).into_response(),
        None => error_json(StatusCode::NOT_FOUND, format!("node not found: {node_id}")),
    }
}

/// POST /api/nodes/{node_id}/exec
pub async fn exec_on_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Response {
    let timeout = request.timeout_secs.map(Duration::from_secs);
    let outcome = state
        .router
        .submit(&node_id, &request.action, request.params, timeout)
        .await;

    match outcome {
        Ok(reply) => Json(ExecResponse {
            status: "success",
            correlation_id: Some(reply.correlation_id),
            result: Some(reply.data),
            error: None,
        })
        .into_response(),

        Err(DispatchError::Failed {
            correlation_id,
            error,
        }) => Json(ExecResponse {
            status: "error",
            correlation_id: Some(correlation_id),
            result: None,
            error: Some(serde_json::json!({
                "kind": error.kind,
                "message": error.message,
            })),
        })
        .into_response(),

        Err(err @ DispatchError::TimedOut { .. }) => Json(ExecResponse {
            status: "timeout",
            correlation_id: None,
            result: None,
            error: Some(serde_json::json!({
                "kind": err.kind(),
                "message": err.to_string(),
            })),
        })
        .into_response(),

        Err(DispatchError::NodeOffline(id)) => {
            error_json(StatusCode::NOT_FOUND, format!("node not found: {id}"))
        }
        Err(DispatchError::Denied(denial @ Denial::MalformedAction { .. })) => {
            error_json(StatusCode::BAD_REQUEST, denial.to_string())
        }
        Err(DispatchError::Denied(denial)) => {
            error_json(StatusCode::FORBIDDEN, denial.to_string())
        }
        Err(err @ DispatchError::Backpressure(_)) => {
            error_json(StatusCode::TOO_MANY_REQUESTS, err.to_string())
        }
        Err(err @ (DispatchError::SendFailed(_) | DispatchError::ConnectionLost(_))) => {
            error_json(StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}

/// GET /api/plugins — which nodes currently provide each capability.
pub async fn list_plugins(State(state): State<AppState>) -> impl IntoResponse {
    let mut plugins: HashMap<String, Vec<String>> = HashMap::new();
    for node in state.nodes.list() {
        for capability in node.capabilities {
            plugins
                .entry(capability)
                .or_default()
                .push(node.node_id.clone());
        }
    }
    Json(serde_json::json!({ "plugins": plugins }))
}
