//! Stagehand server: accepts node connections over WebSocket, tracks the
//! live fleet, and routes operator commands to nodes.

pub mod api;
pub mod auth;
pub mod config;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full HTTP router: the node WebSocket endpoint plus the
/// operator REST API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::node_ws))
        .route("/api/health", get(api::health))
        .route("/api/nodes", get(api::list_nodes))
        .route("/api/nodes/:node_id", get(api::get_node))
        .route("/api/nodes/:node_id/exec", post(api::exec_on_node))
        .route("/api/plugins", get(api::list_plugins))
        .with_state(state)
}
