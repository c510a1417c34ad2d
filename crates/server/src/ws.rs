//! WebSocket endpoint for node connections.
//!
//! Flow:
//! 1. Node connects to `/ws` and sends `hello` + `auth` (any order)
//! 2. Server validates the credential, then replies `auth_ack` followed
//!    by `hello_ack` carrying the new session id
//! 3. Bidirectional loop: server sends `exec`, node sends `exec_result`,
//!    both exchange `heartbeat`
//!
//! A node id can hold at most one live session. A second handshake for
//! the same id supersedes the first; the old connection is closed and its
//! in-flight commands fail, while commands on the new session are
//! untouched.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use stagehand_protocol::{Envelope, NodeDescriptor, PROTOCOL_VERSION};

use crate::auth::AuthDecision;
use crate::registry::{ConnectedNode, SessionHandle};
use crate::state::AppState;

/// How long a fresh connection gets to complete `hello` + `auth`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// GET /ws — upgrade to WebSocket. Authentication happens in-band via the
/// `auth` envelope, not at upgrade time.
pub async fn node_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Collect the handshake pair.
    let handshake = match wait_for_handshake(&mut ws_stream).await {
        Some(h) => h,
        None => {
            tracing::warn!("connection closed before completing handshake");
            return;
        }
    };

    let node_id = handshake.node.node_id.clone();

    if handshake.protocol_version != PROTOCOL_VERSION {
        tracing::warn!(
            node_id = %node_id,
            theirs = handshake.protocol_version,
            ours = PROTOCOL_VERSION,
            "protocol version mismatch"
        );
        let _ = send_envelope(
            &mut ws_sink,
            &Envelope::Error {
                correlation_id: Some(handshake.hello_id),
                reason: format!(
                    "unsupported protocol version {} (server speaks {PROTOCOL_VERSION})",
                    handshake.protocol_version
                ),
            },
        )
        .await;
        return;
    }

    // 2. Validate the credential. A rejection is sent back so the node
    // knows to stop retrying, then the connection closes.
    match state.auth.authenticate(&node_id, &handshake.token).await {
        AuthDecision::Accepted => {}
        AuthDecision::Rejected { reason } => {
            tracing::warn!(node_id = %node_id, reason = %reason, "authentication rejected");
            let _ = send_envelope(
                &mut ws_sink,
                &Envelope::AuthAck {
                    correlation_id: handshake.auth_id,
                    accepted: false,
                    reason: Some(reason),
                },
            )
            .await;
            return;
        }
    }

    // 3. Channel for outbound envelopes, and the session built on it.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(64);
    let session = SessionHandle::new(outbound_tx);
    let session_id = session.session_id.clone();
    let closed = session.closed.clone();
    let hb_sink = session.sink.clone();

    let accepted = Envelope::AuthAck {
        correlation_id: handshake.auth_id,
        accepted: true,
        reason: None,
    };
    let welcome = Envelope::HelloAck {
        correlation_id: handshake.hello_id,
        session_id: session_id.clone(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if send_envelope(&mut ws_sink, &accepted).await.is_err()
        || send_envelope(&mut ws_sink, &welcome).await.is_err()
    {
        tracing::warn!(node_id = %node_id, "failed to send handshake acks");
        return;
    }

    // 4. Register. A superseded session gets closed; its own task then
    // runs the cleanup path below for it.
    if let Some(superseded) = state.nodes.register(ConnectedNode {
        descriptor: handshake.node,
        capabilities: handshake.capabilities,
        session,
        connected_at: Utc::now(),
        last_heartbeat: Utc::now(),
    }) {
        tracing::info!(
            node_id = %node_id,
            old_session = %superseded.session_id,
            "closing superseded session"
        );
        superseded.close();
    }

    // Writer task: forwards outbound channel envelopes to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if send_envelope(&mut ws_sink, &envelope).await.is_err() {
                break;
            }
        }
    });

    // Heartbeat task: an idle node still gets inbound traffic, so its
    // own idle-grace window never trips while the session is healthy.
    let hb_interval = Duration::from_secs(state.config.heartbeat_interval_secs.max(1));
    let heartbeat = tokio::spawn(async move {
        let mut interval = tokio::time::interval(hb_interval);
        loop {
            interval.tick().await;
            let beat = Envelope::Heartbeat {
                timestamp: Utc::now().timestamp_millis(),
            };
            if hb_sink.send(beat).await.is_err() {
                break;
            }
        }
    });

    // 5. Reader loop. Exits on close, transport error, or the session
    // being closed from the outside (supersede or stale sweep).
    loop {
        let msg = tokio::select! {
            _ = closed.cancelled() => break,
            msg = ws_stream.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            Message::Text(text) => match Envelope::decode(&text) {
                Ok(envelope) => handle_inbound(&state, &node_id, envelope).await,
                Err(err) => {
                    tracing::debug!(node_id = %node_id, error = %err, "dropping malformed frame");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings itself; still counts as traffic.
                state.nodes.touch(&node_id);
            }
            _ => {}
        }
    }

    // Cleanup. Unregister is guarded by session id so a superseded
    // session cannot evict its replacement, and pending commands fail
    // only for this session.
    let failed = state.router.fail_pending_for_session(&node_id, &session_id);
    heartbeat.abort();
    writer.abort();
    state.nodes.unregister(&node_id, &session_id);
    tracing::info!(
        node_id = %node_id,
        session_id = %session_id,
        failed_in_flight = failed,
        "node disconnected"
    );
}

struct Handshake {
    hello_id: String,
    auth_id: String,
    protocol_version: u32,
    node: NodeDescriptor,
    capabilities: Vec<String>,
    token: String,
}

/// Wait for both `hello` and `auth`, in either order, within the
/// handshake window. Anything else on the wire before that is dropped.
async fn wait_for_handshake(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Handshake> {
    let collected = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        let mut hello: Option<(String, u32, NodeDescriptor, Vec<String>)> = None;
        let mut auth: Option<(String, String)> = None;

        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                match Envelope::decode(&text) {
                    Ok(Envelope::Hello {
                        id,
                        protocol_version,
                        node,
                        capabilities,
                    }) => hello = Some((id, protocol_version, node, capabilities)),
                    Ok(Envelope::Auth { id, token }) => auth = Some((id, token)),
                    _ => {}
                }
            }
            if let (Some(h), Some(a)) = (&hello, &auth) {
                let (hello_id, protocol_version, node, capabilities) = h.clone();
                let (auth_id, token) = a.clone();
                return Some(Handshake {
                    hello_id,
                    auth_id,
                    protocol_version,
                    node,
                    capabilities,
                    token,
                });
            }
        }
        None
    })
    .await;

    collected.unwrap_or(None)
}

async fn send_envelope(
    sink: &mut (impl SinkExt<Message> + Unpin),
    envelope: &Envelope,
) -> Result<(), ()> {
    let json = envelope.encode().map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn handle_inbound(state: &AppState, node_id: &str, envelope: Envelope) {
    // Any decodable inbound frame counts against the idle window.
    state.nodes.touch(node_id);

    match envelope {
        Envelope::ExecResult { .. } => {
            state.router.complete(envelope);
        }
        Envelope::Heartbeat { .. } => {
            // Touch already done above; heartbeats carry nothing else.
        }
        Envelope::Error {
            correlation_id,
            reason,
        } => {
            tracing::warn!(
                node_id = %node_id,
                correlation_id = ?correlation_id,
                reason = %reason,
                "node reported protocol error"
            );
        }
        other => {
            tracing::debug!(
                node_id = %node_id,
                envelope = ?std::mem::discriminant(&other),
                "unexpected inbound envelope"
            );
        }
    }
}
