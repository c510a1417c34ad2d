//! Core node client — drives the session state machine over a real
//! WebSocket: handshake, heartbeat, gated action dispatch, reconnection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use stagehand_protocol::{
    ActionPolicy, Envelope, ErrorKind, ExecError, ExecStatus, NodeDescriptor, PROTOCOL_VERSION,
};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::dispatch::dispatch;
use crate::plugins::PluginRegistry;
use crate::reconnect::ReconnectBackoff;
use crate::session::{SessionEvent, SessionState};
use crate::types::NodeClientError;

/// A fully-configured node client ready to connect to the server.
///
/// Create via [`NodeClientBuilder`](crate::builder::NodeClientBuilder).
pub struct NodeClient {
    pub(crate) server_url: String,
    pub(crate) token: String,
    pub(crate) node_id: String,
    pub(crate) platform: String,
    pub(crate) version: String,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) idle_grace: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) max_concurrent_execs: usize,
    pub(crate) policy: Arc<ActionPolicy>,
}

/// How one connection attempt ended.
enum ConnectError {
    /// `auth_ack { accepted: false }`. Fatal, surfaced to the operator,
    /// never retried automatically.
    AuthRejected(String),
    /// Anything else: dial failure, handshake timeout, transport drop.
    Transient(anyhow::Error),
}

impl NodeClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::NodeClientBuilder {
        crate::builder::NodeClientBuilder::new()
    }

    /// Run the client: connect, handshake, serve `exec` requests, and
    /// reconnect with backoff on drops.
    ///
    /// Returns only on explicit shutdown, authentication rejection, or
    /// `max_attempts` exhaustion.
    pub async fn run(
        self,
        plugins: PluginRegistry,
        shutdown: CancellationToken,
    ) -> Result<(), NodeClientError> {
        let plugins = Arc::new(plugins);
        let capabilities: Arc<Vec<String>> = Arc::new(plugins.capabilities());
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(NodeClientError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run(&plugins, &capabilities) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.node_id, "shutdown requested");
                    return Err(NodeClientError::Shutdown);
                }
            };

            match result {
                Ok(connected_for) => {
                    // Backoff resets only after a sustained connection, so
                    // a link that flaps right after the handshake keeps
                    // climbing toward the cap.
                    if self.reconnect_backoff.is_stable(connected_for) {
                        attempt = 0;
                    }
                    tracing::info!(
                        node_id = %self.node_id,
                        connected_secs = connected_for.as_secs(),
                        "connection ended"
                    );
                }
                Err(ConnectError::AuthRejected(reason)) => {
                    tracing::error!(
                        node_id = %self.node_id,
                        reason = %reason,
                        "authentication rejected, not retrying"
                    );
                    return Err(NodeClientError::AuthRejected(reason));
                }
                Err(ConnectError::Transient(e)) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        attempt,
                        error = %e,
                        "connection lost"
                    );
                }
            }

            if self.reconnect_backoff.should_give_up(attempt) {
                tracing::error!(
                    node_id = %self.node_id,
                    attempts = attempt,
                    "max reconnect attempts exhausted"
                );
                return Err(NodeClientError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt);
            tracing::info!(
                node_id = %self.node_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(NodeClientError::Shutdown),
            }

            attempt += 1;
        }
    }

    /// Same as [`run`](Self::run), but detached.
    pub fn spawn(
        self,
        plugins: PluginRegistry,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), NodeClientError>> {
        tokio::spawn(async move { self.run(plugins, shutdown).await })
    }

    /// One connection lifecycle: dial, handshake, message loop. Returns
    /// how long the session stayed connected.
    async fn connect_and_run(
        &self,
        plugins: &Arc<PluginRegistry>,
        capabilities: &Arc<Vec<String>>,
    ) -> Result<Duration, ConnectError> {
        let mut state = SessionState::Connecting;
        tracing::debug!(node_id = %self.node_id, state = %state, "dialing server");

        let (ws, _response) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|e| ConnectError::Transient(e.into()))?;
        state = state.on(SessionEvent::TransportOpened);

        let (mut sink, mut stream) = ws.split();

        // ── hello + auth ─────────────────────────────────────────────
        let hello = Envelope::Hello {
            id: uuid::Uuid::new_v4().to_string(),
            protocol_version: PROTOCOL_VERSION,
            node: NodeDescriptor {
                node_id: self.node_id.clone(),
                platform: self.platform.clone(),
                version: self.version.clone(),
            },
            capabilities: capabilities.as_ref().clone(),
        };
        let auth_id = uuid::Uuid::new_v4().to_string();
        let auth = Envelope::Auth {
            id: auth_id.clone(),
            token: self.token.clone(),
        };
        for env in [&hello, &auth] {
            let json = env.encode().map_err(|e| ConnectError::Transient(e.into()))?;
            sink.send(Message::Text(json))
                .await
                .map_err(|e| ConnectError::Transient(e.into()))?;
        }

        // ── await auth_ack ───────────────────────────────────────────
        let verdict = tokio::time::timeout(self.handshake_timeout, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(anyhow::Error::from)?;
                let Message::Text(text) = frame else { continue };
                match Envelope::decode(&text) {
                    Ok(Envelope::AuthAck {
                        correlation_id,
                        accepted,
                        reason,
                    }) if correlation_id == auth_id => return Ok((accepted, reason)),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed frame during handshake");
                    }
                }
            }
            Err(anyhow::anyhow!("connection closed before auth_ack"))
        })
        .await;

        match verdict {
            Err(_elapsed) => {
                return Err(ConnectError::Transient(anyhow::anyhow!(
                    "no auth_ack within {:?}",
                    self.handshake_timeout
                )));
            }
            Ok(Err(e)) => return Err(ConnectError::Transient(e)),
            Ok(Ok((false, reason))) => {
                return Err(ConnectError::AuthRejected(
                    reason.unwrap_or_else(|| "credentials rejected".into()),
                ));
            }
            Ok(Ok((true, _))) => {}
        }

        state = state.on(SessionEvent::AuthAccepted);
        let connected_at = Instant::now();
        tracing::info!(
            node_id = %self.node_id,
            capabilities = capabilities.len(),
            state = %state,
            "handshake complete"
        );

        // ── message loop ─────────────────────────────────────────────
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(64);
        let exec_semaphore = Arc::new(Semaphore::new(self.max_concurrent_execs));

        let hb_tx = outbound_tx.clone();
        let hb_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(hb_interval);
            loop {
                interval.tick().await;
                let beat = Envelope::Heartbeat {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if hb_tx.send(beat).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(env) = outbound_rx.recv().await {
                let json = match env.encode() {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound envelope");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let end_event = loop {
            // Any inbound frame (heartbeat or otherwise) resets the idle
            // window; total silence forces a reconnect.
            let frame = match tokio::time::timeout(self.idle_grace, stream.next()).await {
                Err(_elapsed) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        grace_secs = self.idle_grace.as_secs(),
                        "no traffic within idle grace window"
                    );
                    break SessionEvent::IdleExpired;
                }
                Ok(None) => break SessionEvent::TransportLost,
                Ok(Some(Err(e))) => {
                    tracing::warn!(node_id = %self.node_id, error = %e, "transport error");
                    break SessionEvent::TransportLost;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => match Envelope::decode(&text) {
                    Ok(Envelope::Exec {
                        id,
                        action,
                        params,
                        ..
                    }) => {
                        self.handle_exec(
                            id,
                            action,
                            params,
                            plugins,
                            capabilities,
                            &outbound_tx,
                            &exec_semaphore,
                        );
                    }
                    Ok(Envelope::Heartbeat { .. }) => {
                        tracing::trace!(node_id = %self.node_id, "server heartbeat");
                    }
                    Ok(Envelope::HelloAck { session_id, .. }) => {
                        tracing::info!(
                            node_id = %self.node_id,
                            session_id = %session_id,
                            "session established"
                        );
                    }
                    Ok(Envelope::Error {
                        correlation_id,
                        reason,
                    }) => {
                        tracing::warn!(
                            correlation_id = correlation_id.as_deref().unwrap_or(""),
                            reason = %reason,
                            "server reported protocol error"
                        );
                    }
                    Ok(other) => {
                        tracing::debug!(envelope = ?other, "unexpected inbound envelope");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed envelope");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(node_id = %self.node_id, "server closed connection");
                    break SessionEvent::TransportLost;
                }
                _ => {}
            }
        };

        state = state.on(end_event);
        tracing::debug!(node_id = %self.node_id, state = %state, "leaving message loop");
        heartbeat_task.abort();
        writer_task.abort();

        Ok(connected_at.elapsed())
    }

    /// Gate then dispatch one `exec`. Runs on its own task so a slow
    /// plugin never blocks the read loop; every `exec` produces exactly
    /// one `exec_result`.
    #[allow(clippy::too_many_arguments)]
    fn handle_exec(
        &self,
        correlation_id: String,
        action: String,
        params: serde_json::Value,
        plugins: &Arc<PluginRegistry>,
        capabilities: &Arc<Vec<String>>,
        outbound_tx: &mpsc::Sender<Envelope>,
        exec_semaphore: &Arc<Semaphore>,
    ) {
        let plugins = plugins.clone();
        let capabilities = capabilities.clone();
        let policy = self.policy.clone();
        let tx = outbound_tx.clone();
        let semaphore = exec_semaphore.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire().await;

            // Authoritative gate: runs here even if the server already
            // pre-filtered, because the caller's side is never trusted
            // alone.
            let outcome = match policy.authorize(&capabilities, &action, &params) {
                Err(denial) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        action = %action,
                        denial = %denial,
                        "action denied"
                    );
                    Err(ExecError {
                        kind: ErrorKind::Denied,
                        message: denial.to_string(),
                    })
                }
                Ok(()) => {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        action = %action,
                        "executing action"
                    );
                    dispatch(&plugins, &action, params).await
                }
            };

            let reply = match outcome {
                Ok(data) => Envelope::ExecResult {
                    correlation_id,
                    status: ExecStatus::Ok,
                    data: Some(data),
                    error: None,
                },
                Err(error) => Envelope::ExecResult {
                    correlation_id,
                    status: ExecStatus::Error,
                    data: None,
                    error: Some(error),
                },
            };
            let _ = tx.send(reply).await;
        });
    }
}
