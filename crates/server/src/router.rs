//! Command router — dispatches `exec` commands to connected nodes and
//! correlates the asynchronous results back to the waiting caller.
//!
//! Every dispatch gets a fresh correlation id. The node's `exec_result`
//! carries that id back; the router wakes exactly the caller that issued
//! it. A result that arrives after its command already timed out is
//! logged and discarded, never delivered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use stagehand_protocol::{
    check_capability, Denial, Envelope, ErrorKind, ExecError, ExecStatus,
};
use tokio::sync::oneshot;

use crate::registry::NodeRegistry;

/// A completed command: the result payload plus the correlation id it
/// travelled under, so callers can tie logs and wire traces together.
#[derive(Debug, Clone)]
pub struct CommandReply {
    pub correlation_id: String,
    pub data: Value,
}

/// Why a command never made it to a completed result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("node {0} is not connected")]
    NodeOffline(String),

    #[error("denied: {0}")]
    Denied(#[from] Denial),

    #[error("{0}")]
    Backpressure(String),

    #[error("failed to send command to node {0}")]
    SendFailed(String),

    /// The node executed the command and reported a failure.
    #[error("{error}")]
    Failed {
        correlation_id: String,
        error: ExecError,
    },

    #[error("command to node {node_id} timed out after {secs}s")]
    TimedOut { node_id: String, secs: u64 },

    /// The session carrying the command dropped before a result arrived.
    #[error("node {0} disconnected before responding")]
    ConnectionLost(String),
}

impl DispatchError {
    /// Wire-level classification, used by the HTTP layer for status codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NodeOffline(_) => ErrorKind::NotFound,
            DispatchError::Denied(_) => ErrorKind::Denied,
            DispatchError::Backpressure(_) | DispatchError::SendFailed(_) => ErrorKind::Failed,
            DispatchError::Failed { error, .. } => error.kind,
            DispatchError::TimedOut { .. } => ErrorKind::Timeout,
            DispatchError::ConnectionLost(_) => ErrorKind::ConnectionLost,
        }
    }
}

struct PendingCommand {
    node_id: String,
    /// Session the command was written to. Cleanup after a superseded
    /// session's disconnect must not fail commands riding the newer one.
    session_id: String,
    action: String,
    tx: oneshot::Sender<Result<Value, ExecError>>,
}

pub struct CommandRouter {
    nodes: Arc<NodeRegistry>,
    /// Per-node action whitelists from server config. A node with no entry
    /// here has no server-side whitelist; the node still enforces its own.
    whitelists: HashMap<String, Vec<String>>,
    /// Map of correlation_id → pending oneshot sender.
    pending: Mutex<HashMap<String, PendingCommand>>,
    default_timeout: Duration,
    /// Maximum in-flight commands per node (0 = unlimited).
    max_inflight_per_node: usize,
    /// Maximum in-flight commands globally (0 = unlimited).
    max_inflight_global: usize,
}

impl CommandRouter {
    pub fn new(
        nodes: Arc<NodeRegistry>,
        whitelists: HashMap<String, Vec<String>>,
        default_timeout_secs: u64,
        max_inflight_per_node: usize,
        max_inflight_global: usize,
    ) -> Self {
        Self {
            nodes,
            whitelists,
            pending: Mutex::new(HashMap::new()),
            default_timeout: Duration::from_secs(default_timeout_secs),
            max_inflight_per_node,
            max_inflight_global,
        }
    }

    /// Server-side pre-filter: the node must be connected and declare the
    /// capability, and the action must pass this node's configured
    /// whitelist, if any. The node re-checks its own policy on receipt;
    /// this only rejects commands that could never succeed.
    fn pre_check(&self, node_id: &str, action: &str) -> Result<(), DispatchError> {
        let capabilities = self
            .nodes
            .capabilities_of(node_id)
            .ok_or_else(|| DispatchError::NodeOffline(node_id.to_string()))?;
        check_capability(&capabilities, action)?;

        if let Some(whitelist) = self.whitelists.get(node_id) {
            if !whitelist.iter().any(|allowed| allowed == action) {
                return Err(Denial::NotWhitelisted {
                    action: action.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Send one command to a node and wait for its result.
    ///
    /// Enforces `max_inflight_per_node` and `max_inflight_global` so one
    /// stuck node cannot pin the router's whole pending budget.
    pub async fn submit(
        &self,
        node_id: &str,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<CommandReply, DispatchError> {
        self.pre_check(node_id, action)?;

        let session = self
            .nodes
            .session_of(node_id)
            .ok_or_else(|| DispatchError::NodeOffline(node_id.to_string()))?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let (tx, rx) = oneshot::channel();

        // Cap check and insert under one lock acquisition, so concurrent
        // submits cannot all pass the check and overshoot the caps.
        {
            let mut pending = self.pending.lock();
            if self.max_inflight_global > 0 && pending.len() >= self.max_inflight_global {
                return Err(DispatchError::Backpressure(format!(
                    "global in-flight limit reached ({} commands pending)",
                    pending.len()
                )));
            }
            if self.max_inflight_per_node > 0 {
                let node_count = pending.values().filter(|pc| pc.node_id == node_id).count();
                if node_count >= self.max_inflight_per_node {
                    return Err(DispatchError::Backpressure(format!(
                        "in-flight limit reached for node {node_id} ({node_count} commands pending)"
                    )));
                }
            }
            let prev = pending.insert(
                correlation_id.clone(),
                PendingCommand {
                    node_id: node_id.to_string(),
                    session_id: session.session_id.clone(),
                    action: action.to_string(),
                    tx,
                },
            );
            debug_assert!(prev.is_none(), "correlation_id collision: {correlation_id}");
        }

        let msg = Envelope::Exec {
            id: correlation_id.clone(),
            action: action.to_string(),
            params,
            timeout_ms: Some(timeout.as_millis() as u64),
        };

        if session.sink.send(msg).await.is_err() {
            self.pending.lock().remove(&correlation_id);
            return Err(DispatchError::SendFailed(node_id.to_string()));
        }

        tracing::debug!(
            node_id = %node_id,
            action = %action,
            correlation_id = %correlation_id,
            "command dispatched"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(CommandReply {
                correlation_id,
                data,
            }),
            Ok(Ok(Err(error))) => Err(DispatchError::Failed {
                correlation_id,
                error,
            }),
            // Sender dropped: the session cleanup drained this entry.
            Ok(Err(_)) => Err(DispatchError::ConnectionLost(node_id.to_string())),
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                Err(DispatchError::TimedOut {
                    node_id: node_id.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Called by the WS handler when a node sends an `exec_result`.
    pub fn complete(&self, envelope: Envelope) {
        let Envelope::ExecResult {
            correlation_id,
            status,
            data,
            error,
        } = envelope
        else {
            return;
        };

        let Some(pending) = self.pending.lock().remove(&correlation_id) else {
            // Late result after timeout, or a correlation id we never
            // issued. Either way, nothing is waiting.
            tracing::warn!(
                correlation_id = %correlation_id,
                "discarding exec_result with no pending command"
            );
            return;
        };

        let outcome = match status {
            ExecStatus::Ok => Ok(data.unwrap_or(Value::Null)),
            ExecStatus::Error => Err(error.unwrap_or(ExecError {
                kind: ErrorKind::Failed,
                message: "node reported an error with no detail".into(),
            })),
        };
        if pending.tx.send(outcome).is_err() {
            tracing::debug!(
                correlation_id = %correlation_id,
                action = %pending.action,
                "caller gone before exec_result arrived"
            );
        }
    }

    /// Fail every pending command that was written to the given session.
    /// Keyed by session, not node: when a reconnect supersedes a session,
    /// the old connection's cleanup must leave the new session's commands
    /// alone. Returns the number of commands failed.
    pub fn fail_pending_for_session(&self, node_id: &str, session_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let drained: Vec<String> = pending
            .iter()
            .filter(|(_, pc)| pc.node_id == node_id && pc.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        let count = drained.len();
        for correlation_id in drained {
            if let Some(pc) = pending.remove(&correlation_id) {
                let _ = pc.tx.send(Err(ExecError {
                    kind: ErrorKind::ConnectionLost,
                    message: format!("node {node_id} disconnected"),
                }));
            }
        }

        if count > 0 {
            tracing::warn!(
                node_id = %node_id,
                session_id = %session_id,
                failed_commands = count,
                "failed in-flight commands for dropped session"
            );
        }
        count
    }

    /// Number of in-flight commands.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
