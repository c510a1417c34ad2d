//! Wire protocol shared by the Stagehand server and its nodes.
//!
//! Nodes are remote workstations that hold a persistent WebSocket to the
//! server, declare which plugins they carry, and execute whitelisted
//! actions on request. Everything that crosses the wire is an [`Envelope`];
//! the [`gate`] module holds the action authorization policy applied on
//! both ends of the channel.

use serde::{Deserialize, Serialize};

pub mod gate;

pub use gate::{check_capability, split_action, ActionPolicy, Denial};

/// Bumped on any incompatible change to [`Envelope`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Message envelope — the only unit ever placed on the wire.
///
/// Request-shaped envelopes (`hello`, `auth`, `exec`) carry a fresh `id`;
/// response-shaped envelopes (`hello_ack`, `auth_ack`, `exec_result`,
/// `error`) carry the `correlation_id` of the envelope they answer, so
/// concurrent exchanges multiplex over a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Node → Server: identity and declared capabilities.
    Hello {
        id: String,
        protocol_version: u32,
        node: NodeDescriptor,
        capabilities: Vec<String>,
    },

    /// Server → Node: node registered, session established.
    HelloAck {
        correlation_id: String,
        session_id: String,
        server_version: String,
    },

    /// Node → Server: credential presentation.
    Auth { id: String, token: String },

    /// Server → Node: handshake verdict. A rejected handshake is fatal for
    /// that attempt and is never retried transparently.
    AuthAck {
        correlation_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Bidirectional keepalive. No acknowledgment; any inbound traffic
    /// counts against the idle grace window.
    Heartbeat { timestamp: i64 },

    /// Server → Node: execute a namespaced `plugin.action`.
    Exec {
        id: String,
        action: String,
        params: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    /// Node → Server: result for a previously received `exec`.
    ExecResult {
        correlation_id: String,
        status: ExecStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ExecError>,
    },

    /// Either direction: protocol-level fault report.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        reason: String,
    },
}

impl Envelope {
    /// Decode one wire frame. A malformed frame is a [`ProtocolError`];
    /// the receiver logs and drops it without closing the connection.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Static identity a node presents in `hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Operator-assigned unique identifier (e.g. `"bay-3"`).
    pub node_id: String,
    /// Host platform: `"windows"`, `"darwin"`, `"linux"`.
    pub platform: String,
    /// Node software version.
    pub version: String,
}

/// Outcome carried by `exec_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
}

/// Structured execution failure returned in `exec_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecError {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failure classes a node can report for an `exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgs,
    Denied,
    Failed,
    Timeout,
    NotFound,
    ConnectionLost,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgs => "invalid_args",
            ErrorKind::Denied => "denied",
            ErrorKind::Failed => "failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConnectionLost => "connection_lost",
        };
        f.write_str(s)
    }
}

/// Frame-level protocol fault.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope encode failed: {0}")]
    Encode(String),
}
