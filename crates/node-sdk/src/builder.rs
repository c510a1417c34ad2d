//! Builder pattern for constructing a [`NodeClient`].

use std::sync::Arc;
use std::time::Duration;

use stagehand_protocol::ActionPolicy;

use crate::client::NodeClient;
use crate::reconnect::ReconnectBackoff;
use crate::types::NodeClientError;

/// Fluent builder for [`NodeClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use stagehand_node_sdk::NodeClientBuilder;
/// # use stagehand_protocol::ActionPolicy;
/// let client = NodeClientBuilder::new()
///     .server_url("ws://localhost:8765/ws")
///     .node_id("bay-3")
///     .token("secret")
///     .policy(ActionPolicy::new(
///         ["explorer.ping".to_string()],
///         ["/projects".into()],
///     ))
///     .build()
///     .unwrap();
/// ```
pub struct NodeClientBuilder {
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
    pub(crate) policy: ActionPolicy,
}

impl NodeClientBuilder {
    pub fn new() -> Self {
        Self {
            server_url: "ws://localhost:8765/ws".into(),
            token: String::new(),
            node_id: "unnamed-node".into(),
            platform: std::env::consts::OS.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            heartbeat_interval: Duration::from_secs(30),
            idle_grace: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(10),
            reconnect_backoff: ReconnectBackoff::default(),
            max_concurrent_execs: 16,
            policy: ActionPolicy::default(),
        }
    }

    /// Server WebSocket URL (e.g. `wss://stagehand.example.com/ws`).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Credential presented in the `auth` envelope.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Operator-assigned stable node identifier.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = id.into();
        self
    }

    /// Host platform reported in `hello` (default: compile-time OS).
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Version string reported in `hello`.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Interval between outbound heartbeats (default 30s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// Silence window after which the connection is forcibly re-dialed
    /// (default 90s). Any inbound traffic resets it.
    pub fn idle_grace(mut self, d: Duration) -> Self {
        self.idle_grace = d;
        self
    }

    /// How long to wait for `auth_ack` before treating the handshake as a
    /// transient failure (default 10s).
    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Maximum concurrently executing actions (default 16).
    pub fn max_concurrent_execs(mut self, n: usize) -> Self {
        self.max_concurrent_execs = n;
        self
    }

    /// Authoritative action gate for this node: whitelist plus allowed
    /// filesystem prefixes.
    pub fn policy(mut self, policy: ActionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<NodeClient, NodeClientError> {
        if self.server_url.is_empty() {
            return Err(NodeClientError::Config("server_url is required".into()));
        }
        if self.node_id.is_empty() {
            return Err(NodeClientError::Config("node_id is required".into()));
        }

        Ok(NodeClient {
            server_url: self.server_url,
            token: self.token,
            node_id: self.node_id,
            platform: self.platform,
            version: self.version,
            heartbeat_interval: self.heartbeat_interval,
            idle_grace: self.idle_grace,
            handshake_timeout: self.handshake_timeout,
            reconnect_backoff: self.reconnect_backoff,
            max_concurrent_execs: self.max_concurrent_execs,
            policy: Arc::new(self.policy),
        })
    }
}

impl Default for NodeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
