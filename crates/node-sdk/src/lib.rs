//! `stagehand-node-sdk` — building blocks for Stagehand nodes.
//!
//! A node is any workstation process that holds a persistent WebSocket to
//! the Stagehand server, declares its plugins, and executes whitelisted
//! actions on request. This crate owns connection management, the
//! handshake, heartbeat, the authoritative action gate, and plugin
//! dispatch, so node authors only implement [`Plugin`].
//!
//! # Connection flow
//!
//! 1. Dial the server WebSocket.
//! 2. Send `hello { node_id, platform, capabilities }` then `auth { token }`.
//! 3. Await `auth_ack` — a rejection is fatal and surfaced; a timeout is
//!    retried as a transient failure.
//! 4. Main loop: gate and dispatch `exec` envelopes (always answering with
//!    `exec_result`), emit periodic `heartbeat`s, and force a reconnect
//!    when no traffic arrives within the idle grace window.
//! 5. On disconnect: reconnect with jittered exponential backoff; the
//!    backoff resets only after a sustained connected period.
//!
//! # Example
//!
//! ```rust,no_run
//! use stagehand_node_sdk::{NodeClientBuilder, PluginRegistry};
//! use stagehand_protocol::ActionPolicy;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut plugins = PluginRegistry::new();
//! // plugins.register(ExplorerPlugin::new());
//!
//! NodeClientBuilder::new()
//!     .server_url("ws://localhost:8765/ws")
//!     .node_id("bay-3")
//!     .token("secret")
//!     .policy(ActionPolicy::new(
//!         ["explorer.ping".to_string()],
//!         ["/projects".into()],
//!     ))
//!     .build()?
//!     .run(plugins, CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod dispatch;
pub mod plugins;
pub mod reconnect;
pub mod session;
pub mod types;

pub use builder::NodeClientBuilder;
pub use client::NodeClient;
pub use dispatch::dispatch;
pub use plugins::{Plugin, PluginRegistry};
pub use reconnect::ReconnectBackoff;
pub use session::{SessionEvent, SessionState};
pub use types::{NodeClientError, PluginError, PluginResult};

// Re-export the protocol so nodes rarely need stagehand-protocol directly.
pub use stagehand_protocol::{
    ActionPolicy, Denial, Envelope, ErrorKind, ExecError, ExecStatus, NodeDescriptor,
    PROTOCOL_VERSION,
};
