//! In-memory registry of connected nodes and their declared capabilities.
//!
//! The live set: a node appears here if and only if it currently holds a
//! connected session. Nothing survives a disconnect; every handshake
//! re-declares everything.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use stagehand_protocol::{Envelope, NodeDescriptor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle to one live session: the outbound sink plus the token that
/// closes it. Cloned freely; the WebSocket task owns the other ends.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub sink: mpsc::Sender<Envelope>,
    pub closed: CancellationToken,
}

impl SessionHandle {
    pub fn new(sink: mpsc::Sender<Envelope>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            sink,
            closed: CancellationToken::new(),
        }
    }

    /// Ask the owning WebSocket task to shut the connection down.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// A connected node.
pub struct ConnectedNode {
    pub descriptor: NodeDescriptor,
    pub capabilities: Vec<String>,
    pub session: SessionHandle,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Point-in-time view returned by lookups and list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub platform: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl From<&ConnectedNode> for NodeSnapshot {
    fn from(n: &ConnectedNode) -> Self {
        Self {
            node_id: n.descriptor.node_id.clone(),
            platform: n.descriptor.platform.clone(),
            version: n.descriptor.version.clone(),
            capabilities: n.capabilities.clone(),
            session_id: n.session.session_id.clone(),
            connected_at: n.connected_at,
            last_heartbeat: n.last_heartbeat,
        }
    }
}

/// Thread-safe registry of all connected nodes. Critical sections are
/// short; no lock is held across a network wait.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, ConnectedNode>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Install a freshly handshaken node. Last writer wins per node id:
    /// any live session for the same id is returned so the caller can
    /// close it, preventing split-brain duplicates. The new handshake's
    /// capability set fully replaces the previous one.
    pub fn register(&self, node: ConnectedNode) -> Option<SessionHandle> {
        let id = node.descriptor.node_id.clone();
        tracing::info!(
            node_id = %id,
            platform = %node.descriptor.platform,
            capabilities = node.capabilities.len(),
            session_id = %node.session.session_id,
            "node registered"
        );
        self.nodes
            .write()
            .insert(id, node)
            .map(|previous| previous.session)
    }

    /// Remove a node, but only if `session_id` still matches the stored
    /// session — a stale disconnect handler must not evict the newer
    /// session that superseded it. Returns whether the entry was removed.
    pub fn unregister(&self, node_id: &str, session_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get(node_id) {
            Some(n) if n.session.session_id == session_id => {
                nodes.remove(node_id);
                tracing::info!(node_id = %node_id, session_id = %session_id, "node removed");
                true
            }
            _ => false,
        }
    }

    /// Update the last-heartbeat timestamp (called on any inbound traffic).
    pub fn touch(&self, node_id: &str) {
        if let Some(node) = self.nodes.write().get_mut(node_id) {
            node.last_heartbeat = Utc::now();
        }
    }

    pub fn lookup(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.nodes.read().get(node_id).map(NodeSnapshot::from)
    }

    /// Session handle for a node, used by the router to write `exec`
    /// envelopes.
    pub fn session_of(&self, node_id: &str) -> Option<SessionHandle> {
        self.nodes.read().get(node_id).map(|n| n.session.clone())
    }

    pub fn capabilities_of(&self, node_id: &str) -> Option<Vec<String>> {
        self.nodes.read().get(node_id).map(|n| n.capabilities.clone())
    }

    /// Snapshot of all connected nodes — a point-in-time view, not a live
    /// cursor.
    pub fn list(&self) -> Vec<NodeSnapshot> {
        self.nodes.read().values().map(NodeSnapshot::from).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Sessions with no traffic for longer than `grace_secs`. The sweep
    /// task closes them; eviction then happens through the normal
    /// disconnect path so pending commands fail too.
    pub fn stale_sessions(&self, grace_secs: i64) -> Vec<SessionHandle> {
        let now = Utc::now();
        self.nodes
            .read()
            .values()
            .filter(|n| {
                now.signed_duration_since(n.last_heartbeat).num_seconds() > grace_secs
            })
            .map(|n| n.session.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(node_id: &str, capabilities: &[&str]) -> (ConnectedNode, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(8);
        let node = ConnectedNode {
            descriptor: NodeDescriptor {
                node_id: node_id.into(),
                platform: "linux".into(),
                version: "0.1.0".into(),
            },
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            session: SessionHandle::new(tx),
            connected_at: Utc::now(),
            last_heartbeat: Utc::now(),
        };
        (node, rx)
    }

    #[test]
    fn listed_iff_connected() {
        let reg = NodeRegistry::new();
        assert!(reg.is_empty());

        let (node, _rx) = make_node("bay-3", &["explorer"]);
        let session_id = node.session.session_id.clone();
        assert!(reg.register(node).is_none());
        assert_eq!(reg.list().len(), 1);
        assert!(reg.lookup("bay-3").is_some());

        assert!(reg.unregister("bay-3", &session_id));
        assert!(reg.lookup("bay-3").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn register_supersedes_and_returns_old_session() {
        let reg = NodeRegistry::new();
        let (first, _rx1) = make_node("bay-3", &["explorer"]);
        let first_session = first.session.session_id.clone();
        reg.register(first);

        let (second, _rx2) = make_node("bay-3", &["explorer", "viewer"]);
        let superseded = reg.register(second).expect("old session returned");
        assert_eq!(superseded.session_id, first_session);

        // Still exactly one entry, with the new capability set.
        assert_eq!(reg.len(), 1);
        assert_eq!(
            reg.capabilities_of("bay-3").unwrap(),
            vec!["explorer", "viewer"]
        );
    }

    #[test]
    fn stale_unregister_does_not_evict_newer_session() {
        let reg = NodeRegistry::new();
        let (first, _rx1) = make_node("bay-3", &["explorer"]);
        let stale_session = first.session.session_id.clone();
        reg.register(first);

        let (second, _rx2) = make_node("bay-3", &["explorer"]);
        reg.register(second);

        // The first connection's disconnect handler fires late.
        assert!(!reg.unregister("bay-3", &stale_session));
        assert_eq!(reg.len(), 1, "newer session must survive");
    }

    #[test]
    fn capability_set_fully_replaced_on_reconnect() {
        let reg = NodeRegistry::new();
        let (first, _rx1) = make_node("bay-3", &["explorer", "viewer"]);
        reg.register(first);

        // Reconnect with viewer removed from config.
        let (second, _rx2) = make_node("bay-3", &["explorer"]);
        reg.register(second);
        assert_eq!(reg.capabilities_of("bay-3").unwrap(), vec!["explorer"]);
    }

    #[test]
    fn stale_sessions_by_heartbeat_age() {
        let reg = NodeRegistry::new();
        let (mut node, _rx) = make_node("bay-3", &[]);
        node.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        reg.register(node);

        assert_eq!(reg.stale_sessions(90).len(), 1);
        assert!(reg.stale_sessions(300).is_empty());

        reg.touch("bay-3");
        assert!(reg.stale_sessions(90).is_empty());
    }
}
