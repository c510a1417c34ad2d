//! Server configuration, loaded from TOML at startup.
//!
//! ```toml
//! bind = "0.0.0.0:8765"
//! default_timeout_secs = 30
//! heartbeat_interval_secs = 30
//! heartbeat_grace_secs = 90
//!
//! [auth]
//! token = "fleet-wide-secret"
//! [auth.node_tokens]
//! bay-3 = "per-node-secret"
//!
//! # Optional server-side pre-filter whitelists (the node still runs the
//! # authoritative check).
//! [whitelists]
//! bay-3 = ["explorer.ping", "explorer.open_folder"]
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Default deadline for a command when the caller sets none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Interval between server→node heartbeats on each session. Keeps an
    /// idle node's inbound channel alive inside its own grace window.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Sessions silent for longer than this are closed by the sweep task.
    #[serde(default = "default_grace_secs")]
    pub heartbeat_grace_secs: u64,

    /// In-flight command cap per node (0 = unlimited).
    #[serde(default = "default_inflight_per_node")]
    pub max_inflight_per_node: usize,

    /// In-flight command cap across all nodes (0 = unlimited).
    #[serde(default = "default_inflight_global")]
    pub max_inflight_global: usize,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-node action whitelists used for server-side pre-filtering.
    /// Nodes without an entry are only capability-checked here.
    #[serde(default)]
    pub whitelists: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Fleet-wide pre-shared token.
    pub token: Option<String>,
    /// Per-node tokens; take precedence over the fleet-wide token.
    #[serde(default)]
    pub node_tokens: HashMap<String, String>,
}

fn default_bind() -> String {
    "0.0.0.0:8765".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_grace_secs() -> u64 {
    90
}
fn default_inflight_per_node() -> usize {
    32
}
fn default_inflight_global() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_timeout_secs: default_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            heartbeat_grace_secs: default_grace_secs(),
            max_inflight_per_node: default_inflight_per_node(),
            max_inflight_global: default_inflight_global(),
            auth: AuthConfig::default(),
            whitelists: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: ServerConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        // Env var wins over the file so tokens can stay out of it.
        if let Ok(token) = std::env::var("STAGEHAND_TOKEN") {
            if !token.is_empty() {
                config.auth.token = Some(token);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.bind, "0.0.0.0:8765");
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.heartbeat_grace_secs, 90);
        assert!(config.auth.token.is_none());
        assert!(config.whitelists.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind = "127.0.0.1:9000"
            default_timeout_secs = 10

            [auth]
            token = "fleet"
            [auth.node_tokens]
            bay-3 = "special"

            [whitelists]
            bay-3 = ["explorer.ping"]
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.auth.token.as_deref(), Some("fleet"));
        assert_eq!(config.auth.node_tokens["bay-3"], "special");
        assert_eq!(config.whitelists["bay-3"], vec!["explorer.ping"]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<ServerConfig>("bindd = \"oops\"").is_err());
    }
}
