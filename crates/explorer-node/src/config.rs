//! Node configuration, loaded from TOML at startup.
//!
//! ```toml
//! node_id = "bay-3"
//! server_url = "wss://stagehand.example.com:8765/ws"
//! token = "per-node-secret"
//! heartbeat_interval_secs = 30
//! plugins = ["explorer"]
//!
//! whitelist = ["explorer.ping", "explorer.open_folder"]
//! allowed_paths = ["/projects", "/renders"]
//! ```
//!
//! An empty `allowed_paths` disables path restriction; an omitted
//! `whitelist` allows every explorer action.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: String,

    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Plugins to load. Only `explorer` ships in this binary.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<String>,

    /// Exact `plugin.action` strings this node will execute.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    /// Prefixes the `path` parameter of any action must stay inside.
    /// Empty means unrestricted.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

fn default_server_url() -> String {
    "ws://localhost:8765/ws".into()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_plugins() -> Vec<String> {
    vec!["explorer".into()]
}
fn default_whitelist() -> Vec<String> {
    vec![
        "explorer.ping".into(),
        "explorer.open_folder".into(),
        "explorer.reveal_file".into(),
    ]
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: NodeConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        // Env var wins over the file so the token can stay out of it.
        if let Ok(token) = std::env::var("STAGEHAND_NODE_TOKEN") {
            if !token.is_empty() {
                config.token = token;
            }
        }

        if config.node_id.trim().is_empty() {
            anyhow::bail!("node_id must not be empty");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: NodeConfig = toml::from_str(r#"node_id = "bay-3""#).unwrap();
        assert_eq!(config.server_url, "ws://localhost:8765/ws");
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.plugins, vec!["explorer"]);
        assert_eq!(config.whitelist.len(), 3);
        assert!(config.allowed_paths.is_empty());
    }

    #[test]
    fn full_config_round_trips() {
        let raw = r#"
            node_id = "bay-3"
            server_url = "wss://stagehand.example.com:8765/ws"
            token = "secret"
            heartbeat_interval_secs = 10
            whitelist = ["explorer.ping"]
            allowed_paths = ["/projects"]
        "#;
        let config: NodeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.node_id, "bay-3");
        assert_eq!(config.whitelist, vec!["explorer.ping"]);
        assert_eq!(config.allowed_paths, vec![PathBuf::from("/projects")]);
    }

    #[test]
    fn unknown_keys_rejected() {
        let raw = r#"
            node_id = "bay-3"
            heartbeat = 10
        "#;
        assert!(toml::from_str::<NodeConfig>(raw).is_err());
    }
}
