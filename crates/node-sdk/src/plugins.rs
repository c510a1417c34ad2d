//! Plugin contract and registry.
//!
//! A plugin is a named unit of executable actions (a file manager, a
//! review-tool bridge). The SDK owns routing and authorization; plugins
//! only declare what they can do and execute it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::PluginResult;

/// Implement this to expose actions on a node.
///
/// # Example
///
/// ```rust,no_run
/// use stagehand_node_sdk::{Plugin, PluginResult};
///
/// struct Probe;
///
/// #[async_trait::async_trait]
/// impl Plugin for Probe {
///     fn name(&self) -> &str {
///         "probe"
///     }
///
///     fn actions(&self) -> Vec<String> {
///         vec!["ping".into()]
///     }
///
///     async fn invoke(&self, _action: &str, _params: serde_json::Value) -> PluginResult {
///         Ok(serde_json::json!({ "pong": true }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Plugin identifier, the namespace in `"plugin.action"` routing.
    fn name(&self) -> &str;

    /// Action names this plugin answers. By convention every plugin also
    /// answers `ping` as an availability probe.
    fn actions(&self) -> Vec<String>;

    /// Execute one action. `action` is the part after the namespace dot
    /// and is guaranteed to be in [`actions`](Self::actions) membership
    /// checked by the dispatcher.
    async fn invoke(&self, action: &str, params: serde_json::Value) -> PluginResult;
}

/// Maps plugin names to implementations. Built once at startup; the names
/// become the capability set declared in `hello`.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its declared name. Returns `&mut Self` for
    /// chaining.
    pub fn register<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        self.plugins
            .insert(plugin.name().to_string(), Arc::new(plugin));
        self
    }

    pub fn register_boxed(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Declared capability set, sorted for a stable `hello`.
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
