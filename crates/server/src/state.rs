//! Shared server state handed to every handler.

use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::ServerConfig;
use crate::registry::NodeRegistry;
use crate::router::CommandRouter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub nodes: Arc<NodeRegistry>,
    pub router: Arc<CommandRouter>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(config: ServerConfig, auth: Arc<dyn AuthProvider>) -> Self {
        let config = Arc::new(config);
        let nodes = Arc::new(NodeRegistry::new());
        let router = Arc::new(CommandRouter::new(
            nodes.clone(),
            config.whitelists.clone(),
            config.default_timeout_secs,
            config.max_inflight_per_node,
            config.max_inflight_global,
        ));
        Self {
            config,
            nodes,
            router,
            auth,
        }
    }
}
