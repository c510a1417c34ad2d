//! Error types shared across the SDK.

use stagehand_protocol::{ErrorKind, ExecError};

/// Result type for plugin invocations.
pub type PluginResult = Result<serde_json::Value, PluginError>;

/// Failures a plugin can report.
///
/// The dispatcher translates these into an `exec_result` with
/// `status: error`; a failing plugin never terminates the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("invalid_args: {0}")]
    InvalidArgs(String),
    #[error("failed: {0}")]
    Failed(String),
    #[error("not_found: {0}")]
    NotFound(String),
}

impl From<&PluginError> for ExecError {
    fn from(err: &PluginError) -> Self {
        let (kind, message) = match err {
            PluginError::InvalidArgs(m) => (ErrorKind::InvalidArgs, m.clone()),
            PluginError::Failed(m) => (ErrorKind::Failed, m.clone()),
            PluginError::NotFound(m) => (ErrorKind::NotFound, m.clone()),
        };
        ExecError { kind, message }
    }
}

/// Top-level client error.
#[derive(Debug, thiserror::Error)]
pub enum NodeClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
