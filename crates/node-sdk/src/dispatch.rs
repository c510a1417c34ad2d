//! Capability dispatcher — routes an authorized action to its plugin.
//!
//! Runs after the action gate has said yes. Whatever the plugin does
//! (returns an error, panics), the caller always gets a structured result;
//! a failing plugin never terminates the session.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use stagehand_protocol::{split_action, ErrorKind, ExecError};

use crate::plugins::PluginRegistry;

/// Invoke the plugin implementing `action` and wrap any failure.
pub async fn dispatch(
    plugins: &PluginRegistry,
    action: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, ExecError> {
    let (plugin_name, action_name) = split_action(action).map_err(|d| ExecError {
        kind: ErrorKind::InvalidArgs,
        message: d.to_string(),
    })?;

    let plugin = plugins.get(plugin_name).ok_or_else(|| ExecError {
        kind: ErrorKind::NotFound,
        message: format!("plugin not available: {plugin_name}"),
    })?;

    if !plugin.actions().iter().any(|a| a == action_name) {
        return Err(ExecError {
            kind: ErrorKind::NotFound,
            message: format!(
                "action not available: {action_name} (plugin {plugin_name} offers: {})",
                plugin.actions().join(", ")
            ),
        });
    }

    // catch_unwind: a panicking plugin still produces an exec_result.
    let invoked = AssertUnwindSafe(plugin.invoke(action_name, params))
        .catch_unwind()
        .await;

    match invoked {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(err)) => Err(ExecError::from(&err)),
        Err(_panic) => {
            tracing::error!(action = %action, "plugin panicked during invoke");
            Err(ExecError {
                kind: ErrorKind::Failed,
                message: format!("plugin {plugin_name} panicked"),
            })
        }
    }
}
