//! File-manager plugin: open folders and reveal files on the node's
//! desktop, using whatever file manager the host platform ships.

use std::path::Path;

use serde_json::{json, Value};
use stagehand_node_sdk::{Plugin, PluginError, PluginResult};

pub struct ExplorerPlugin {
    platform: &'static str,
}

impl ExplorerPlugin {
    pub fn new() -> Self {
        Self {
            platform: std::env::consts::OS,
        }
    }

    fn required_path<'a>(&self, params: &'a Value) -> Result<&'a Path, PluginError> {
        params
            .get("path")
            .and_then(|v| v.as_str())
            .map(Path::new)
            .ok_or_else(|| PluginError::InvalidArgs("path is required".into()))
    }

    fn open_folder(&self, params: &Value) -> PluginResult {
        let path = self.required_path(params)?;
        if !path.is_dir() {
            return Err(PluginError::InvalidArgs(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let mut cmd = match self.platform {
            "windows" => {
                let mut c = std::process::Command::new("explorer");
                c.arg(path);
                c
            }
            "macos" => {
                let mut c = std::process::Command::new("open");
                c.arg(path);
                c
            }
            _ => {
                let mut c = std::process::Command::new("xdg-open");
                c.arg(path);
                c
            }
        };
        cmd.spawn()
            .map_err(|e| PluginError::Failed(format!("failed to launch file manager: {e}")))?;

        Ok(json!({ "opened": path.display().to_string() }))
    }

    fn reveal_file(&self, params: &Value) -> PluginResult {
        let path = self.required_path(params)?;
        if !path.exists() {
            return Err(PluginError::NotFound(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let mut cmd = match self.platform {
            "windows" => {
                let mut c = std::process::Command::new("explorer");
                c.arg("/select,").arg(path);
                c
            }
            "macos" => {
                let mut c = std::process::Command::new("open");
                c.arg("-R").arg(path);
                c
            }
            _ => {
                // No portable "select in file manager" on Linux; open the
                // parent directory instead.
                let parent = path.parent().unwrap_or(Path::new("/"));
                let mut c = std::process::Command::new("xdg-open");
                c.arg(parent);
                c
            }
        };
        cmd.spawn()
            .map_err(|e| PluginError::Failed(format!("failed to launch file manager: {e}")))?;

        Ok(json!({ "revealed": path.display().to_string() }))
    }
}

impl Default for ExplorerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Plugin for ExplorerPlugin {
    fn name(&self) -> &str {
        "explorer"
    }

    fn actions(&self) -> Vec<String> {
        vec!["open_folder".into(), "reveal_file".into(), "ping".into()]
    }

    async fn invoke(&self, action: &str, params: Value) -> PluginResult {
        match action {
            "ping" => Ok(json!({ "available": true, "platform": self.platform })),
            "open_folder" => self.open_folder(&params),
            "reveal_file" => self.reveal_file(&params),
            other => Err(PluginError::NotFound(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_reports_platform() {
        let plugin = ExplorerPlugin::new();
        let result = plugin.invoke("ping", json!({})).await.unwrap();
        assert_eq!(result["available"], true);
        assert_eq!(result["platform"], std::env::consts::OS);
    }

    #[tokio::test]
    async fn open_folder_requires_path() {
        let plugin = ExplorerPlugin::new();
        let err = plugin.invoke("open_folder", json!({})).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn open_folder_rejects_non_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let plugin = ExplorerPlugin::new();
        let err = plugin
            .invoke("open_folder", json!({ "path": file.path() }))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn reveal_file_reports_missing_file() {
        let plugin = ExplorerPlugin::new();
        let err = plugin
            .invoke("reveal_file", json!({ "path": "/no/such/file" }))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }
}
