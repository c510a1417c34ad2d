//! Action gate — decides whether a requested action may execute.
//!
//! The gate runs on both ends of the channel: the server pre-filters
//! known-disallowed actions before spending a round trip, and the node
//! runs the authoritative check immediately before dispatch. A denial is
//! always a structured reason and never partially executes anything.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Why an action was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("malformed action {action:?}: expected \"plugin.action\"")]
    MalformedAction { action: String },
    #[error("plugin {plugin:?} is not among the node's declared capabilities")]
    CapabilityMissing { plugin: String },
    #[error("action {action:?} is not whitelisted for this node")]
    NotWhitelisted { action: String },
    #[error("path {path:?} resolves outside all allowed path prefixes")]
    PathOutsideAllowed { path: String },
}

/// Split a namespaced action into `(plugin, action)`.
pub fn split_action(action: &str) -> Result<(&str, &str), Denial> {
    match action.split_once('.') {
        Some((plugin, rest)) if !plugin.is_empty() && !rest.is_empty() => Ok((plugin, rest)),
        _ => Err(Denial::MalformedAction {
            action: action.to_string(),
        }),
    }
}

/// Check that an action's plugin is among the declared capability set.
///
/// This is the part of the gate the server can always evaluate from the
/// registry alone, even when it has no copy of the node's whitelist.
pub fn check_capability(capabilities: &[String], action: &str) -> Result<(), Denial> {
    let (plugin, _) = split_action(action)?;
    if capabilities.iter().any(|c| c == plugin) {
        return Ok(());
    }
    Err(Denial::CapabilityMissing {
        plugin: plugin.to_string(),
    })
}

/// Static per-node authorization policy. Built once from configuration and
/// consulted read-only at dispatch time; there is no mutation API, so
/// concurrent access needs no locking.
#[derive(Debug, Clone, Default)]
pub struct ActionPolicy {
    whitelist: BTreeSet<String>,
    allowed_paths: Vec<PathBuf>,
}

impl ActionPolicy {
    pub fn new(
        whitelist: impl IntoIterator<Item = String>,
        allowed_paths: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            whitelist: whitelist.into_iter().collect(),
            allowed_paths: allowed_paths.into_iter().collect(),
        }
    }

    pub fn whitelist(&self) -> impl Iterator<Item = &str> {
        self.whitelist.iter().map(String::as_str)
    }

    /// Full authorization check, in order:
    ///
    /// 1. the action's plugin is among `capabilities`;
    /// 2. the exact `plugin.action` string is whitelisted;
    /// 3. if `params` carries a `path`, it must resolve inside one of the
    ///    allowed prefixes — traversal and symlink escapes are denied.
    ///
    /// An empty `allowed_paths` list disables the path check (matching the
    /// node config's documented "unrestricted" mode); an empty whitelist
    /// denies every action.
    pub fn authorize(
        &self,
        capabilities: &[String],
        action: &str,
        params: &serde_json::Value,
    ) -> Result<(), Denial> {
        check_capability(capabilities, action)?;

        if !self.whitelist.contains(action) {
            return Err(Denial::NotWhitelisted {
                action: action.to_string(),
            });
        }

        if let Some(path) = params.get("path").and_then(|v| v.as_str()) {
            self.check_path(path)?;
        }
        Ok(())
    }

    fn check_path(&self, raw: &str) -> Result<(), Denial> {
        if self.allowed_paths.is_empty() {
            return Ok(());
        }

        let deny = || Denial::PathOutsideAllowed {
            path: raw.to_string(),
        };

        let path = Path::new(raw);
        // Relative paths have no anchor to check against a prefix.
        if !path.is_absolute() {
            return Err(deny());
        }
        let normalized = normalize(path).ok_or_else(deny)?;
        // Canonicalize when the path exists so a symlink under an allowed
        // prefix cannot point outside it.
        let resolved = normalized.canonicalize().unwrap_or(normalized);

        for prefix in &self.allowed_paths {
            let prefix = prefix.canonicalize().unwrap_or_else(|_| prefix.clone());
            if resolved.starts_with(&prefix) {
                return Ok(());
            }
        }
        Err(deny())
    }
}

/// Lexically resolve `.` and `..` components. Returns `None` when `..`
/// would climb past the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop =
                    matches!(out.components().next_back(), Some(Component::Normal(_)));
                if !can_pop {
                    return None;
                }
                out.pop();
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn policy(whitelist: &[&str], paths: &[&str]) -> ActionPolicy {
        ActionPolicy::new(
            whitelist.iter().map(|s| s.to_string()),
            paths.iter().map(PathBuf::from),
        )
    }

    #[test]
    fn malformed_actions_rejected() {
        assert!(matches!(
            split_action("ping"),
            Err(Denial::MalformedAction { .. })
        ));
        assert!(split_action(".open").is_err());
        assert!(split_action("explorer.").is_err());
        assert_eq!(
            split_action("explorer.open_folder").unwrap(),
            ("explorer", "open_folder")
        );
        // Sub-namespaced actions keep everything after the first dot.
        assert_eq!(
            split_action("viewer.session.open").unwrap(),
            ("viewer", "session.open")
        );
    }

    #[test]
    fn capability_must_be_declared() {
        let p = policy(&["viewer.ping"], &[]);
        let denial = p
            .authorize(&caps(&["explorer"]), "viewer.ping", &json!({}))
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::CapabilityMissing {
                plugin: "viewer".into()
            }
        );
    }

    #[test]
    fn whitelist_is_exact_even_when_capability_matches() {
        // Node implements explorer, but only ping is whitelisted.
        let p = policy(&["explorer.ping"], &[]);
        assert!(p
            .authorize(&caps(&["explorer"]), "explorer.ping", &json!({}))
            .is_ok());
        let denial = p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({"path": "/tmp"}),
            )
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::NotWhitelisted {
                action: "explorer.open_folder".into()
            }
        );
    }

    #[test]
    fn empty_whitelist_denies_everything() {
        let p = policy(&[], &[]);
        assert!(p
            .authorize(&caps(&["explorer"]), "explorer.ping", &json!({}))
            .is_err());
    }

    #[test]
    fn path_outside_all_prefixes_denied() {
        let p = policy(&["explorer.open_folder"], &["/projects"]);
        let denial = p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({"path": "/etc/passwd"}),
            )
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::PathOutsideAllowed {
                path: "/etc/passwd".into()
            }
        );
    }

    #[test]
    fn traversal_cannot_escape_prefix() {
        let p = policy(&["explorer.open_folder"], &["/projects"]);
        for escape in [
            "/projects/../etc/passwd",
            "/projects/show/../../etc",
            "/projects/./../../root",
        ] {
            assert!(
                p.authorize(
                    &caps(&["explorer"]),
                    "explorer.open_folder",
                    &json!({ "path": escape }),
                )
                .is_err(),
                "should deny {escape}"
            );
        }
        // Traversal that stays inside the prefix is fine.
        assert!(p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({"path": "/projects/show/../other"}),
            )
            .is_ok());
    }

    #[test]
    fn relative_path_denied_when_prefixes_configured() {
        let p = policy(&["explorer.open_folder"], &["/projects"]);
        assert!(p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({"path": "show/seq_010"}),
            )
            .is_err());
    }

    #[test]
    fn no_prefixes_means_no_path_check() {
        let p = policy(&["explorer.open_folder"], &[]);
        assert!(p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({"path": "/anywhere/at/all"}),
            )
            .is_ok());
    }

    #[test]
    fn actions_without_path_skip_path_check() {
        let p = policy(&["explorer.ping"], &["/projects"]);
        assert!(p
            .authorize(&caps(&["explorer"]), "explorer.ping", &json!({}))
            .is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_prefix_denied() {
        let outside = tempfile::tempdir().unwrap();
        let allowed = tempfile::tempdir().unwrap();
        let link = allowed.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let p = ActionPolicy::new(
            ["explorer.open_folder".to_string()],
            [allowed.path().to_path_buf()],
        );
        let denial = p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({ "path": link.to_str().unwrap() }),
            )
            .unwrap_err();
        assert!(matches!(denial, Denial::PathOutsideAllowed { .. }));

        // A real directory under the prefix is allowed.
        let inside = allowed.path().join("show");
        std::fs::create_dir(&inside).unwrap();
        assert!(p
            .authorize(
                &caps(&["explorer"]),
                "explorer.open_folder",
                &json!({ "path": inside.to_str().unwrap() }),
            )
            .is_ok());
    }
}
