//! Node authentication providers.
//!
//! One contract: given the credential a node presented during the
//! handshake, accept or reject. A rejection is fatal for that handshake
//! attempt and is surfaced to the node — never retried transparently.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Verdict of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Accepted,
    Rejected { reason: String },
}

/// Pluggable credential checker. The static token provider ships today; a
/// delegated-identity checker can slot in without touching the session
/// handling or the registry.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validate `credential` for the node that claims `node_id`.
    async fn authenticate(&self, node_id: &str, credential: &str) -> AuthDecision;
}

/// Pre-shared token checker: per-node tokens take precedence, with an
/// optional fleet-wide fallback token.
pub struct StaticTokenProvider {
    global: Option<String>,
    per_node: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn from_config(auth: &AuthConfig) -> Self {
        Self {
            global: auth.token.clone(),
            per_node: auth.node_tokens.clone(),
        }
    }

    pub fn token_count(&self) -> usize {
        self.per_node.len() + usize::from(self.global.is_some())
    }
}

#[async_trait::async_trait]
impl AuthProvider for StaticTokenProvider {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn authenticate(&self, node_id: &str, credential: &str) -> AuthDecision {
        if credential.is_empty() {
            return AuthDecision::Rejected {
                reason: "missing token".into(),
            };
        }

        if let Some(expected) = self.per_node.get(node_id) {
            if token_eq(expected, credential) {
                return AuthDecision::Accepted;
            }
            // A node with a dedicated token must use it; the fleet token
            // does not apply.
            return AuthDecision::Rejected {
                reason: "invalid token".into(),
            };
        }

        match &self.global {
            Some(expected) if token_eq(expected, credential) => AuthDecision::Accepted,
            Some(_) => AuthDecision::Rejected {
                reason: "invalid token".into(),
            },
            None => AuthDecision::Rejected {
                reason: "no token configured for this node".into(),
            },
        }
    }
}

/// Constant-time token comparison via SHA-256 digest. Hashing normalizes
/// lengths so `ct_eq` always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}
