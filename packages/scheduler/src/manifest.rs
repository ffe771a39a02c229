//! Agent manifest fetching.
//!
//! A hire binds a client to a remote agent discovered through its capability
//! descriptor (the "agent card"), served from a well-known URL. The fetcher
//! retrieves and parses that descriptor; the runtime caches it per hire with
//! a TTL, so the fetcher itself stays cache-free.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Path probed when the manifest URL does not already name a document.
const WELL_KNOWN_PATH: &str = "/.well-known/agent.json";

/// Errors from manifest retrieval.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest URL could not be parsed or resolved.
    #[error("invalid manifest url {url}: {reason}")]
    Url { url: String, reason: String },

    /// Network-level failure (connection refused, timeout, DNS).
    #[error("manifest fetch failed: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("manifest fetch returned status {status} for {url}")]
    Status { status: u16, url: String },

    /// The response body was not a valid manifest document.
    #[error("manifest parse failed: {0}")]
    Parse(String),
}

/// The agent's capability descriptor.
///
/// Only `entrypoints` is interpreted by the scheduler; everything else is
/// carried opaquely so the full card reaches the invoker unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Named operations the agent exposes, keyed by entrypoint key.
    /// Descriptor shapes vary per agent and are not inspected here.
    #[serde(default)]
    pub entrypoints: HashMap<String, serde_json::Value>,

    /// Remaining card fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AgentManifest {
    /// Whether the card names the given entrypoint.
    pub fn has_entrypoint(&self, key: &str) -> bool {
        self.entrypoints.contains_key(key)
    }
}

/// Retrieves an agent manifest from its URL.
///
/// Well-known path resolution is the fetcher's concern; callers hand over the
/// URL exactly as the client supplied it.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, manifest_url: &str) -> Result<AgentManifest, ManifestError>;
}

/// HTTP manifest fetcher.
#[derive(Clone, Default)]
pub struct HttpManifestFetcher {
    http_client: reqwest::Client,
}

impl HttpManifestFetcher {
    /// Create a fetcher with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    /// Create a fetcher reusing an existing HTTP client.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Resolve the URL the manifest document is actually served from.
    ///
    /// A URL whose path already names a JSON document is used as-is;
    /// otherwise the well-known agent card path is joined onto the origin.
    pub fn resolve_manifest_url(manifest_url: &str) -> Result<Url, ManifestError> {
        let parsed = Url::parse(manifest_url).map_err(|e| ManifestError::Url {
            url: manifest_url.to_string(),
            reason: e.to_string(),
        })?;

        if parsed.path().ends_with(".json") {
            return Ok(parsed);
        }

        let mut resolved = parsed;
        resolved.set_path(WELL_KNOWN_PATH);
        resolved.set_query(None);
        resolved.set_fragment(None);
        Ok(resolved)
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, manifest_url: &str) -> Result<AgentManifest, ManifestError> {
        let resolved = Self::resolve_manifest_url(manifest_url)?;
        debug!(url = %resolved, "fetching agent manifest");

        let response = self
            .http_client
            .get(resolved.clone())
            .send()
            .await
            .map_err(|e| ManifestError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManifestError::Status {
                status: status.as_u16(),
                url: resolved.to_string(),
            });
        }

        response
            .json::<AgentManifest>()
            .await
            .map_err(|e| ManifestError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_origin_resolves_to_well_known_path() {
        let resolved = HttpManifestFetcher::resolve_manifest_url("https://agent.example.com")
            .unwrap();
        assert_eq!(
            resolved.as_str(),
            "https://agent.example.com/.well-known/agent.json"
        );
    }

    #[test]
    fn path_without_document_resolves_to_well_known_path() {
        let resolved =
            HttpManifestFetcher::resolve_manifest_url("https://agent.example.com/agents/alpha")
                .unwrap();
        assert_eq!(
            resolved.as_str(),
            "https://agent.example.com/.well-known/agent.json"
        );
    }

    #[test]
    fn explicit_document_url_is_used_as_is() {
        let resolved = HttpManifestFetcher::resolve_manifest_url(
            "https://agent.example.com/cards/alpha.json",
        )
        .unwrap();
        assert_eq!(
            resolved.as_str(),
            "https://agent.example.com/cards/alpha.json"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = HttpManifestFetcher::resolve_manifest_url("not a url").unwrap_err();
        assert!(matches!(err, ManifestError::Url { .. }));
    }

    #[test]
    fn manifest_parses_entrypoints_and_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "name": "summarizer",
            "entrypoints": {
                "summarize": { "description": "Summarize a document" },
                "translate": {}
            },
            "version": "1.2.0",
            "payments": { "x402": true }
        });

        let manifest: AgentManifest = serde_json::from_value(raw).unwrap();
        assert!(manifest.has_entrypoint("summarize"));
        assert!(manifest.has_entrypoint("translate"));
        assert!(!manifest.has_entrypoint("classify"));
        assert_eq!(manifest.name.as_deref(), Some("summarizer"));
        assert!(manifest.extra.contains_key("version"));
        assert!(manifest.extra.contains_key("payments"));
    }

    #[test]
    fn manifest_without_entrypoints_parses_empty() {
        let manifest: AgentManifest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(manifest.entrypoints.is_empty());
    }
}
