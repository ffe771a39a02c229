//! Test doubles for the scheduler's collaborators.
//!
//! Deterministic stand-ins for the clock, manifest fetcher, invoker, and
//! wallet resolver. Everything records what it saw so tests can assert on
//! invocation counts and arguments.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::clock::Clock;
use crate::hire::WalletRef;
use crate::invoker::{InvocationArgs, Invoker, WalletHandle, WalletResolver};
use crate::manifest::{AgentManifest, ManifestError, ManifestFetcher};

/// A clock that only moves when told to.
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Start the clock at an epoch-milliseconds instant.
    pub fn at_epoch_ms(ms: i64) -> Self {
        Self::new(DateTime::<Utc>::from_timestamp_millis(ms).expect("valid epoch ms"))
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = instant;
    }

    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::milliseconds(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Build a manifest exposing the given entrypoint keys.
pub fn manifest_with_entrypoints(keys: &[&str]) -> AgentManifest {
    AgentManifest {
        name: Some("test-agent".to_string()),
        description: None,
        entrypoints: keys
            .iter()
            .map(|key| ((*key).to_string(), json!({})))
            .collect(),
        extra: HashMap::new(),
    }
}

/// Manifest fetcher serving programmed responses.
#[derive(Default)]
pub struct StaticManifestFetcher {
    manifests: RwLock<HashMap<String, AgentManifest>>,
    failures: RwLock<HashMap<String, String>>,
    fetches: RwLock<Vec<String>>,
}

impl StaticManifestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this manifest for the given URL.
    pub fn insert(&self, manifest_url: impl Into<String>, manifest: AgentManifest) {
        self.manifests
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(manifest_url.into(), manifest);
    }

    /// Make fetches for the given URL fail with a network error.
    pub fn fail_with(&self, manifest_url: impl Into<String>, message: impl Into<String>) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(manifest_url.into(), message.into());
    }

    /// Stop failing fetches for the given URL.
    pub fn clear_failure(&self, manifest_url: &str) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(manifest_url);
    }

    /// How many times the given URL was fetched.
    pub fn fetch_count(&self, manifest_url: &str) -> usize {
        self.fetches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|url| url.as_str() == manifest_url)
            .count()
    }
}

#[async_trait]
impl ManifestFetcher for StaticManifestFetcher {
    async fn fetch(&self, manifest_url: &str) -> Result<AgentManifest, ManifestError> {
        self.fetches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(manifest_url.to_string());

        if let Some(message) = self
            .failures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(manifest_url)
        {
            return Err(ManifestError::Network(message.clone()));
        }

        self.manifests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(manifest_url)
            .cloned()
            .ok_or_else(|| ManifestError::Status {
                status: 404,
                url: manifest_url.to_string(),
            })
    }
}

/// Invoker that records every call and fails on demand.
#[derive(Default)]
pub struct MockInvoker {
    invocations: RwLock<Vec<InvocationArgs>>,
    failures: RwLock<VecDeque<String>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure; each queued message fails exactly one invocation, in
    /// order, before the invoker goes back to succeeding.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message.into());
    }

    pub fn invocations(&self) -> Vec<InvocationArgs> {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn was_invoked_for(&self, job_id: Uuid) -> bool {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|args| args.job_id == job_id)
    }
}

#[async_trait]
impl Invoker for MockInvoker {
    async fn invoke(&self, args: InvocationArgs) -> Result<serde_json::Value> {
        self.invocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(args);

        let failure = self
            .failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match failure {
            Some(message) => Err(anyhow!(message)),
            None => Ok(json!({ "ok": true })),
        }
    }
}

/// Wallet resolver returning a synthetic handle per reference.
#[derive(Default)]
pub struct MockWalletResolver {
    resolutions: RwLock<Vec<String>>,
}

impl MockWalletResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution_count(&self) -> usize {
        self.resolutions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl WalletResolver for MockWalletResolver {
    async fn resolve(&self, wallet: &WalletRef) -> Result<WalletHandle> {
        self.resolutions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(wallet.id.clone());

        Ok(json!({
            "walletId": wallet.id,
            "address": wallet.address,
            "materialized": true,
        }))
    }
}
