//! Collaborator contracts: invoker and wallet resolver.
//!
//! The scheduler never speaks the agent wire protocol itself. One agent call
//! is modeled as [`Invoker::invoke`]; concrete bindings (protocol clients,
//! payment-wrapped HTTP stacks) live with the embedder. Wallet handling is
//! likewise a pass-through: the hire's [`WalletRef`] is materialized by the
//! optional [`WalletResolver`] and both travel to the invoker untouched.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::hire::WalletRef;
use crate::manifest::AgentManifest;

/// Opaque materialized wallet, produced by the resolver and consumed by the
/// invoker.
pub type WalletHandle = serde_json::Value;

/// Everything the invoker needs for one agent call.
#[derive(Debug, Clone)]
pub struct InvocationArgs {
    /// The hire's cached agent card at invocation time.
    pub manifest: AgentManifest,
    pub entrypoint_key: String,
    /// Opaque job input, forwarded without inspection.
    pub input: serde_json::Value,
    pub job_id: Uuid,
    /// Invokers are expected to be idempotent w.r.t. this key when present.
    pub idempotency_key: Option<String>,
    pub wallet_ref: Option<WalletRef>,
    pub wallet_handle: Option<WalletHandle>,
}

/// Performs one agent call.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, args: InvocationArgs) -> Result<serde_json::Value>;
}

/// Higher-level collaborator that yields a composed invoker.
///
/// Adapters that carry a payment-capable fetch (402-style settlement) are
/// expected to return an invoker that already routes its HTTP traffic through
/// it; the runtime then uses that invoker for every call without knowing
/// about payments.
pub trait InvokerAdapter: Send + Sync {
    fn invoker(&self) -> Arc<dyn Invoker>;
}

/// Materializes a wallet handle from the hire's opaque wallet reference.
#[async_trait]
pub trait WalletResolver: Send + Sync {
    async fn resolve(&self, wallet: &WalletRef) -> Result<WalletHandle>;
}
