//! Hire model.
//!
//! A hire is the persistent binding between a client and a remote agent's
//! manifest, optionally carrying a payment wallet reference that the core
//! passes through to the invoker without interpreting it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::manifest::AgentManifest;

/// Hire lifecycle states. `Canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HireStatus {
    #[default]
    Active,
    Paused,
    Canceled,
}

impl HireStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HireStatus::Active => "active",
            HireStatus::Paused => "paused",
            HireStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(HireStatus::Active),
            "paused" => Some(HireStatus::Paused),
            "canceled" => Some(HireStatus::Canceled),
            _ => None,
        }
    }
}

/// Opaque payment-wallet reference.
///
/// Forwarded verbatim to the invoker; the scheduler never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRef {
    pub id: String,
    pub address: String,
    pub chain: String,
    pub chain_type: String,
    pub provider: String,
}

/// The agent side of a hire: manifest URL plus the cached card.
///
/// `card` and `cached_at` are either both present or both absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBinding {
    pub manifest_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<AgentManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

/// A persistent binding between a client and a remote agent.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct Hire {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub agent: AgentBinding,

    #[builder(default)]
    pub wallet: Option<WalletRef>,

    #[builder(default)]
    pub status: HireStatus,

    #[builder(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Hire {
    pub fn is_canceled(&self) -> bool {
        self.status == HireStatus::Canceled
    }

    /// Whether the cached card is still usable under the given TTL.
    ///
    /// A hire with no cached card is never fresh.
    pub fn card_is_fresh(&self, now: DateTime<Utc>, ttl_ms: i64) -> bool {
        match (self.agent.card.as_ref(), self.agent.cached_at) {
            (Some(_), Some(cached_at)) => {
                now.signed_duration_since(cached_at).num_milliseconds() < ttl_ms
            }
            _ => false,
        }
    }

    /// Replace the cached card, stamping the cache instant.
    pub fn set_card(&mut self, card: AgentManifest, now: DateTime<Utc>) {
        self.agent.card = Some(card);
        self.agent.cached_at = Some(now);
        self.updated_at = now;
    }
}
