//! Alert payloads: raw inbound alerts and their enriched form

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::priority::Priority;
use super::role::ResponderRole;

/// Prefix for derived alert identifiers
const DERIVED_ID_PREFIX: &str = "alert-";

/// Alert as received on the `alerts` channel
///
/// Only `labels`, `annotations` and `status` are interpreted; anything else the
/// source sends is carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawAlert {
    /// Get a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Get an annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Alert name, from the conventional `alertname` label
    pub fn name(&self) -> Option<&str> {
        self.label("alertname")
    }

    /// Caller-supplied id, or one derived from the alert content
    pub fn resolve_id(&self) -> String {
        match self.alert_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_alert_id(self),
        }
    }
}

/// Derive a deterministic identifier from alert content
///
/// The id field itself is excluded, so the same alert content always maps to
/// the same identifier no matter how often it is redelivered.
pub fn derive_alert_id(alert: &RawAlert) -> String {
    let mut content = alert.clone();
    content.alert_id = None;
    let canonical = serde_json::to_vec(&content).unwrap_or_default();
    let id = format!("{}{}", DERIVED_ID_PREFIX, Uuid::new_v5(&Uuid::NAMESPACE_OID, &canonical));
    debug!(%id, "derive_alert_id: derived");
    id
}

/// Context handed to analyzers for scoping their backend queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Alert payload plus the fields derived at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAlert {
    pub alert_id: String,

    pub received_at: DateTime<Utc>,

    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_responder: Option<ResponderRole>,

    #[serde(default)]
    pub secondary_responders: Vec<ResponderRole>,

    #[serde(default)]
    pub search_context: SearchContext,

    pub alert: RawAlert,
}

impl EnrichedAlert {
    /// Wrap a raw alert with default enrichment
    pub fn new(alert: RawAlert) -> Self {
        let alert_id = alert.resolve_id();
        Self {
            alert_id,
            received_at: Utc::now(),
            priority: Priority::default(),
            primary_responder: None,
            secondary_responders: Vec::new(),
            search_context: SearchContext::default(),
            alert,
        }
    }
}
