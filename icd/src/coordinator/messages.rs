//! Wire messages exchanged with analyzers and downstream stages

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AlertSession, EnrichedAlert, ResponderRole, SessionStatus};

/// Analyzer answer from the shared `responses` channel
///
/// Only `agent` and `alert_id` are interpreted. The whole message is kept as
/// the role's payload so analyzer-specific fields reach the aggregate intact.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerResponse {
    pub agent: ResponderRole,
    pub alert_id: String,
    pub body: Value,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    agent: ResponderRole,
    alert_id: String,
}

impl AnalyzerResponse {
    /// Decode a raw `responses` payload
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let body: Value = serde_json::from_str(raw)?;
        let envelope = ResponseEnvelope::deserialize(&body)?;
        Ok(Self {
            agent: envelope.agent,
            alert_id: envelope.alert_id,
            body,
        })
    }
}

/// Payload published on `root_cause_analysis` when a session closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatePayload {
    pub alert_id: String,

    /// `COMPLETED` or `DEGRADED`
    pub status: SessionStatus,

    /// True when at least one expected role did not answer
    pub partial: bool,

    /// True when no expected role answered at all
    pub fully_missing: bool,

    pub alert: EnrichedAlert,

    pub responses: BTreeMap<ResponderRole, Value>,

    pub expected_responders: Vec<ResponderRole>,

    pub missing_responders: Vec<ResponderRole>,

    pub opened_at: DateTime<Utc>,

    pub closed_at: DateTime<Utc>,
}

impl AggregatePayload {
    /// Assemble the final payload of a terminal session
    pub fn from_session(session: AlertSession) -> Self {
        let missing_responders = session.missing_responders();
        let partial = !missing_responders.is_empty();
        Self {
            fully_missing: partial && session.received.is_empty(),
            partial,
            missing_responders,
            expected_responders: session.expected_responders.into_iter().collect(),
            alert_id: session.alert_id,
            status: session.status,
            alert: session.enriched_alert,
            responses: session.received,
            opened_at: session.opened_at,
            closed_at: Utc::now(),
        }
    }
}

/// Lookup request on `alert_data_request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDataRequest {
    pub alert_id: String,

    /// Reply channel; defaults to `alert_data_response:{alert_id}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl AlertDataRequest {
    pub fn new(alert_id: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.into(),
            reply_to: None,
        }
    }

    /// Request answered on a private reply channel
    pub fn with_reply_to(alert_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.into(),
            reply_to: Some(reply_to.into()),
        }
    }

    /// Channel the answer goes to
    pub fn reply_channel(&self) -> String {
        self.reply_to
            .clone()
            .unwrap_or_else(|| crate::bus::channels::alert_data_response(&self.alert_id))
    }
}

/// Lookup answer; not-found is explicit so requesters fail fast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AlertDataResponse {
    Found { alert_id: String, alert: EnrichedAlert },
    NotFound { alert_id: String },
}

impl AlertDataResponse {
    pub fn alert_id(&self) -> &str {
        match self {
            Self::Found { alert_id, .. } | Self::NotFound { alert_id } => alert_id,
        }
    }

    pub fn into_alert(self) -> Option<EnrichedAlert> {
        match self {
            Self::Found { alert, .. } => Some(alert),
            Self::NotFound { .. } => None,
        }
    }
}

/// Finished root-cause result from `root_cause_result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseResult {
    pub alert_id: String,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}
