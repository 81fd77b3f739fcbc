//! Per-alert coordination record

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::alert::EnrichedAlert;
use super::role::ResponderRole;

/// Lifecycle state of a session
///
/// `Completed` and `Degraded` are terminal and reached at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Open,
    Completed,
    Degraded,
}

impl SessionStatus {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Coordination state for one alert's outstanding responses
#[derive(Debug, Clone)]
pub struct AlertSession {
    pub alert_id: String,

    pub enriched_alert: EnrichedAlert,

    /// Fixed at dispatch time
    pub expected_responders: BTreeSet<ResponderRole>,

    /// Write-once per role, never more entries than `expected_responders`
    pub received: BTreeMap<ResponderRole, Value>,

    /// Monotonic open time, used for deadline checks
    pub created_at: Instant,

    /// Wall-clock open time, reported downstream
    pub opened_at: DateTime<Utc>,

    pub status: SessionStatus,
}

impl AlertSession {
    /// Create an open session
    pub fn new(alert_id: String, enriched_alert: EnrichedAlert, expected_responders: BTreeSet<ResponderRole>) -> Self {
        Self {
            alert_id,
            enriched_alert,
            expected_responders,
            received: BTreeMap::new(),
            created_at: Instant::now(),
            opened_at: Utc::now(),
            status: SessionStatus::Open,
        }
    }

    /// Expected roles that have not answered yet, in role order
    pub fn missing_responders(&self) -> Vec<ResponderRole> {
        self.expected_responders
            .iter()
            .filter(|role| !self.received.contains_key(role))
            .copied()
            .collect()
    }

    /// Check if every expected role has answered
    pub fn is_satisfied(&self) -> bool {
        self.expected_responders.iter().all(|role| self.received.contains_key(role))
    }

    /// Time since the session was opened
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawAlert;
    use serde_json::json;

    fn session(expected: &[ResponderRole]) -> AlertSession {
        let alert = EnrichedAlert::new(RawAlert {
            alert_id: Some("A1".to_string()),
            ..Default::default()
        });
        AlertSession::new("A1".to_string(), alert, expected.iter().copied().collect())
    }

    #[test]
    fn test_status_terminal() {
        assert!(!SessionStatus::Open.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Degraded.is_terminal());
        assert_eq!(SessionStatus::Degraded.to_string(), "DEGRADED");
    }

    #[test]
    fn test_missing_responders_in_role_order() {
        let mut s = session(&[ResponderRole::Deployment, ResponderRole::Metric, ResponderRole::Log]);
        s.received.insert(ResponderRole::Metric, json!({"ok": true}));

        assert_eq!(s.missing_responders(), vec![ResponderRole::Log, ResponderRole::Deployment]);
        assert!(!s.is_satisfied());

        s.received.insert(ResponderRole::Log, json!({}));
        s.received.insert(ResponderRole::Deployment, json!({}));
        assert!(s.is_satisfied());
        assert!(s.missing_responders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_monotonic_clock() {
        let s = session(&[ResponderRole::Metric]);
        tokio::time::advance(Duration::from_secs(42)).await;
        assert_eq!(s.age(Instant::now()), Duration::from_secs(42));
    }
}
