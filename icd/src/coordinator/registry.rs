//! Session registry
//!
//! Sessions live in a sharded map. Every mutation of one alert's session runs
//! under that key's shard lock, so the aggregator and the sweeper can race on
//! the same session and exactly one of them performs the terminal transition.
//! Different alerts land on different shards and do not contend.
//!
//! The winner of a transition closes the session; only a terminal session can
//! be closed and removal happens once, which makes forwarding exactly-once.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::messages::AggregatePayload;
use crate::domain::{AlertSession, EnrichedAlert, ResponderRole, SessionStatus};

/// Errors raised by the session registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session already open for alert {0}")]
    AlreadyOpen(String),

    #[error("No responders expected for alert {0}")]
    NoResponders(String),
}

/// Result of attaching a response to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Recorded, other roles still outstanding
    Pending { remaining: usize },

    /// Recorded, and this response completed the session
    Completed,

    /// Role already answered; the first payload is kept
    Duplicate,

    /// Role is not in the session's expected set
    Unexpected,

    /// Session already reached a terminal state or was closed
    Late,

    /// No session for this alert id
    Unknown,
}

impl AttachOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn discard_reason(&self) -> Option<DiscardReason> {
        match self {
            Self::Pending { .. } | Self::Completed => None,
            Self::Duplicate => Some(DiscardReason::Duplicate),
            Self::Unexpected => Some(DiscardReason::Unexpected),
            Self::Late => Some(DiscardReason::Late),
            Self::Unknown => Some(DiscardReason::UnknownSession),
        }
    }
}

/// Why a delivery was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    Duplicate,
    Unexpected,
    Late,
    UnknownSession,
}

/// A discarded delivery, kept for inspection
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub alert_id: String,
    pub role: ResponderRole,
    pub reason: DiscardReason,
    pub payload: Value,
}

/// Concurrency-safe store of open sessions
pub struct SessionRegistry {
    sessions: DashMap<String, AlertSession>,
    /// Recently closed ids, to tell late deliveries from unknown ones
    closed: DashMap<String, Instant>,
    audit: Mutex<VecDeque<AuditRecord>>,
    audit_capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SessionRegistry {
    pub fn new(audit_capacity: usize) -> Self {
        debug!(audit_capacity, "SessionRegistry::new: called");
        Self {
            sessions: DashMap::new(),
            closed: DashMap::new(),
            audit: Mutex::new(VecDeque::with_capacity(audit_capacity.min(1024))),
            audit_capacity,
        }
    }

    /// Create an open session
    pub fn open(
        &self,
        alert_id: &str,
        enriched_alert: EnrichedAlert,
        expected_responders: BTreeSet<ResponderRole>,
    ) -> Result<(), RegistryError> {
        debug!(%alert_id, expected = expected_responders.len(), "SessionRegistry::open: called");
        if expected_responders.is_empty() {
            return Err(RegistryError::NoResponders(alert_id.to_string()));
        }

        match self.sessions.entry(alert_id.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyOpen(alert_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(AlertSession::new(
                    alert_id.to_string(),
                    enriched_alert,
                    expected_responders,
                ));
            }
        }
        self.closed.remove(alert_id);
        Ok(())
    }

    /// Record one role's response
    ///
    /// Only the first response per expected role is kept. Whatever is not kept
    /// goes to the audit log and never changes the session.
    pub fn attach(&self, alert_id: &str, role: ResponderRole, payload: Value) -> AttachOutcome {
        debug!(%alert_id, %role, "SessionRegistry::attach: called");
        let mut payload = Some(payload);

        let outcome = match self.sessions.get_mut(alert_id) {
            Some(mut entry) => {
                let session = entry.value_mut();
                if session.status.is_terminal() {
                    AttachOutcome::Late
                } else if !session.expected_responders.contains(&role) {
                    AttachOutcome::Unexpected
                } else if session.received.contains_key(&role) {
                    AttachOutcome::Duplicate
                } else {
                    if let Some(payload) = payload.take() {
                        session.received.insert(role, payload);
                    }
                    if session.is_satisfied() {
                        session.status = SessionStatus::Completed;
                        AttachOutcome::Completed
                    } else {
                        AttachOutcome::Pending {
                            remaining: session.expected_responders.len() - session.received.len(),
                        }
                    }
                }
            }
            None if self.closed.contains_key(alert_id) => AttachOutcome::Late,
            None => AttachOutcome::Unknown,
        };

        if let (Some(reason), Some(payload)) = (outcome.discard_reason(), payload) {
            warn!(%alert_id, %role, ?reason, "Discarding response");
            self.record(AuditRecord {
                at: Utc::now(),
                alert_id: alert_id.to_string(),
                role,
                reason,
                payload,
            });
        }
        outcome
    }

    /// Ids of open sessions older than `deadline` at `now`
    pub fn expired_ids(&self, deadline: Duration, now: Instant) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.status == SessionStatus::Open && entry.age(now) > deadline)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Move an expired open session to `DEGRADED`
    ///
    /// Re-checks state under the key lock, so a session completed since
    /// [`expired_ids`](Self::expired_ids) ran is left alone. Returns whether
    /// this call made the transition.
    pub fn degrade(&self, alert_id: &str, deadline: Duration, now: Instant) -> bool {
        match self.sessions.get_mut(alert_id) {
            Some(mut session) if session.status == SessionStatus::Open && session.age(now) > deadline => {
                debug!(%alert_id, "SessionRegistry::degrade: degrading");
                session.status = SessionStatus::Degraded;
                true
            }
            _ => false,
        }
    }

    /// Remove a terminal session and return its final payload
    ///
    /// Open sessions are not removed. Returns `None` when there is nothing to
    /// close, so only one caller ever gets the payload.
    pub fn close(&self, alert_id: &str) -> Option<AggregatePayload> {
        debug!(%alert_id, "SessionRegistry::close: called");
        let (_, session) = self
            .sessions
            .remove_if(alert_id, |_, session| session.status.is_terminal())?;
        self.closed.insert(alert_id.to_string(), Instant::now());
        Some(AggregatePayload::from_session(session))
    }

    /// Copy of a resident session
    pub fn snapshot(&self, alert_id: &str) -> Option<AlertSession> {
        self.sessions.get(alert_id).map(|entry| entry.value().clone())
    }

    /// Forget closed ids older than `retention`
    pub fn prune_closed(&self, retention: Duration, now: Instant) -> usize {
        let before = self.closed.len();
        self.closed
            .retain(|_, closed_at| now.saturating_duration_since(*closed_at) < retention);
        before.saturating_sub(self.closed.len())
    }

    /// Number of resident sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Discarded deliveries, oldest first
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.lock_audit().iter().cloned().collect()
    }

    fn lock_audit(&self) -> MutexGuard<'_, VecDeque<AuditRecord>> {
        self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, record: AuditRecord) {
        if self.audit_capacity == 0 {
            return;
        }
        let mut audit = self.lock_audit();
        while audit.len() >= self.audit_capacity {
            audit.pop_front();
        }
        audit.push_back(record);
    }
}
