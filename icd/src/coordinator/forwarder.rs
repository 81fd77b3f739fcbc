//! Downstream forwarder
//!
//! Publishes closed sessions for root-cause synthesis and relays finished
//! root-cause results to the enabled notification and postmortem channels.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::messages::{AggregatePayload, RootCauseResult};
use super::metrics::Metrics;
use crate::bus::{BusError, MessageBus, MessageHandler, ReconnectPolicy, channels, publish_json};
use crate::domain::ResponderRole;

pub struct DownstreamForwarder {
    bus: Arc<dyn MessageBus>,
    metrics: Arc<Metrics>,
    relay_targets: Vec<ResponderRole>,
    retry: ReconnectPolicy,
}

impl DownstreamForwarder {
    pub fn new(bus: Arc<dyn MessageBus>, metrics: Arc<Metrics>, relay_targets: Vec<ResponderRole>) -> Self {
        debug!(?relay_targets, "DownstreamForwarder::new: called");
        Self {
            bus,
            metrics,
            relay_targets,
            retry: ReconnectPolicy::default(),
        }
    }

    /// Set the backoff used when publishing an aggregate fails
    pub fn with_retry(mut self, retry: ReconnectPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish a closed session's aggregate
    ///
    /// Called once per session by whichever path won its terminal transition.
    /// Transient bus errors are retried with backoff; the failure is counted
    /// only once every attempt is used up.
    pub async fn emit(&self, payload: &AggregatePayload) -> Result<(), BusError> {
        debug!(alert_id = %payload.alert_id, partial = payload.partial, "DownstreamForwarder::emit: called");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match publish_json(self.bus.as_ref(), channels::ROOT_CAUSE_ANALYSIS, payload).await {
                Ok(()) => {
                    Metrics::incr(&self.metrics.forwards);
                    info!(
                        alert_id = %payload.alert_id,
                        status = %payload.status,
                        partial = payload.partial,
                        missing = ?payload.missing_responders,
                        attempt,
                        "Session forwarded"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(alert_id = %payload.alert_id, attempt, ?delay, error = %e, "Forward failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    Metrics::incr(&self.metrics.forward_failures);
                    error!(alert_id = %payload.alert_id, attempt, error = %e, "Failed to forward session");
                    return Err(e);
                }
            }
        }
    }

    /// Relay a raw root-cause result to every enabled target, unchanged
    ///
    /// Returns the number of channels it was published to.
    pub async fn relay(&self, raw: &str) -> usize {
        let result: RootCauseResult = match serde_json::from_str(raw) {
            Ok(result) => result,
            Err(e) => {
                Metrics::incr(&self.metrics.malformed_messages);
                warn!(error = %e, "Dropping malformed root cause result");
                return 0;
            }
        };
        debug!(alert_id = %result.alert_id, "DownstreamForwarder::relay: called");

        let mut relayed = 0;
        for target in &self.relay_targets {
            match self.bus.publish(target.channel(), raw.to_string()).await {
                Ok(()) => {
                    Metrics::incr(&self.metrics.relays);
                    relayed += 1;
                }
                Err(e) => warn!(alert_id = %result.alert_id, %target, error = %e, "Failed to relay root cause result"),
            }
        }
        relayed
    }
}

/// Feeds `root_cause_result` into [`DownstreamForwarder::relay`]
pub struct RelayHandler {
    forwarder: Arc<DownstreamForwarder>,
}

impl RelayHandler {
    pub fn new(forwarder: Arc<DownstreamForwarder>) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, payload: String) {
        self.forwarder.relay(&payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, Subscription};
    use crate::domain::{AlertSession, EnrichedAlert, RawAlert, SessionStatus};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Bus whose first `failures` publishes fail as disconnected
    struct FlakyBus {
        inner: MemoryBus,
        failures: AtomicU32,
    }

    impl FlakyBus {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryBus::new(8),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BusError::Disconnected("broker restarting".to_string()));
            }
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
            self.inner.subscribe(channel).await
        }
    }

    fn retry(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        }
    }

    fn aggregate(alert_id: &str) -> AggregatePayload {
        let alert = EnrichedAlert::new(RawAlert {
            alert_id: Some(alert_id.to_string()),
            ..Default::default()
        });
        let mut session = AlertSession::new(alert_id.to_string(), alert, BTreeSet::new());
        session.status = SessionStatus::Completed;
        AggregatePayload::from_session(session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_retries_through_transient_outage() {
        let bus = Arc::new(FlakyBus::new(2));
        let mut root = bus.subscribe(channels::ROOT_CAUSE_ANALYSIS).await.unwrap();
        let metrics = Arc::new(Metrics::default());
        let forwarder = DownstreamForwarder::new(bus.clone(), metrics.clone(), Vec::new()).with_retry(retry(5));

        let started = tokio::time::Instant::now();
        forwarder.emit(&aggregate("A1")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));

        let payload: AggregatePayload = serde_json::from_str(&root.recv().await.unwrap()).unwrap();
        assert_eq!(payload.alert_id, "A1");
        assert!(root.try_recv().is_none());

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.forwards, 1);
        assert_eq!(snapshot.forward_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_counts_failure_after_last_attempt() {
        let bus = Arc::new(FlakyBus::new(10));
        let mut root = bus.subscribe(channels::ROOT_CAUSE_ANALYSIS).await.unwrap();
        let metrics = Arc::new(Metrics::default());
        let forwarder = DownstreamForwarder::new(bus.clone(), metrics.clone(), Vec::new()).with_retry(retry(3));

        assert!(forwarder.emit(&aggregate("A2")).await.is_err());
        assert!(root.try_recv().is_none());
        assert_eq!(bus.failures.load(Ordering::SeqCst), 7);

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.forwards, 0);
        assert_eq!(snapshot.forward_failures, 1);
    }

    #[tokio::test]
    async fn test_relay_to_enabled_targets_only() {
        let bus = Arc::new(MemoryBus::new(8));
        let mut notification = bus.subscribe("notification").await.unwrap();
        let mut postmortem = bus.subscribe("postmortem").await.unwrap();
        let forwarder = DownstreamForwarder::new(
            bus.clone(),
            Arc::new(Metrics::default()),
            vec![ResponderRole::Notification],
        );

        let raw = r#"{"alert_id":"A1","root_cause":"bad deploy"}"#;
        assert_eq!(forwarder.relay(raw).await, 1);
        assert_eq!(notification.recv().await.as_deref(), Some(raw));
        assert!(postmortem.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_relay_drops_malformed() {
        let bus = Arc::new(MemoryBus::new(8));
        let metrics = Arc::new(Metrics::default());
        let forwarder = DownstreamForwarder::new(bus, metrics.clone(), vec![ResponderRole::Postmortem]);

        assert_eq!(forwarder.relay(r#"{"root_cause":"no id"}"#).await, 0);
        assert_eq!(metrics.snapshot(0).malformed_messages, 1);
    }
}
