//! Fan-out dispatcher

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::metrics::Metrics;
use super::registry::{RegistryError, SessionRegistry};
use crate::bus::MessageBus;
use crate::cache::AlertCache;
use crate::domain::{EnrichedAlert, ResponderRole};

/// What happened to one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub alert_id: String,
    pub published: Vec<ResponderRole>,
    pub failed: Vec<ResponderRole>,
}

impl DispatchReport {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Opens sessions and publishes alerts to responder channels
pub struct FanoutDispatcher {
    registry: Arc<SessionRegistry>,
    cache: Arc<AlertCache>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<Metrics>,
}

impl FanoutDispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        cache: Arc<AlertCache>,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            cache,
            bus,
            metrics,
        }
    }

    /// Open a session, cache the alert and publish it to every responder
    ///
    /// Publishing is fire-and-forget and per-channel failures do not stop the
    /// other channels; a responder that never got the alert simply shows up as
    /// missing when the session times out. With no responders the alert is
    /// still cached for lookups but nothing is dispatched.
    pub async fn broadcast(
        &self,
        enriched: EnrichedAlert,
        responders: &BTreeSet<ResponderRole>,
    ) -> Result<DispatchReport, RegistryError> {
        let alert_id = enriched.alert_id.clone();
        debug!(%alert_id, responders = responders.len(), "FanoutDispatcher::broadcast: called");

        if responders.is_empty() {
            self.cache_alert(&enriched).await;
            return Err(RegistryError::NoResponders(alert_id));
        }

        self.registry.open(&alert_id, enriched.clone(), responders.clone())?;
        Metrics::incr(&self.metrics.sessions_opened);
        self.cache_alert(&enriched).await;

        let payload = match serde_json::to_string(&enriched) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%alert_id, error = %e, "Failed to encode alert for dispatch");
                self.metrics
                    .dispatch_failures
                    .fetch_add(responders.len() as u64, std::sync::atomic::Ordering::Relaxed);
                return Ok(DispatchReport {
                    alert_id,
                    published: Vec::new(),
                    failed: responders.iter().copied().collect(),
                });
            }
        };

        let sends = responders.iter().map(|role| {
            let payload = payload.clone();
            async move { (*role, self.bus.publish(role.channel(), payload).await) }
        });

        let mut report = DispatchReport {
            alert_id: alert_id.clone(),
            ..Default::default()
        };
        for (role, result) in join_all(sends).await {
            match result {
                Ok(()) => report.published.push(role),
                Err(e) => {
                    warn!(%alert_id, %role, error = %e, "Failed to publish alert to responder");
                    Metrics::incr(&self.metrics.dispatch_failures);
                    report.failed.push(role);
                }
            }
        }

        info!(
            %alert_id,
            published = report.published.len(),
            failed = report.failed.len(),
            "Alert dispatched"
        );
        Ok(report)
    }

    async fn cache_alert(&self, enriched: &EnrichedAlert) {
        if let Err(e) = self.cache.put(enriched).await {
            warn!(alert_id = %enriched.alert_id, error = %e, "Failed to persist alert to cache journal");
        }
    }
}
