//! CoordinatorHandle - client interface to a running coordinator

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::watch;
use tracing::debug;

use super::core::Shared;
use super::dispatcher::DispatchReport;
use super::metrics::CoordinatorMetrics;
use super::registry::{AuditRecord, RegistryError};
use crate::bus::BusHealth;
use crate::domain::{AlertSession, EnrichedAlert, RawAlert};

/// Cloneable handle to a [`Coordinator`](super::Coordinator)
///
/// Everything here works in-process; nothing goes over the bus.
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
}

impl CoordinatorHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Ingest an alert directly, as if it arrived on `alerts`
    pub async fn submit(&self, raw: RawAlert) -> Result<DispatchReport, RegistryError> {
        debug!("CoordinatorHandle::submit: called");
        self.shared.ingestor.ingest(raw).await
    }

    /// Copy of an open session
    pub fn snapshot(&self, alert_id: &str) -> Option<AlertSession> {
        self.shared.registry.snapshot(alert_id)
    }

    /// Resolve an alert from sessions or the cache
    pub fn lookup_local(&self, alert_id: &str) -> Option<EnrichedAlert> {
        self.shared.lookup.resolve(alert_id)
    }

    /// Discarded deliveries, oldest first
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.shared.registry.audit_log()
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.shared.metrics.snapshot(self.shared.registry.len())
    }

    /// Current bus connectivity
    pub fn health(&self) -> BusHealth {
        self.shared.health.current()
    }

    /// Watch bus connectivity changes
    pub fn watch_health(&self) -> watch::Receiver<BusHealth> {
        self.shared.health.subscribe()
    }

    /// Wait until every listener is subscribed
    ///
    /// Fails if a channel gives up before that happens.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.shared.ready.subscribe();
        let mut health = self.shared.health.subscribe();
        tokio::select! {
            result = ready.wait_for(|ready| *ready) => {
                result.map_err(|_| eyre!("Coordinator dropped before becoming ready"))?;
                Ok(())
            }
            failed = health.wait_for(|h| matches!(h, BusHealth::Failed { .. })) => {
                match failed {
                    Ok(state) => Err(eyre!("Coordinator failed to start: {}", *state)),
                    Err(_) => Err(eyre!("Coordinator dropped before becoming ready")),
                }
            }
        }
    }

    /// Ask the coordinator to stop
    pub fn shutdown(&self) {
        debug!("CoordinatorHandle::shutdown: called");
        self.shared.shutdown.send_replace(true);
    }
}
