//! Alert ingestion from the `alerts` channel

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::dispatcher::{DispatchReport, FanoutDispatcher};
use super::metrics::Metrics;
use super::registry::RegistryError;
use crate::bus::MessageHandler;
use crate::domain::{RawAlert, ResponderRole};
use crate::enrich::AlertEnricher;

/// Enriches raw alerts and hands them to the dispatcher
pub struct AlertIngestor {
    enricher: Arc<dyn AlertEnricher>,
    dispatcher: Arc<FanoutDispatcher>,
    responders: BTreeSet<ResponderRole>,
    metrics: Arc<Metrics>,
}

impl AlertIngestor {
    pub fn new(
        enricher: Arc<dyn AlertEnricher>,
        dispatcher: Arc<FanoutDispatcher>,
        responders: BTreeSet<ResponderRole>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            enricher,
            dispatcher,
            responders,
            metrics,
        }
    }

    /// Enrich and dispatch one alert
    ///
    /// An alert whose id already has an open session is rejected rather than
    /// dispatched a second time.
    pub async fn ingest(&self, raw: RawAlert) -> Result<DispatchReport, RegistryError> {
        let enriched = self.enricher.enrich(raw);
        debug!(alert_id = %enriched.alert_id, priority = %enriched.priority, "AlertIngestor::ingest: called");

        match self.dispatcher.broadcast(enriched, &self.responders).await {
            Ok(report) => {
                Metrics::incr(&self.metrics.alerts_ingested);
                Ok(report)
            }
            Err(e) => {
                Metrics::incr(&self.metrics.alerts_rejected);
                warn!(error = %e, "Alert not dispatched");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AlertIngestor {
    async fn handle(&self, payload: String) {
        match serde_json::from_str::<RawAlert>(&payload) {
            Ok(raw) => {
                let _ = self.ingest(raw).await;
            }
            Err(e) => {
                Metrics::incr(&self.metrics.malformed_messages);
                warn!(error = %e, "Dropping malformed alert");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, MessageBus};
    use crate::cache::AlertCache;
    use crate::coordinator::registry::SessionRegistry;
    use crate::enrich::KeywordEnricher;
    use std::time::Duration;

    fn ingestor(bus: Arc<MemoryBus>) -> (AlertIngestor, Arc<SessionRegistry>, Arc<Metrics>) {
        let registry = Arc::new(SessionRegistry::default());
        let metrics = Arc::new(Metrics::default());
        let dispatcher = Arc::new(FanoutDispatcher::new(
            registry.clone(),
            Arc::new(AlertCache::new(Duration::from_secs(60))),
            bus,
            metrics.clone(),
        ));
        let ingestor = AlertIngestor::new(
            Arc::new(KeywordEnricher::new()),
            dispatcher,
            [ResponderRole::Metric].into_iter().collect(),
            metrics.clone(),
        );
        (ingestor, registry, metrics)
    }

    #[tokio::test]
    async fn test_handle_dispatches_and_rejects_duplicate() {
        let bus = Arc::new(MemoryBus::new(8));
        let mut metric = bus.subscribe("metric").await.unwrap();
        let (ingestor, registry, metrics) = ingestor(bus);

        let raw = r#"{"labels":{"alertname":"HighCpu","severity":"warning"}}"#;
        ingestor.handle(raw.to_string()).await;
        ingestor.handle(raw.to_string()).await;

        assert_eq!(registry.len(), 1);
        assert!(metric.recv().await.is_some());
        assert!(metric.try_recv().is_none());

        let snap = metrics.snapshot(registry.len());
        assert_eq!(snap.alerts_ingested, 1);
        assert_eq!(snap.alerts_rejected, 1);
    }

    #[tokio::test]
    async fn test_handle_drops_malformed_alert() {
        let bus = Arc::new(MemoryBus::new(8));
        let (ingestor, registry, metrics) = ingestor(bus);

        ingestor.handle("[1, 2, 3]".to_string()).await;
        assert!(registry.is_empty());
        assert_eq!(metrics.snapshot(0).malformed_messages, 1);
    }
}
