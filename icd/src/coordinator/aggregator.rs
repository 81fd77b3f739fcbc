//! Response aggregator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::forwarder::DownstreamForwarder;
use super::messages::AnalyzerResponse;
use super::metrics::Metrics;
use super::registry::{AttachOutcome, SessionRegistry};
use crate::bus::MessageHandler;

/// Attaches analyzer responses and forwards sessions they complete
pub struct ResponseAggregator {
    registry: Arc<SessionRegistry>,
    forwarder: Arc<DownstreamForwarder>,
    metrics: Arc<Metrics>,
}

impl ResponseAggregator {
    pub fn new(registry: Arc<SessionRegistry>, forwarder: Arc<DownstreamForwarder>, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            forwarder,
            metrics,
        }
    }

    /// Attach one decoded response
    pub async fn accept(&self, response: AnalyzerResponse) -> AttachOutcome {
        let AnalyzerResponse { agent, alert_id, body } = response;
        debug!(%alert_id, role = %agent, "ResponseAggregator::accept: called");

        let outcome = self.registry.attach(&alert_id, agent, body);
        match outcome {
            AttachOutcome::Pending { remaining } => {
                Metrics::incr(&self.metrics.responses_attached);
                debug!(%alert_id, role = %agent, remaining, "Response attached");
            }
            AttachOutcome::Completed => {
                Metrics::incr(&self.metrics.responses_attached);
                if let Some(payload) = self.registry.close(&alert_id) {
                    Metrics::incr(&self.metrics.sessions_completed);
                    info!(%alert_id, "Session completed");
                    // Failure is logged and counted by the forwarder
                    let _ = self.forwarder.emit(&payload).await;
                }
            }
            AttachOutcome::Duplicate => Metrics::incr(&self.metrics.duplicate_responses),
            AttachOutcome::Unexpected => Metrics::incr(&self.metrics.unexpected_responses),
            AttachOutcome::Late | AttachOutcome::Unknown => Metrics::incr(&self.metrics.late_responses),
        }
        outcome
    }
}

#[async_trait]
impl MessageHandler for ResponseAggregator {
    async fn handle(&self, payload: String) {
        match AnalyzerResponse::parse(&payload) {
            Ok(response) => {
                self.accept(response).await;
            }
            Err(e) => {
                Metrics::incr(&self.metrics.malformed_messages);
                warn!(error = %e, "Dropping malformed response");
            }
        }
    }
}
