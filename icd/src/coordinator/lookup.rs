//! Out-of-band alert lookups
//!
//! Collaborators that only learn an alert id after the fact ask for the alert
//! on `alert_data_request`. The responder answers from resident sessions
//! first, then from the cache, and always answers: an unknown or expired id
//! gets an explicit not-found.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{AlertDataRequest, AlertDataResponse};
use super::metrics::Metrics;
use super::registry::SessionRegistry;
use crate::bus::{BusError, MessageBus, MessageHandler, channels, publish_json, request_reply};
use crate::cache::AlertCache;
use crate::domain::EnrichedAlert;

/// Serves `alert_data_request`
pub struct AlertLookupResponder {
    registry: Arc<SessionRegistry>,
    cache: Arc<AlertCache>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<Metrics>,
}

impl AlertLookupResponder {
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

    /// Find the enriched alert for `alert_id` without touching the bus
    pub fn resolve(&self, alert_id: &str) -> Option<EnrichedAlert> {
        self.registry
            .snapshot(alert_id)
            .map(|session| session.enriched_alert)
            .or_else(|| self.cache.get(alert_id))
    }

    /// Answer one request on its reply channel
    pub async fn respond(&self, request: &AlertDataRequest) -> Result<(), BusError> {
        let reply_channel = request.reply_channel();
        debug!(alert_id = %request.alert_id, %reply_channel, "AlertLookupResponder::respond: called");

        let response = match self.resolve(&request.alert_id) {
            Some(alert) => {
                Metrics::incr(&self.metrics.lookups_served);
                AlertDataResponse::Found {
                    alert_id: request.alert_id.clone(),
                    alert,
                }
            }
            None => {
                Metrics::incr(&self.metrics.lookups_not_found);
                debug!(alert_id = %request.alert_id, "Lookup for unknown alert");
                AlertDataResponse::NotFound {
                    alert_id: request.alert_id.clone(),
                }
            }
        };
        publish_json(self.bus.as_ref(), &reply_channel, &response).await
    }
}

#[async_trait]
impl MessageHandler for AlertLookupResponder {
    async fn handle(&self, payload: String) {
        let request: AlertDataRequest = match serde_json::from_str(&payload) {
            Ok(request) => request,
            Err(e) => {
                Metrics::incr(&self.metrics.malformed_messages);
                warn!(error = %e, "Dropping malformed lookup request");
                return;
            }
        };
        if let Err(e) = self.respond(&request).await {
            warn!(alert_id = %request.alert_id, error = %e, "Failed to answer lookup");
        }
    }
}

/// Requester side of the lookup rendezvous
#[derive(Clone)]
pub struct LookupClient {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl LookupClient {
    pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Ask for `alert_id`, waiting at most the configured timeout
    ///
    /// A not-found answer and a timeout both yield `Ok(None)`.
    pub async fn lookup(&self, alert_id: &str) -> Result<Option<EnrichedAlert>, BusError> {
        let reply_to = format!("{}:{}", channels::alert_data_response(alert_id), Uuid::now_v7());
        debug!(%alert_id, %reply_to, "LookupClient::lookup: called");
        let request = AlertDataRequest::with_reply_to(alert_id, reply_to.clone());

        let reply: Option<AlertDataResponse> =
            request_reply(self.bus.as_ref(), channels::ALERT_DATA_REQUEST, &request, &reply_to, self.timeout).await?;

        Ok(match reply {
            Some(response) if response.alert_id() == alert_id => response.into_alert(),
            Some(response) => {
                warn!(%alert_id, answered = %response.alert_id(), "Lookup answered for a different alert");
                None
            }
            None => {
                debug!(%alert_id, "Lookup timed out, treating as not found");
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RawAlert, ResponderRole};

    fn alert(id: &str) -> EnrichedAlert {
        EnrichedAlert::new(RawAlert {
            alert_id: Some(id.to_string()),
            ..Default::default()
        })
    }

    fn responder(bus: Arc<dyn MessageBus>) -> (AlertLookupResponder, Arc<SessionRegistry>, Arc<AlertCache>) {
        let registry = Arc::new(SessionRegistry::default());
        let cache = Arc::new(AlertCache::new(Duration::from_secs(60)));
        let responder = AlertLookupResponder::new(registry.clone(), cache.clone(), bus, Arc::new(Metrics::default()));
        (responder, registry, cache)
    }

    #[tokio::test]
    async fn test_resolve_prefers_session_then_cache() {
        let bus: Arc<dyn MessageBus> = Arc::new(crate::bus::MemoryBus::new(8));
        let (responder, registry, cache) = responder(bus);

        let mut from_session = alert("A1");
        from_session.search_context.keywords = vec!["session".to_string()];
        registry
            .open("A1", from_session, [ResponderRole::Log].into_iter().collect())
            .unwrap();
        cache.put(&alert("A1")).await.unwrap();
        cache.put(&alert("A2")).await.unwrap();

        assert_eq!(responder.resolve("A1").unwrap().search_context.keywords, vec!["session"]);
        assert_eq!(responder.resolve("A2").unwrap().alert_id, "A2");
        assert!(responder.resolve("A3").is_none());
    }

    #[tokio::test]
    async fn test_respond_not_found_on_default_channel() {
        let bus = Arc::new(crate::bus::MemoryBus::new(8));
        let mut replies = bus.subscribe("alert_data_response:A7").await.unwrap();
        let (responder, _, _) = responder(bus.clone());

        responder.handle(r#"{"alert_id":"A7"}"#.to_string()).await;

        let reply: AlertDataResponse = serde_json::from_str(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(
            reply,
            AlertDataResponse::NotFound {
                alert_id: "A7".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_times_out_without_responder() {
        let bus: Arc<dyn MessageBus> = Arc::new(crate::bus::MemoryBus::new(8));
        let client = LookupClient::new(bus, Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        assert!(client.lookup("A1").await.unwrap().is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }
}
