//! Main Coordinator task implementation

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::aggregator::ResponseAggregator;
use super::dispatcher::FanoutDispatcher;
use super::forwarder::{DownstreamForwarder, RelayHandler};
use super::handle::CoordinatorHandle;
use super::ingest::AlertIngestor;
use super::lookup::AlertLookupResponder;
use super::metrics::Metrics;
use super::registry::SessionRegistry;
use super::sweeper::TimeoutSweeper;
use crate::bus::{BusError, ChannelListener, HealthMonitor, MessageBus, MessageHandler, channels, shutdown_requested};
use crate::cache::AlertCache;
use crate::config::Config;
use crate::enrich::{AlertEnricher, KeywordEnricher};

/// State shared between the running coordinator and its handles
pub(crate) struct Shared {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) ingestor: Arc<AlertIngestor>,
    pub(crate) lookup: Arc<AlertLookupResponder>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) ready: watch::Sender<bool>,
}

/// Wires the components together and runs their listeners
pub struct Coordinator {
    config: Config,
    bus: Arc<dyn MessageBus>,
    cache: Arc<AlertCache>,
    forwarder: Arc<DownstreamForwarder>,
    aggregator: Arc<ResponseAggregator>,
    dispatcher: Arc<FanoutDispatcher>,
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a coordinator with an in-memory alert cache
    pub fn new(config: Config, bus: Arc<dyn MessageBus>) -> Self {
        let cache = Arc::new(AlertCache::new(config.cache.ttl()));
        Self::with_cache(config, bus, cache)
    }

    /// Create a coordinator, restoring the alert cache from its journal if one
    /// is configured
    pub async fn open(config: Config, bus: Arc<dyn MessageBus>) -> Result<Self> {
        config.validate()?;
        let cache = match &config.cache.journal_path {
            Some(path) => AlertCache::with_journal(config.cache.ttl(), path)
                .await
                .context(format!("Failed to open cache journal {}", path.display()))?,
            None => AlertCache::new(config.cache.ttl()),
        };
        Ok(Self::with_cache(config, bus, Arc::new(cache)))
    }

    /// Create a coordinator around an existing cache
    pub fn with_cache(config: Config, bus: Arc<dyn MessageBus>, cache: Arc<AlertCache>) -> Self {
        debug!(?config, "Coordinator::with_cache: called");
        let registry = Arc::new(SessionRegistry::new(config.coordinator.audit_capacity));
        let metrics = Arc::new(Metrics::default());
        let health = Arc::new(HealthMonitor::new());

        let forwarder = Arc::new(
            DownstreamForwarder::new(bus.clone(), metrics.clone(), config.relay.targets())
                .with_retry(config.bus.reconnect.clone()),
        );
        let dispatcher = Arc::new(FanoutDispatcher::new(
            registry.clone(),
            cache.clone(),
            bus.clone(),
            metrics.clone(),
        ));
        let aggregator = Arc::new(ResponseAggregator::new(
            registry.clone(),
            forwarder.clone(),
            metrics.clone(),
        ));
        let lookup = Arc::new(AlertLookupResponder::new(
            registry.clone(),
            cache.clone(),
            bus.clone(),
            metrics.clone(),
        ));
        let ingestor = Arc::new(AlertIngestor::new(
            Arc::new(KeywordEnricher::new()),
            dispatcher.clone(),
            config.expected_responders(),
            metrics.clone(),
        ));

        let (shutdown, _) = watch::channel(false);
        let (ready, _) = watch::channel(false);

        Self {
            config,
            bus,
            cache,
            forwarder,
            aggregator,
            dispatcher,
            shared: Arc::new(Shared {
                registry,
                metrics,
                health,
                ingestor,
                lookup,
                shutdown,
                ready,
            }),
        }
    }

    /// Replace the enrichment collaborator
    ///
    /// Handles taken before this call keep the previous enricher.
    pub fn with_enricher(mut self, enricher: Arc<dyn AlertEnricher>) -> Self {
        let ingestor = Arc::new(AlertIngestor::new(
            enricher,
            self.dispatcher.clone(),
            self.config.expected_responders(),
            self.shared.metrics.clone(),
        ));
        let shared = &self.shared;
        self.shared = Arc::new(Shared {
            registry: shared.registry.clone(),
            metrics: shared.metrics.clone(),
            health: shared.health.clone(),
            ingestor,
            lookup: shared.lookup.clone(),
            shutdown: watch::channel(false).0,
            ready: watch::channel(false).0,
        });
        self
    }

    /// Get a handle for submitting alerts and inspecting state
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.shared.clone())
    }

    /// Run until shutdown is requested or a channel gives up reconnecting
    ///
    /// Subscribes the `alerts`, `responses`, `alert_data_request` and
    /// `root_cause_result` listeners, starts the timeout sweeper, then signals
    /// readiness.
    pub async fn run(self) -> Result<()> {
        let shared = self.shared.clone();
        if let Err(e) = self.config.validate() {
            error!(error = %e, "Refusing to start with invalid configuration");
            shared.health.failed("config", e.to_string());
            return Err(e.wrap_err("Invalid coordinator configuration"));
        }
        let mut shutdown = shared.shutdown.subscribe();
        let policy = self.config.bus.reconnect.clone();

        let ingestor: Arc<dyn MessageHandler> = shared.ingestor.clone();
        let aggregator: Arc<dyn MessageHandler> = self.aggregator.clone();
        let lookup: Arc<dyn MessageHandler> = shared.lookup.clone();
        let relay: Arc<dyn MessageHandler> = Arc::new(RelayHandler::new(self.forwarder.clone()));

        // Register every channel with the health monitor before any connects
        let listeners: Vec<(ChannelListener, Arc<dyn MessageHandler>)> = [
            (channels::ALERTS, ingestor),
            (channels::RESPONSES, aggregator),
            (channels::ALERT_DATA_REQUEST, lookup),
            (channels::ROOT_CAUSE_RESULT, relay),
        ]
        .into_iter()
        .map(|(channel, handler)| {
            (
                ChannelListener::new(self.bus.clone(), channel, policy.clone(), shared.health.clone()),
                handler,
            )
        })
        .collect();

        let mut tasks: JoinSet<Result<(), BusError>> = JoinSet::new();
        for (listener, handler) in listeners {
            let subscription = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    tasks.shutdown().await;
                    return Ok(());
                }
                result = listener.connect() => match result {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        tasks.shutdown().await;
                        return Err(e).context(format!("Failed to subscribe to {}", listener.channel()));
                    }
                },
            };
            debug!(channel = %listener.channel(), "Coordinator::run: subscribed");
            tasks.spawn(listener.run(subscription, handler, shared.shutdown.subscribe()));
        }

        let sweeper = TimeoutSweeper::new(
            shared.registry.clone(),
            self.cache.clone(),
            self.forwarder.clone(),
            shared.metrics.clone(),
            self.config.coordinator.response_deadline(),
            self.config.coordinator.sweep_interval(),
        );
        let sweeper_shutdown = shared.shutdown.subscribe();
        tasks.spawn(async move {
            sweeper.run(sweeper_shutdown).await;
            Ok(())
        });

        shared.ready.send_replace(true);
        info!(
            responders = ?self.config.expected_responders(),
            deadline = ?self.config.coordinator.response_deadline(),
            "Coordinator started"
        );

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Listener failed, stopping coordinator");
                        outcome = Err(e).context("Message bus connection lost");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Coordinator task panicked");
                        outcome = Err(eyre::eyre!("Coordinator task failed: {}", e));
                        break;
                    }
                    None => break,
                },
            }
        }

        shared.shutdown.send_replace(true);
        while tasks.join_next().await.is_some() {}
        shared.ready.send_replace(false);
        info!(open_sessions = shared.registry.len(), "Coordinator stopped");
        outcome
    }
}
