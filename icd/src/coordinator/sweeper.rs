//! Timeout sweeper

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::forwarder::DownstreamForwarder;
use super::metrics::Metrics;
use super::registry::SessionRegistry;
use crate::bus::shutdown_requested;
use crate::cache::AlertCache;

/// Periodically degrades sessions that outlived the response deadline
pub struct TimeoutSweeper {
    registry: Arc<SessionRegistry>,
    cache: Arc<AlertCache>,
    forwarder: Arc<DownstreamForwarder>,
    metrics: Arc<Metrics>,
    deadline: Duration,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        cache: Arc<AlertCache>,
        forwarder: Arc<DownstreamForwarder>,
        metrics: Arc<Metrics>,
        deadline: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            forwarder,
            metrics,
            deadline,
            interval,
        }
    }

    /// One sweep pass at `now`; returns how many sessions it degraded
    pub async fn sweep_once(&self, now: Instant) -> usize {
        let mut degraded = 0;
        for alert_id in self.registry.expired_ids(self.deadline, now) {
            // Lost the race to the aggregator, or already handled
            if !self.registry.degrade(&alert_id, self.deadline, now) {
                continue;
            }
            let Some(payload) = self.registry.close(&alert_id) else {
                continue;
            };
            degraded += 1;
            Metrics::incr(&self.metrics.sessions_degraded);
            warn!(
                %alert_id,
                missing = ?payload.missing_responders,
                fully_missing = payload.fully_missing,
                "Session degraded after deadline"
            );
            let _ = self.forwarder.emit(&payload).await;
        }

        let purged = self.cache.purge_expired().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compact cache journal");
            0
        });
        let pruned = self.registry.prune_closed(self.deadline, now);
        debug!(degraded, purged, pruned, "TimeoutSweeper::sweep_once: done");
        degraded
    }

    /// Sweep every interval until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(deadline = ?self.deadline, interval = ?self.interval, "Timeout sweeper started");
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                tick = ticker.tick() => {
                    self.sweep_once(tick).await;
                }
            }
        }
        debug!("TimeoutSweeper::run: stopped");
    }
}
