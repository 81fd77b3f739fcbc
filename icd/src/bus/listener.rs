//! Channel listeners with reconnect and health reporting

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{BusError, MessageBus, ReconnectPolicy, Subscription};

/// Consumer of raw payloads from one channel
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one payload; decoding failures are the handler's to log and drop
    async fn handle(&self, payload: String);
}

/// Connectivity of the coordinator's subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BusHealth {
    /// Not every channel has subscribed yet
    Starting,

    /// Every channel is subscribed
    Connected,

    /// A channel lost its subscription and is retrying
    Reconnecting { channel: String, attempt: u32 },

    /// A channel gave up; the coordinator cannot continue
    Failed { channel: String, reason: String },
}

impl BusHealth {
    fn severity(&self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Starting => 1,
            Self::Reconnecting { .. } => 2,
            Self::Failed { .. } => 3,
        }
    }
}

impl std::fmt::Display for BusHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { channel, attempt } => write!(f, "reconnecting {} (attempt {})", channel, attempt),
            Self::Failed { channel, reason } => write!(f, "failed on {}: {}", channel, reason),
        }
    }
}

/// Aggregates per-channel state into a single observable [`BusHealth`]
///
/// The published state is the worst channel's state.
pub struct HealthMonitor {
    channels: Mutex<BTreeMap<String, BusHealth>>,
    tx: watch::Sender<BusHealth>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BusHealth::Starting);
        Self {
            channels: Mutex::new(BTreeMap::new()),
            tx,
        }
    }

    /// Track `channel` as not yet subscribed
    pub fn register(&self, channel: &str) {
        self.set(channel, BusHealth::Starting);
    }

    pub fn connected(&self, channel: &str) {
        self.set(channel, BusHealth::Connected);
    }

    pub fn reconnecting(&self, channel: &str, attempt: u32) {
        self.set(
            channel,
            BusHealth::Reconnecting {
                channel: channel.to_string(),
                attempt,
            },
        );
    }

    pub fn failed(&self, channel: &str, reason: impl Into<String>) {
        self.set(
            channel,
            BusHealth::Failed {
                channel: channel.to_string(),
                reason: reason.into(),
            },
        );
    }

    /// Current aggregate state
    pub fn current(&self) -> BusHealth {
        self.tx.borrow().clone()
    }

    /// Watch the aggregate state
    pub fn subscribe(&self) -> watch::Receiver<BusHealth> {
        self.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BusHealth>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, channel: &str, state: BusHealth) {
        let mut channels = self.lock();
        channels.insert(channel.to_string(), state);

        let aggregate = channels
            .values()
            .max_by_key(|s| s.severity())
            .cloned()
            .unwrap_or(BusHealth::Starting);

        self.tx.send_if_modified(|current| {
            if *current == aggregate {
                false
            } else {
                debug!(health = %aggregate, "HealthMonitor: state changed");
                *current = aggregate;
                true
            }
        });
    }
}

/// Wait until shutdown is signalled or the signalling side is gone
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Keeps one channel subscribed and feeds its payloads to a handler
pub struct ChannelListener {
    bus: Arc<dyn MessageBus>,
    channel: String,
    policy: ReconnectPolicy,
    health: Arc<HealthMonitor>,
}

impl ChannelListener {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        channel: impl Into<String>,
        policy: ReconnectPolicy,
        health: Arc<HealthMonitor>,
    ) -> Self {
        let channel = channel.into();
        health.register(&channel);
        Self {
            bus,
            channel,
            policy,
            health,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe, retrying with backoff
    ///
    /// Fails with [`BusError::RetriesExhausted`] once `max_attempts`
    /// consecutive subscribe attempts have failed.
    pub async fn connect(&self) -> Result<Subscription, BusError> {
        let mut attempt = 0u32;
        loop {
            match self.bus.subscribe(&self.channel).await {
                Ok(subscription) => {
                    if attempt > 0 {
                        info!(channel = %self.channel, attempt, "Resubscribed");
                    }
                    self.health.connected(&self.channel);
                    return Ok(subscription);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        error!(channel = %self.channel, attempt, error = %e, "Giving up on channel");
                        self.health.failed(&self.channel, e.to_string());
                        return Err(BusError::RetriesExhausted {
                            channel: self.channel.clone(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(channel = %self.channel, attempt, ?delay, error = %e, "Subscribe failed, retrying");
                    self.health.reconnecting(&self.channel, attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Deliver payloads to `handler` until shutdown
    ///
    /// A lost subscription is re-established transparently. Returns an error
    /// only when reconnecting gives up.
    pub async fn run(
        self,
        mut subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        debug!(channel = %self.channel, "ChannelListener::run: started");
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                message = subscription.recv() => match message {
                    Some(payload) => handler.handle(payload).await,
                    None => {
                        warn!(channel = %self.channel, "Subscription lost, reconnecting");
                        self.health.reconnecting(&self.channel, 0);
                        subscription = tokio::select! {
                            _ = shutdown_requested(&mut shutdown) => break,
                            result = self.connect() => result?,
                        };
                    }
                },
            }
        }
        debug!(channel = %self.channel, "ChannelListener::run: stopped");
        Ok(())
    }
}
