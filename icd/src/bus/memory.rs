//! In-process message bus

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::{BusError, MessageBus, Subscription};

/// Default per-subscription buffer
const DEFAULT_BUFFER: usize = 1024;

/// In-process pub/sub bus
///
/// Each subscription gets its own bounded queue. Publishing never waits: a
/// subscriber whose queue is full misses the message, exactly as a slow client
/// of a network broker would.
pub struct MemoryBus {
    routes: DashMap<String, Vec<mpsc::Sender<String>>>,
    buffer: usize,
    online: AtomicBool,
}

impl MemoryBus {
    /// Create a bus with the given per-subscription buffer
    pub fn new(buffer: usize) -> Self {
        debug!(buffer, "MemoryBus::new: called");
        Self {
            routes: DashMap::new(),
            buffer: buffer.max(1),
            online: AtomicBool::new(true),
        }
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.routes
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Number of channels with at least one registered subscription
    pub fn channel_count(&self) -> usize {
        self.routes.len()
    }

    /// Forget dropped subscriptions and the channels left without any
    fn prune(&self) {
        self.routes.retain(|_, subs| {
            subs.retain(|tx| !tx.is_closed());
            !subs.is_empty()
        });
    }

    /// Drop every subscription, as a broker restart would
    pub fn sever(&self) {
        debug!("MemoryBus::sever: called");
        self.routes.clear();
    }

    /// Take the bus offline (publish and subscribe fail) or bring it back
    pub fn set_online(&self, online: bool) {
        debug!(online, "MemoryBus::set_online: called");
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.sever();
        }
    }

    fn ensure_online(&self) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Disconnected("memory bus is offline".to_string()))
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        self.ensure_online()?;
        debug!(%channel, bytes = payload.len(), "MemoryBus::publish: called");

        if let Some(mut subs) = self.routes.get_mut(channel) {
            subs.retain(|tx| match tx.try_send(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(%channel, "MemoryBus: subscriber queue full, dropping message");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        }
        self.routes.remove_if(channel, |_, subs| subs.is_empty());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        self.ensure_online()?;
        debug!(%channel, "MemoryBus::subscribe: called");
        self.prune();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.routes.entry(channel.to_string()).or_default().push(tx);
        Ok(Subscription::new(channel, rx))
    }
}
