//! Publish/subscribe message bus
//!
//! The coordinator talks to analyzers and downstream stages only through named
//! channels. Two transports implement [`MessageBus`]:
//! - [`MemoryBus`]: in-process, for embedding and tests
//! - [`SocketBus`]: newline-delimited JSON over a unix socket to a [`Broker`]
//!
//! Delivery is fire-and-forget: a message published while nobody is subscribed
//! is dropped. Subscriptions hand out raw strings so that decoding, and the
//! malformed-message path, stays with the consumer.

mod broker;
mod config;
mod error;
mod listener;
mod memory;
mod protocol;
mod rendezvous;
mod socket;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

pub use broker::{Broker, cleanup_socket, create_listener_at};
pub use config::{BusConfig, ReconnectPolicy, default_socket_path};
pub use error::BusError;
pub use listener::{BusHealth, ChannelListener, HealthMonitor, MessageHandler, shutdown_requested};
pub use memory::MemoryBus;
pub use protocol::{ClientFrame, MAX_FRAME_SIZE, ServerFrame};
pub use rendezvous::request_reply;
pub use socket::SocketBus;

/// Well-known channel names
pub mod channels {
    /// Inbound raw alerts
    pub const ALERTS: &str = "alerts";

    /// Shared channel every analyzer answers on
    pub const RESPONSES: &str = "responses";

    /// Aggregates for root-cause synthesis
    pub const ROOT_CAUSE_ANALYSIS: &str = "root_cause_analysis";

    /// Finished root-cause results to relay onward
    pub const ROOT_CAUSE_RESULT: &str = "root_cause_result";

    /// Point-to-point alert lookups
    pub const ALERT_DATA_REQUEST: &str = "alert_data_request";

    /// Reply channel for a lookup of `alert_id`
    pub fn alert_data_response(alert_id: &str) -> String {
        format!("alert_data_response:{}", alert_id)
    }
}

/// A live subscription to one channel
///
/// `recv` returning `None` means the underlying connection is gone and the
/// caller must subscribe again.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Channel this subscription is bound to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next raw payload
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take a payload if one is already buffered
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Transport-agnostic publish/subscribe interface
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a raw payload to every current subscriber of `channel`
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Open a subscription to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// Serialize `message` as JSON and publish it
pub async fn publish_json<T>(bus: &dyn MessageBus, channel: &str, message: &T) -> Result<(), BusError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(message)?;
    bus.publish(channel, payload).await
}

/// Where the bus lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEndpoint {
    Memory,
    Unix(PathBuf),
}

impl std::str::FromStr for BusEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty bus endpoint".to_string());
        }
        if s == "memory" || s == "memory://" {
            return Ok(Self::Memory);
        }
        let path = s
            .strip_prefix("unix://")
            .or_else(|| s.strip_prefix("unix:"))
            .unwrap_or(s);
        if path.is_empty() {
            return Err(format!("Missing socket path in endpoint: {}", s));
        }
        Ok(Self::Unix(PathBuf::from(path)))
    }
}

/// Build the transport described by `config`
///
/// Socket connections are made lazily, so this never blocks or fails on an
/// unreachable broker; that surfaces through the listeners' reconnect loop.
pub fn connect(config: &BusConfig) -> Result<Arc<dyn MessageBus>, BusError> {
    let endpoint: BusEndpoint = config
        .endpoint
        .parse()
        .map_err(BusError::Disconnected)?;
    debug!(?endpoint, "connect: called");
    let bus: Arc<dyn MessageBus> = match endpoint {
        BusEndpoint::Memory => Arc::new(MemoryBus::new(config.subscription_buffer)),
        BusEndpoint::Unix(path) => Arc::new(
            SocketBus::new(path)
                .with_timeout(config.io_timeout())
                .with_buffer(config.subscription_buffer),
        ),
    };
    Ok(bus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        assert_eq!("memory".parse::<BusEndpoint>().unwrap(), BusEndpoint::Memory);
        assert_eq!(
            "unix:///run/icd/bus.sock".parse::<BusEndpoint>().unwrap(),
            BusEndpoint::Unix(PathBuf::from("/run/icd/bus.sock"))
        );
        assert_eq!(
            "/tmp/bus.sock".parse::<BusEndpoint>().unwrap(),
            BusEndpoint::Unix(PathBuf::from("/tmp/bus.sock"))
        );
        assert!("".parse::<BusEndpoint>().is_err());
        assert!("unix://".parse::<BusEndpoint>().is_err());
    }

    #[test]
    fn test_alert_data_response_channel() {
        assert_eq!(channels::alert_data_response("A1"), "alert_data_response:A1");
    }

    #[tokio::test]
    async fn test_connect_memory_bus() {
        let bus = connect(&BusConfig::memory()).unwrap();
        let mut sub = bus.subscribe("alerts").await.unwrap();
        bus.publish("alerts", "{}".to_string()).await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_publish_json() {
        let bus = MemoryBus::new(8);
        let mut sub = bus.subscribe("responses").await.unwrap();
        publish_json(&bus, "responses", &serde_json::json!({"agent": "log"}))
            .await
            .unwrap();
        let raw = sub.recv().await.unwrap();
        assert_eq!(raw, r#"{"agent":"log"}"#);
    }

    #[tokio::test]
    async fn test_subscription_debug_names_channel() {
        let bus = MemoryBus::new(8);
        let sub = bus.subscribe("responses").await.unwrap();
        assert!(format!("{:?}", sub).contains("responses"));
    }
}
