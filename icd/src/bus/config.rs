//! Message bus configuration

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// `memory` for the in-process bus, otherwise a unix socket path
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Reconnect policy for channel listeners
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Buffered messages per subscription before new ones are dropped
    #[serde(rename = "subscription-buffer", default = "default_subscription_buffer")]
    pub subscription_buffer: usize,

    /// Timeout for socket connect and write operations in milliseconds
    #[serde(rename = "io-timeout-ms", default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

/// Default socket path, alongside other runtime files
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("incidentd")
        .join("bus.sock")
}

fn default_endpoint() -> String {
    debug!("default_endpoint: called");
    default_socket_path().to_string_lossy().into_owned()
}

fn default_subscription_buffer() -> usize {
    1024
}

fn default_io_timeout_ms() -> u64 {
    5000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect: ReconnectPolicy::default(),
            subscription_buffer: default_subscription_buffer(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl BusConfig {
    /// In-process bus configuration
    pub fn memory() -> Self {
        Self {
            endpoint: "memory".to_string(),
            ..Default::default()
        }
    }

    /// Get the I/O timeout as a Duration
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Bounded exponential backoff for resubscribing after a lost connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(rename = "initial-backoff-ms", default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the doubled delay in milliseconds
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Base delay before retry `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Delay before retry `attempt`, with up to 10% jitter added
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base.as_millis() as u64 / 10;
        let jitter = if spread > 0 {
            rand::rng().random_range(0..=spread)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}
