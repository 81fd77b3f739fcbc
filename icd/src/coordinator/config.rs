//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator timing and bookkeeping limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Age at which an open session is forwarded as degraded
    #[serde(rename = "response-deadline-secs", default = "default_response_deadline_secs")]
    pub response_deadline_secs: u64,

    /// Period of the timeout sweep
    #[serde(rename = "sweep-interval-secs", default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Bounded wait for a lookup reply
    #[serde(rename = "lookup-timeout-secs", default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,

    /// Discarded deliveries kept for inspection
    #[serde(rename = "audit-capacity", default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_response_deadline_secs() -> u64 {
    debug!("default_response_deadline_secs: called");
    300
}

fn default_sweep_interval_secs() -> u64 {
    debug!("default_sweep_interval_secs: called");
    30
}

fn default_lookup_timeout_secs() -> u64 {
    debug!("default_lookup_timeout_secs: called");
    10
}

fn default_audit_capacity() -> usize {
    debug!("default_audit_capacity: called");
    1024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            response_deadline_secs: default_response_deadline_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

impl CoordinatorConfig {
    /// Get the response deadline as a Duration
    pub fn response_deadline(&self) -> Duration {
        Duration::from_secs(self.response_deadline_secs)
    }

    /// Get the sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get the lookup timeout as a Duration
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.response_deadline(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.lookup_timeout(), Duration::from_secs(10));
        assert_eq!(config.audit_capacity, 1024);
    }

    #[test]
    fn test_kebab_case_yaml() {
        let config: CoordinatorConfig = serde_yaml::from_str("response-deadline-secs: 60\nsweep-interval-secs: 5").unwrap();
        assert_eq!(config.response_deadline_secs, 60);
        assert_eq!(config.sweep_interval_secs, 5);
        assert_eq!(config.lookup_timeout_secs, 10);
    }
}
