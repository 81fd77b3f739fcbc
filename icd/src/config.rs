//! incidentd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::BusConfig;
use crate::coordinator::CoordinatorConfig;
use crate::domain::ResponderRole;

/// Main incidentd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message bus endpoint and reconnect policy
    pub bus: BusConfig,

    /// Deadlines and sweep period
    pub coordinator: CoordinatorConfig,

    /// Alert cache retention
    pub cache: CacheConfig,

    /// Which responders an alert is fanned out to
    pub responders: ResponderToggles,

    /// Where root-cause results are relayed
    pub relay: RelayConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.response_deadline_secs == 0 {
            return Err(eyre::eyre!("coordinator.response-deadline-secs must be greater than zero"));
        }
        if self.coordinator.sweep_interval_secs == 0 {
            return Err(eyre::eyre!("coordinator.sweep-interval-secs must be greater than zero"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(eyre::eyre!("cache.ttl-secs must be greater than zero"));
        }
        if self.bus.reconnect.max_attempts == 0 {
            return Err(eyre::eyre!("bus.reconnect.max-attempts must be greater than zero"));
        }
        if self.responders.enabled().is_empty() {
            tracing::warn!("No responders enabled; alerts will be cached but not dispatched");
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".incidentd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("incidentd").join("incidentd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Responder set every alert is dispatched to
    pub fn expected_responders(&self) -> BTreeSet<ResponderRole> {
        self.responders.enabled()
    }
}

/// Alert cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a dispatched alert stays available to lookups
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: u64,

    /// JSONL journal so the cache survives restarts
    #[serde(rename = "journal-path", skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            journal_path: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Per-responder enable flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderToggles {
    pub metric: bool,
    pub log: bool,
    pub deployment: bool,
    pub tracing: bool,
    pub notification: bool,
    pub postmortem: bool,
}

impl Default for ResponderToggles {
    fn default() -> Self {
        Self {
            metric: true,
            log: true,
            deployment: true,
            tracing: true,
            notification: false,
            postmortem: false,
        }
    }
}

impl ResponderToggles {
    pub fn is_enabled(&self, role: ResponderRole) -> bool {
        match role {
            ResponderRole::Metric => self.metric,
            ResponderRole::Log => self.log,
            ResponderRole::Deployment => self.deployment,
            ResponderRole::Tracing => self.tracing,
            ResponderRole::Notification => self.notification,
            ResponderRole::Postmortem => self.postmortem,
        }
    }

    /// Enabled roles
    pub fn enabled(&self) -> BTreeSet<ResponderRole> {
        ResponderRole::ALL
            .into_iter()
            .filter(|role| self.is_enabled(*role))
            .collect()
    }

    /// Enable exactly `roles`
    pub fn only(roles: &[ResponderRole]) -> Self {
        let mut toggles = Self {
            metric: false,
            log: false,
            deployment: false,
            tracing: false,
            notification: false,
            postmortem: false,
        };
        for role in roles {
            match role {
                ResponderRole::Metric => toggles.metric = true,
                ResponderRole::Log => toggles.log = true,
                ResponderRole::Deployment => toggles.deployment = true,
                ResponderRole::Tracing => toggles.tracing = true,
                ResponderRole::Notification => toggles.notification = true,
                ResponderRole::Postmortem => toggles.postmortem = true,
            }
        }
        toggles
    }
}

/// Root-cause result relay targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub notification: bool,
    pub postmortem: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            notification: true,
            postmortem: true,
        }
    }
}

impl RelayConfig {
    /// Channels a root-cause result is relayed to
    pub fn targets(&self) -> Vec<ResponderRole> {
        let mut targets = Vec::new();
        if self.notification {
            targets.push(ResponderRole::Notification);
        }
        if self.postmortem {
            targets.push(ResponderRole::Postmortem);
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.coordinator.response_deadline_secs, 300);
        assert_eq!(config.coordinator.sweep_interval_secs, 30);
        assert_eq!(config.cache.ttl(), Duration::from_secs(86400));
        assert_eq!(
            config.expected_responders().into_iter().collect::<Vec<_>>(),
            vec![
                ResponderRole::Metric,
                ResponderRole::Log,
                ResponderRole::Deployment,
                ResponderRole::Tracing
            ]
        );
        assert_eq!(
            config.relay.targets(),
            vec![ResponderRole::Notification, ResponderRole::Postmortem]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bus:
  endpoint: /run/incidentd/bus.sock
  reconnect:
    max-attempts: 4
    initial-backoff-ms: 250

coordinator:
  response-deadline-secs: 120
  sweep-interval-secs: 10

cache:
  ttl-secs: 3600
  journal-path: /var/lib/incidentd/cache.jsonl

responders:
  tracing: false
  postmortem: true

relay:
  notification: false
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bus.endpoint, "/run/incidentd/bus.sock");
        assert_eq!(config.bus.reconnect.max_attempts, 4);
        assert_eq!(config.bus.reconnect.max_backoff_ms, 30_000);
        assert_eq!(config.coordinator.response_deadline_secs, 120);
        assert_eq!(config.coordinator.lookup_timeout_secs, 10);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(
            config.cache.journal_path.as_deref(),
            Some(Path::new("/var/lib/incidentd/cache.jsonl"))
        );
        assert!(!config.responders.is_enabled(ResponderRole::Tracing));
        assert!(config.responders.is_enabled(ResponderRole::Postmortem));
        assert!(config.responders.is_enabled(ResponderRole::Metric));
        assert_eq!(config.relay.targets(), vec![ResponderRole::Postmortem]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("coordinator:\n  sweep-interval-secs: 5\n").unwrap();

        assert_eq!(config.coordinator.sweep_interval_secs, 5);
        assert_eq!(config.coordinator.response_deadline_secs, 300);
        assert_eq!(config.bus.subscription_buffer, 1024);
        assert!(config.responders.metric);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.coordinator.response_deadline_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bus.reconnect.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("incidentd.yml");
        fs::write(&path, "bus:\n  endpoint: memory\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bus.endpoint, "memory");

        let missing = temp.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_responder_toggles_only() {
        let toggles = ResponderToggles::only(&[ResponderRole::Log, ResponderRole::Postmortem]);
        assert_eq!(
            toggles.enabled().into_iter().collect::<Vec<_>>(),
            vec![ResponderRole::Log, ResponderRole::Postmortem]
        );
    }
}
