//! Time-bounded store of enriched alerts, keyed by alert id
//!
//! Entries outlive their sessions so that late lookups can still be answered.
//! Expiry is checked on read and swept periodically.

mod journal;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::EnrichedAlert;

pub use journal::{CacheJournal, JournalRecord};

/// Errors raised by the alert cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache journal codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage key for an alert
pub fn cache_key(alert_id: &str) -> String {
    format!("alert:{}", alert_id)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    alert: EnrichedAlert,
    expires_at: Instant,
}

/// Alert cache with a fixed time-to-live
pub struct AlertCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    journal: Option<CacheJournal>,
}

impl AlertCache {
    /// In-memory cache
    pub fn new(ttl: Duration) -> Self {
        debug!(?ttl, "AlertCache::new: called");
        Self {
            entries: DashMap::new(),
            ttl,
            journal: None,
        }
    }

    /// Cache backed by a journal at `path`, restoring its live entries
    pub async fn with_journal(ttl: Duration, path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let journal = CacheJournal::new(path);
        let records = journal.load().await?;

        let cache = Self {
            entries: DashMap::new(),
            ttl,
            journal: None,
        };
        let restored = records.len();
        cache.restore(records);
        info!(restored, path = ?journal.path(), "Alert cache restored from journal");

        Ok(Self {
            journal: Some(journal),
            ..cache
        })
    }

    /// Load records, converting their wall-clock expiry to the monotonic clock
    fn restore(&self, records: Vec<JournalRecord>) {
        let now_unix = Utc::now().timestamp();
        let now = Instant::now();
        for record in records {
            let remaining = record.expires_at.saturating_sub(now_unix);
            if remaining <= 0 {
                continue;
            }
            self.entries.insert(
                record.key,
                CacheEntry {
                    alert: record.value,
                    expires_at: now + Duration::from_secs(remaining as u64),
                },
            );
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `alert` under its id, replacing any previous entry
    pub async fn put(&self, alert: &EnrichedAlert) -> Result<(), CacheError> {
        let key = cache_key(&alert.alert_id);
        debug!(%key, "AlertCache::put: called");
        self.entries.insert(
            key.clone(),
            CacheEntry {
                alert: alert.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        if let Some(journal) = &self.journal {
            let record = JournalRecord {
                key,
                value: alert.clone(),
                expires_at: Utc::now().timestamp() + self.ttl.as_secs() as i64,
            };
            journal.append(&record).await?;
        }
        Ok(())
    }

    /// Fetch a live entry
    pub fn get(&self, alert_id: &str) -> Option<EnrichedAlert> {
        let key = cache_key(alert_id);
        let now = Instant::now();
        let hit = self
            .entries
            .get(&key)
            .map(|entry| (entry.expires_at > now, entry.alert.clone()));

        match hit {
            Some((true, alert)) => Some(alert),
            Some((false, _)) => {
                debug!(%key, "AlertCache::get: expired");
                self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    /// Drop expired entries, returning how many were removed
    ///
    /// When anything was dropped the journal is rewritten to the live entries,
    /// so it never grows past what a restart would restore.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "AlertCache::purge_expired: purged entries");
            self.compact_journal().await?;
        }
        Ok(purged)
    }

    /// Rewrite the journal to hold exactly the live entries
    ///
    /// Returns the number of records kept, `0` for a cache without a journal.
    pub async fn compact_journal(&self) -> Result<usize, CacheError> {
        match &self.journal {
            Some(journal) => journal.rewrite(|| self.live_records()).await,
            None => Ok(0),
        }
    }

    /// Live entries as journal records, monotonic expiry mapped back to wall clock
    fn live_records(&self) -> Vec<JournalRecord> {
        let now = Instant::now();
        let now_unix = Utc::now().timestamp();
        let mut records: Vec<JournalRecord> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| {
                let remaining = entry.expires_at.duration_since(now);
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                JournalRecord {
                    key: entry.key().clone(),
                    value: entry.alert.clone(),
                    expires_at: now_unix + secs as i64,
                }
            })
            .collect();
        records.sort_by_key(|r| r.expires_at);
        records
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawAlert;
    use tempfile::tempdir;

    fn alert(id: &str) -> EnrichedAlert {
        EnrichedAlert::new(RawAlert {
            alert_id: Some(id.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_respects_ttl() {
        let cache = AlertCache::new(Duration::from_secs(60));
        cache.put(&alert("A1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("A1").unwrap().alert_id, "A1");

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("A1").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_expiry() {
        let cache = AlertCache::new(Duration::from_secs(60));
        cache.put(&alert("A1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.put(&alert("A1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        assert!(cache.get("A1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = AlertCache::new(Duration::from_secs(10));
        cache.put(&alert("A1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put(&alert("A2")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("A2").is_some());
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("A1"), "alert:A1");
    }

    #[tokio::test]
    async fn test_journal_restores_entries() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.jsonl");

        {
            let cache = AlertCache::with_journal(Duration::from_secs(3600), &path).await.unwrap();
            cache.put(&alert("A1")).await.unwrap();
            cache.put(&alert("A2")).await.unwrap();
        }

        let restored = AlertCache::with_journal(Duration::from_secs(3600), &path).await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("A2").unwrap().alert_id, "A2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_compacts_journal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.jsonl");
        let cache = AlertCache::with_journal(Duration::from_secs(1), &path).await.unwrap();

        for i in 0..50 {
            cache.put(&alert(&format!("A{}", i))).await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 50);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 50);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_live_entries_in_journal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.jsonl");
        let cache = AlertCache::with_journal(Duration::from_secs(600), &path).await.unwrap();

        for i in 0..10 {
            cache.put(&alert(&format!("OLD{}", i))).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(400)).await;
        cache.put(&alert("FRESH")).await.unwrap();
        tokio::time::advance(Duration::from_secs(201)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 10);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("alert:FRESH"));

        let restored = AlertCache::with_journal(Duration::from_secs(600), &path).await.unwrap();
        assert_eq!(restored.get("FRESH").unwrap().alert_id, "FRESH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_without_expired_entries_leaves_journal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.jsonl");
        let cache = AlertCache::with_journal(Duration::from_secs(600), &path).await.unwrap();
        cache.put(&alert("A1")).await.unwrap();
        cache.put(&alert("A1")).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
