//! Append-only journal so cached alerts survive a restart

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::CacheError;
use crate::domain::EnrichedAlert;

/// One cached alert as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub key: String,
    pub value: EnrichedAlert,
    /// Unix timestamp (seconds) after which the record is dead
    pub expires_at: i64,
}

impl JournalRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// JSONL journal of cache writes
pub struct CacheJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CacheJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "CacheJournal::new: called");
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_dir(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Append one record
    pub async fn append(&self, record: &JournalRecord) -> Result<(), CacheError> {
        debug!(key = %record.key, "CacheJournal::append: called");
        let line = serde_json::to_string(record)? + "\n";

        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read live records and rewrite the file to contain only those
    ///
    /// The latest record per key wins. Unparseable lines are skipped.
    pub async fn load(&self) -> Result<Vec<JournalRecord>, CacheError> {
        debug!(path = ?self.path, "CacheJournal::load: called");
        let _guard = self.write_lock.lock().await;

        if !fs::try_exists(&self.path).await? {
            debug!("CacheJournal::load: journal does not exist");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let now = Utc::now().timestamp();
        let mut latest: HashMap<String, JournalRecord> = HashMap::new();
        let mut total = 0usize;

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            total += 1;
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => {
                    latest.insert(record.key.clone(), record);
                }
                Err(e) => warn!(line = lineno + 1, error = %e, "Skipping corrupt cache journal line"),
            }
        }

        let mut live: Vec<JournalRecord> = latest.into_values().filter(|r| !r.is_expired(now)).collect();
        live.sort_by_key(|r| r.expires_at);

        if live.len() != total {
            debug!(kept = live.len(), total, "CacheJournal::load: compacting");
            self.write_records(&live).await?;
        }

        Ok(live)
    }

    /// Replace the journal with the records returned by `snapshot`
    ///
    /// `snapshot` runs under the write lock, so an append racing the rewrite
    /// lands after it instead of being lost. Returns the number of records kept.
    pub async fn rewrite<F>(&self, snapshot: F) -> Result<usize, CacheError>
    where
        F: FnOnce() -> Vec<JournalRecord>,
    {
        let _guard = self.write_lock.lock().await;
        let records = snapshot();
        debug!(kept = records.len(), "CacheJournal::rewrite: called");
        self.ensure_dir().await?;
        self.write_records(&records).await?;
        Ok(records.len())
    }

    /// Write `records` to a sibling file and move it over the journal
    async fn write_records(&self, records: &[JournalRecord]) -> Result<(), CacheError> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawAlert;
    use tempfile::tempdir;

    fn record(key: &str, expires_at: i64) -> JournalRecord {
        JournalRecord {
            key: key.to_string(),
            value: EnrichedAlert::new(RawAlert {
                alert_id: Some(key.trim_start_matches("alert:").to_string()),
                ..Default::default()
            }),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_load_missing_journal_is_empty() {
        let temp = tempdir().unwrap();
        let journal = CacheJournal::new(temp.path().join("cache.jsonl"));
        assert!(journal.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_keeps_latest_live_record_and_compacts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("cache.jsonl");
        let journal = CacheJournal::new(&path);
        let future = Utc::now().timestamp() + 3600;

        journal.append(&record("alert:A1", future)).await.unwrap();
        journal.append(&record("alert:A1", future + 10)).await.unwrap();
        journal.append(&record("alert:OLD", 1)).await.unwrap();
        fs::write(
            &path,
            fs::read_to_string(&path).await.unwrap() + "not json\n",
        )
        .await
        .unwrap();

        let live = journal.load().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "alert:A1");
        assert_eq!(live[0].expires_at, future + 10);

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.jsonl");
        let journal = CacheJournal::new(&path);
        let future = Utc::now().timestamp() + 3600;

        for i in 0..5 {
            journal.append(&record(&format!("alert:A{}", i), future)).await.unwrap();
        }

        let kept = journal.rewrite(|| vec![record("alert:A3", future)]).await.unwrap();
        assert_eq!(kept, 1);

        let live = journal.load().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "alert:A3");
        assert!(!temp.path().join("cache.jsonl.tmp").exists());

        assert_eq!(journal.rewrite(Vec::new).await.unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "");
    }
}
