//! Local submission cache.
//!
//! Finished results that cannot reach the coordinator are parked here as one
//! JSON file per task under `<cache_dir>/<worker_id>/`, and retried on a
//! timer. The cache narrows the window in which a crash loses a delivered
//! result; it does not guarantee delivery. Entries past their TTL are
//! dropped so a permanently-gone coordinator cannot grow the disk forever.

use crate::store::types::{TaskOutcome, now_ms};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One undelivered result, exactly as it will be submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub task_id: i64,
    pub worker_id: String,
    pub outcome: TaskOutcome,
    pub result: serde_json::Value,
    pub created_at: u64,
}

pub struct SubmissionCache {
    dir: PathBuf,
    ttl: Duration,
}

impl SubmissionCache {
    pub fn open(root: &Path, worker_id: &str, ttl: Duration) -> Result<Self> {
        let dir = root.join(worker_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        Ok(Self { dir, ttl })
    }

    fn entry_path(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("task_{}.json", task_id))
    }

    /// Park a result for later delivery. Keyed by task id; a newer result
    /// for the same task replaces the older one.
    pub fn save(&self, entry: &CachedResult) -> Result<()> {
        let path = self.entry_path(entry.task_id);
        let encoded = serde_json::to_vec_pretty(entry)?;
        std::fs::write(&path, encoded)
            .with_context(|| format!("Failed to write cache entry {}", path.display()))?;

        tracing::info!("Result for task {} cached at {}", entry.task_id, path.display());

        Ok(())
    }

    /// All readable entries with their backing paths. Unreadable files are
    /// skipped with a warning rather than wedging the retry loop.
    pub fn entries(&self) -> Result<Vec<(PathBuf, CachedResult)>> {
        let mut entries = Vec::new();

        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Skipping unreadable cache file {}: {}", path.display(), e);
                    continue;
                }
            };

            match serde_json::from_slice::<CachedResult>(&raw) {
                Ok(entry) => entries.push((path, entry)),
                Err(e) => {
                    tracing::warn!("Skipping corrupt cache file {}: {}", path.display(), e);
                }
            }
        }

        entries.sort_by_key(|(_, entry)| entry.task_id);

        Ok(entries)
    }

    pub fn is_expired(&self, entry: &CachedResult) -> bool {
        now_ms().saturating_sub(entry.created_at) > self.ttl.as_millis() as u64
    }

    pub fn remove(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove cache file {}: {}", path.display(), e);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
