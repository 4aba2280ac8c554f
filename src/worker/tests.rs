//! Worker Module Tests
//!
//! ## Test Scopes
//! - **Cache**: round-trip, keying, TTL expiry, corrupt-file tolerance.
//! - **Wiring**: worker construction creates its cache directory.

#[cfg(test)]
mod tests {
    use crate::config::WorkerConfig;
    use crate::store::types::{TaskOutcome, now_ms};
    use crate::tasks::TaskRegistry;
    use crate::worker::Worker;
    use crate::worker::cache::{CachedResult, SubmissionCache};

    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn entry(task_id: i64) -> CachedResult {
        CachedResult {
            task_id,
            worker_id: "w1".to_string(),
            outcome: TaskOutcome::Success,
            result: json!({"count": 168}),
            created_at: now_ms(),
        }
    }

    // ============================================================
    // TEST 1: Cache round-trip
    // ============================================================

    #[test]
    fn test_cache_save_and_list() {
        let dir = tempdir().unwrap();
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();

        assert!(cache.is_empty());

        cache.save(&entry(2)).unwrap();
        cache.save(&entry(1)).unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 2);
        // Ordered by task id regardless of write order
        assert_eq!(entries[0].1.task_id, 1);
        assert_eq!(entries[1].1.task_id, 2);
        assert_eq!(entries[0].1.result["count"], 168);
        assert_eq!(entries[0].1.outcome, TaskOutcome::Success);
    }

    #[test]
    fn test_cache_is_keyed_by_task_id() {
        let dir = tempdir().unwrap();
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();

        cache.save(&entry(7)).unwrap();

        let mut replacement = entry(7);
        replacement.result = json!({"count": 25});
        cache.save(&replacement).unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.result["count"], 25);
    }

    #[test]
    fn test_cache_remove() {
        let dir = tempdir().unwrap();
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();

        cache.save(&entry(1)).unwrap();
        let (path, _) = cache.entries().unwrap().remove(0);
        cache.remove(&path);

        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let cache =
                SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();
            cache.save(&entry(5)).unwrap();
        }

        // A restarted worker opens the same directory and finds the entry
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries().unwrap()[0].1.task_id, 5);
    }

    #[test]
    fn test_cache_per_worker_isolation() {
        let dir = tempdir().unwrap();
        let cache_a = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();
        let cache_b = SubmissionCache::open(dir.path(), "w2", Duration::from_secs(3600)).unwrap();

        cache_a.save(&entry(1)).unwrap();

        assert_eq!(cache_a.len(), 1);
        assert!(cache_b.is_empty());
    }

    // ============================================================
    // TEST 2: TTL
    // ============================================================

    #[test]
    fn test_cache_ttl_expiry() {
        let dir = tempdir().unwrap();
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_millis(50)).unwrap();

        let mut stale = entry(1);
        stale.created_at = now_ms() - 1000;
        let fresh = entry(2);

        assert!(cache.is_expired(&stale));
        assert!(!cache.is_expired(&fresh));
    }

    // ============================================================
    // TEST 3: Corrupt files are skipped, not fatal
    // ============================================================

    #[test]
    fn test_cache_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let cache = SubmissionCache::open(dir.path(), "w1", Duration::from_secs(3600)).unwrap();

        cache.save(&entry(1)).unwrap();
        std::fs::write(dir.path().join("w1").join("task_2.json"), b"not json").unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.task_id, 1);
    }

    // ============================================================
    // TEST 4: Worker wiring
    // ============================================================

    #[tokio::test]
    async fn test_worker_new_creates_cache_directory() {
        let dir = tempdir().unwrap();
        let config = WorkerConfig {
            worker_id: "w1".to_string(),
            dispatcher_url: "http://localhost:5000".to_string(),
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            cache_retry_interval: Duration::from_secs(20),
            cache_ttl: Duration::from_secs(3600),
            cache_dir: dir.path().join("cache"),
        };

        let worker = Worker::new(config, TaskRegistry::with_builtins()).unwrap();

        assert!(dir.path().join("cache").join("w1").is_dir());
        assert!(!worker.shutdown_handle().load(std::sync::atomic::Ordering::SeqCst));
    }
}
