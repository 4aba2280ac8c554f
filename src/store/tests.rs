//! Store Module Tests
//!
//! Exercises the task lifecycle against an in-memory SQLite database.
//!
//! ## Test Scopes
//! - **Claim protocol**: FIFO ordering, empty-queue behavior, attempt counting.
//! - **Lease discipline**: stale submits rejected, checkpoints refresh leases.
//! - **Monitor**: dead-worker sweep, reclaim idempotence, no orphan `in_progress`.
//! - **Concurrency**: parallel claimers never share a task.

#[cfg(test)]
mod tests {
    use crate::store::types::*;
    use crate::store::Store;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(120);

    async fn store_with_tasks(count: usize) -> Arc<Store> {
        let store = Store::open_in_memory().expect("open in-memory store");
        for i in 0..count {
            store
                .submit_task("prime", &json!({"limit": 100 + i}))
                .await
                .expect("submit task");
        }
        store
    }

    // ============================================================
    // TEST 1: Submission and claim basics
    // ============================================================

    #[tokio::test]
    async fn test_submit_assigns_dense_increasing_ids() {
        let store = Store::open_in_memory().unwrap();

        let first = store.submit_task("prime", &json!({})).await.unwrap();
        let second = store.submit_task("prime", &json!({})).await.unwrap();
        let third = store.submit_task("compute", &json!({})).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
    }

    #[tokio::test]
    async fn test_claim_is_fifo_by_task_id() {
        let store = store_with_tasks(3).await;

        let a = store.claim_task("w1", LEASE).await.unwrap().unwrap();
        let b = store.claim_task("w1", LEASE).await.unwrap().unwrap();
        let c = store.claim_task("w2", LEASE).await.unwrap().unwrap();

        assert_eq!(a.task_id, 1);
        assert_eq!(b.task_id, 2);
        assert_eq!(c.task_id, 3);
    }

    #[tokio::test]
    async fn test_claim_empty_queue_returns_none_but_registers_worker() {
        let store = Store::open_in_memory().unwrap();

        let claimed = store.claim_task("w1", LEASE).await.unwrap();
        assert!(claimed.is_none());

        // The heartbeat refresh is the only side effect
        let workers = store.workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker_id, "w1");
        assert_eq!(workers[0].status, WorkerStatus::Alive);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_progress, 0);
    }

    #[tokio::test]
    async fn test_claim_sets_lease_owner_and_attempts() {
        let store = store_with_tasks(1).await;

        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.checkpoint.is_none());

        let view = store.get_task(claimed.task_id).await.unwrap().unwrap();
        assert_eq!(view.task.status, TaskStatus::InProgress);
        assert_eq!(view.task.assigned_worker.as_deref(), Some("w1"));
        assert!(view.task.lease_expires_at.is_some());
        assert_eq!(view.task.attempts, 1);
    }

    // ============================================================
    // TEST 2: Result submission and lease preconditions
    // ============================================================

    #[tokio::test]
    async fn test_submit_result_completes_task_and_clears_assignment() {
        let store = store_with_tasks(1).await;
        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();

        let status = store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({"count": 25}))
            .await
            .unwrap();
        assert_eq!(status, SubmitStatus::Saved);

        let view = store.get_task(claimed.task_id).await.unwrap().unwrap();
        assert_eq!(view.task.status, TaskStatus::Completed);
        // The worker id moves into the result row, not the task row
        assert!(view.task.assigned_worker.is_none());
        assert!(view.task.lease_expires_at.is_none());

        let result = view.result.expect("result row exists");
        assert_eq!(result.worker_id, "w1");
        assert_eq!(result.outcome, TaskOutcome::Success);
        assert_eq!(result.result["count"], 25);
    }

    #[tokio::test]
    async fn test_submit_result_rejects_wrong_owner() {
        let store = store_with_tasks(1).await;
        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();

        let status = store
            .submit_result("w2", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();

        assert!(matches!(status, SubmitStatus::Rejected { .. }));

        // Task untouched, no result written
        let view = store.get_task(claimed.task_id).await.unwrap().unwrap();
        assert_eq!(view.task.status, TaskStatus::InProgress);
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn test_submit_result_rejects_expired_lease_even_before_reclaim() {
        let store = store_with_tasks(1).await;
        let claimed = store
            .claim_task("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        // The monitor has not run; the task is still nominally in_progress
        let status = store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();

        assert!(matches!(status, SubmitStatus::Rejected { .. }));
        let view = store.get_task(claimed.task_id).await.unwrap().unwrap();
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn test_submit_result_rejects_unknown_and_terminal_tasks() {
        let store = store_with_tasks(1).await;

        let status = store
            .submit_result("w1", 999, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();
        assert!(matches!(status, SubmitStatus::Rejected { .. }));

        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();
        store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();

        // Second submission for the same attempt hits a terminal task
        let status = store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();
        assert!(matches!(status, SubmitStatus::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_failed_outcome_is_terminal() {
        let store = store_with_tasks(1).await;
        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();

        store
            .submit_result(
                "w1",
                claimed.task_id,
                TaskOutcome::Failed,
                &json!({"error": "task type not implemented"}),
            )
            .await
            .unwrap();

        let view = store.get_task(claimed.task_id).await.unwrap().unwrap();
        assert_eq!(view.task.status, TaskStatus::Failed);
        assert_eq!(view.result.unwrap().outcome, TaskOutcome::Failed);

        // Failed tasks are not eligible for claim again
        assert!(store.claim_task("w2", LEASE).await.unwrap().is_none());
    }

    // ============================================================
    // TEST 3: Checkpoints
    // ============================================================

    #[tokio::test]
    async fn test_checkpoint_increments_seq_and_refreshes_lease() {
        let store = store_with_tasks(1).await;
        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();

        let first = store
            .save_checkpoint("w1", claimed.task_id, &json!({"last_checked": 500}), 100, LEASE)
            .await
            .unwrap();
        let CheckpointStatus::Renewed { lease_expires_at } = first else {
            panic!("checkpoint rejected");
        };
        assert!(lease_expires_at >= claimed.lease_expires_at);

        store
            .save_checkpoint("w1", claimed.task_id, &json!({"last_checked": 900}), 200, LEASE)
            .await
            .unwrap();

        // Old seqs are compacted; only the newest row remains
        assert_eq!(store.checkpoint_count(claimed.task_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_keeps_long_task_alive() {
        let store = store_with_tasks(1).await;
        let lease = Duration::from_millis(80);
        let claimed = store.claim_task("w1", lease).await.unwrap().unwrap();

        // Checkpoint at roughly lease/2 for several periods
        for step in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let status = store
                .save_checkpoint("w1", claimed.task_id, &json!({"step": step}), step * 40, lease)
                .await
                .unwrap();
            assert!(matches!(status, CheckpointStatus::Renewed { .. }));
        }

        // Well past the original deadline, the submit still lands
        let status = store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();
        assert_eq!(status, SubmitStatus::Saved);
    }

    #[tokio::test]
    async fn test_checkpoint_rejected_for_non_owner_and_expired_lease() {
        let store = store_with_tasks(1).await;
        let claimed = store
            .claim_task("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let status = store
            .save_checkpoint("w2", claimed.task_id, &json!({}), 0, LEASE)
            .await
            .unwrap();
        assert!(matches!(status, CheckpointStatus::Rejected { .. }));

        tokio::time::sleep(Duration::from_millis(40)).await;

        let status = store
            .save_checkpoint("w1", claimed.task_id, &json!({}), 0, LEASE)
            .await
            .unwrap();
        assert!(matches!(status, CheckpointStatus::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_checkpoints_survive_reclaim_and_ride_along_on_reclaim() {
        let store = store_with_tasks(1).await;
        let claimed = store
            .claim_task("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        store
            .save_checkpoint(
                "w1",
                claimed.task_id,
                &json!({"last_checked": 5000, "primes": [2, 3, 5]}),
                250,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        store.sweep_and_reclaim(Duration::from_secs(60)).await.unwrap();

        // A second worker claims the reclaimed task and resumes
        let reclaimed = store.claim_task("w2", LEASE).await.unwrap().unwrap();
        assert_eq!(reclaimed.task_id, claimed.task_id);
        assert_eq!(reclaimed.attempts, 2);

        let checkpoint = reclaimed.checkpoint.expect("checkpoint attached to claim");
        assert_eq!(checkpoint.state["last_checked"], 5000);
        assert_eq!(checkpoint.elapsed_ms, 250);
    }

    #[tokio::test]
    async fn test_checkpoints_deleted_on_completion() {
        let store = store_with_tasks(1).await;
        let claimed = store.claim_task("w1", LEASE).await.unwrap().unwrap();

        store
            .save_checkpoint("w1", claimed.task_id, &json!({"step": 1}), 10, LEASE)
            .await
            .unwrap();
        assert_eq!(store.checkpoint_count(claimed.task_id).await.unwrap(), 1);

        store
            .submit_result("w1", claimed.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();

        assert_eq!(store.checkpoint_count(claimed.task_id).await.unwrap(), 0);
    }

    // ============================================================
    // TEST 4: Monitor sweep and reclaim
    // ============================================================

    #[tokio::test]
    async fn test_reclaim_on_expired_lease_keeps_attempts() {
        let store = store_with_tasks(1).await;
        store
            .claim_task("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = store.sweep_and_reclaim(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.tasks_reclaimed, 1);

        let view = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(view.task.status, TaskStatus::Pending);
        assert!(view.task.assigned_worker.is_none());
        assert!(view.task.lease_expires_at.is_none());
        // Reclaim does not touch the attempt counter
        assert_eq!(view.task.attempts, 1);
    }

    #[tokio::test]
    async fn test_dead_worker_sweep_reclaims_even_with_live_lease() {
        let store = store_with_tasks(1).await;
        store.claim_task("w1", LEASE).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Worker silent past the (tiny) dead-after threshold; the lease
        // itself is nowhere near expiry
        let report = store
            .sweep_and_reclaim(Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(report.workers_marked_dead, 1);
        assert_eq!(report.tasks_reclaimed, 1);

        let workers = store.workers().await.unwrap();
        assert_eq!(workers[0].status, WorkerStatus::Dead);
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let store = store_with_tasks(2).await;
        store
            .claim_task("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let first = store.sweep_and_reclaim(Duration::from_secs(60)).await.unwrap();
        let second = store.sweep_and_reclaim(Duration::from_secs(60)).await.unwrap();

        assert_eq!(first.tasks_reclaimed, 1);
        assert_eq!(second.tasks_reclaimed, 0);
        assert_eq!(second.workers_marked_dead, 0);
    }

    #[tokio::test]
    async fn test_no_orphan_in_progress_after_silent_fleet() {
        let store = store_with_tasks(4).await;

        store.claim_task("w1", Duration::from_millis(10)).await.unwrap();
        store.claim_task("w2", Duration::from_millis(10)).await.unwrap();
        let done = store.claim_task("w3", LEASE).await.unwrap().unwrap();
        store
            .submit_result("w3", done.task_id, TaskOutcome::Success, &json!({}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        store
            .sweep_and_reclaim(Duration::from_millis(5))
            .await
            .unwrap();

        // Every task is pending, completed or failed
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.in_progress, 0);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_revives_dead_worker() {
        let store = Store::open_in_memory().unwrap();
        store.heartbeat("w1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep_and_reclaim(Duration::from_millis(5)).await.unwrap();
        assert_eq!(store.workers().await.unwrap()[0].status, WorkerStatus::Dead);

        store.heartbeat("w1").await.unwrap();
        assert_eq!(store.workers().await.unwrap()[0].status, WorkerStatus::Alive);
    }

    // ============================================================
    // TEST 5: Concurrent claims stay disjoint
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_task() {
        const TASKS: usize = 40;
        const WORKERS: usize = 4;

        let store = store_with_tasks(TASKS).await;

        let mut handles = Vec::new();
        for w in 0..WORKERS {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let worker_id = format!("w{}", w);
                let mut claimed = Vec::new();
                while let Some(task) = store.claim_task(&worker_id, LEASE).await.unwrap() {
                    claimed.push(task.task_id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0usize;
        for handle in handles {
            for task_id in handle.await.unwrap() {
                assert!(seen.insert(task_id), "task {} claimed twice", task_id);
                total += 1;
            }
        }

        assert_eq!(total, TASKS);

        // Exactly one attempt per task under happy conditions
        let mut attempts_sum = 0;
        for id in 1..=TASKS as i64 {
            attempts_sum += store.get_task(id).await.unwrap().unwrap().task.attempts;
        }
        assert_eq!(attempts_sum, TASKS as u32);
    }
}
