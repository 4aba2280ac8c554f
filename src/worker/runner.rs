//! Worker Main Loop
//!
//! A worker is one cooperative loop: claim → execute (with optional
//! checkpoints) → submit → repeat. Two background tickers run alongside it:
//! the heartbeat, which must keep its schedule while an executor is busy,
//! and the cache retry, which re-delivers parked results. Scale comes from
//! running more worker processes, not from parallelism inside one.

use super::cache::{CachedResult, SubmissionCache};
use super::client::{CheckpointDelivery, DispatcherClient, SubmitDelivery};
use crate::config::WorkerConfig;
use crate::store::types::{ClaimedTask, TaskOutcome, now_ms};
use crate::tasks::{CheckpointAck, CheckpointFn, ResumeState, TaskContext, TaskRegistry};

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub struct Worker {
    config: WorkerConfig,
    client: Arc<DispatcherClient>,
    registry: Arc<TaskRegistry>,
    cache: Arc<SubmissionCache>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: WorkerConfig, registry: Arc<TaskRegistry>) -> Result<Arc<Self>> {
        let client = Arc::new(DispatcherClient::new(&config.dispatcher_url));
        let cache = Arc::new(SubmissionCache::open(
            &config.cache_dir,
            &config.worker_id,
            config.cache_ttl,
        )?);

        Ok(Arc::new(Self {
            config,
            client,
            registry,
            cache,
            shutdown: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Flag the signal handler flips to stop the loops.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            "Worker {} starting (dispatcher: {})",
            self.config.worker_id,
            self.config.dispatcher_url
        );

        // Register immediately, then keep the ticker going
        self.client.heartbeat(&self.config.worker_id).await;

        let heartbeat_handle = {
            let worker = self.clone();
            tokio::spawn(async move {
                worker.heartbeat_loop().await;
            })
        };

        // Results parked by a previous incarnation go out before any new claim
        self.drain_cache_until_empty().await;

        let cache_retry_handle = {
            let worker = self.clone();
            tokio::spawn(async move {
                worker.cache_retry_loop().await;
            })
        };

        self.task_loop().await;

        heartbeat_handle.abort();
        cache_retry_handle.abort();

        // One last delivery attempt so a clean shutdown leaves nothing behind
        self.drain_cache_once().await;

        tracing::info!("Worker {} stopped", self.config.worker_id);

        Ok(())
    }

    async fn task_loop(&self) {
        while !self.shutting_down() {
            match self.client.claim_task(&self.config.worker_id).await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                }
                Ok(None) => {
                    tracing::debug!(
                        "No tasks available, waiting {:?}",
                        self.config.poll_interval
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to poll for task: {}", e);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
                    tokio::time::sleep(self.config.poll_interval + jitter).await;
                }
            }
        }
    }

    async fn process_task(&self, task: ClaimedTask) {
        let task_id = task.task_id;

        tracing::info!(
            "Task {} received (type: {}, attempt {})",
            task_id,
            task.task_type,
            task.attempts
        );

        let Some(handler) = self.registry.get(&task.task_type) else {
            tracing::warn!("Task {} has unknown type '{}'", task_id, task.task_type);
            self.deliver(
                task_id,
                TaskOutcome::Failed,
                &json!({"error": "task type not implemented"}),
            )
            .await;
            return;
        };

        let resume = task.checkpoint.map(|checkpoint| {
            tracing::info!(
                "Task {} resumes from checkpoint seq {} ({}ms of progress)",
                task_id,
                checkpoint.seq,
                checkpoint.elapsed_ms
            );
            ResumeState {
                state: checkpoint.state,
                elapsed_ms: checkpoint.elapsed_ms,
            }
        });

        let ctx = TaskContext {
            task_id,
            payload: task.payload,
            resume,
            checkpoint: self.checkpoint_callback(task_id, task.lease_expires_at),
        };

        let (outcome, result) = match handler(ctx).await {
            Ok(value) => (TaskOutcome::Success, value),
            Err(e) => {
                tracing::error!("Task {} failed: {}", task_id, e);
                (TaskOutcome::Failed, json!({"error": e.to_string()}))
            }
        };

        self.deliver(task_id, outcome, &result).await;
    }

    /// The single capability executors get for saving progress. REJECT means
    /// the lease is gone and the attempt is doomed. A transient failure here
    /// has already been retried with backoff inside the client; once those
    /// attempts are spent, the executor carries on against the last known
    /// deadline and the next checkpoint tries again.
    fn checkpoint_callback(&self, task_id: i64, initial_deadline: u64) -> CheckpointFn {
        let client = self.client.clone();
        let worker_id = self.config.worker_id.clone();
        let last_known = Arc::new(AtomicU64::new(initial_deadline));

        Arc::new(move |state, elapsed_ms| {
            let client = client.clone();
            let worker_id = worker_id.clone();
            let last_known = last_known.clone();

            Box::pin(async move {
                match client
                    .save_checkpoint(&worker_id, task_id, &state, elapsed_ms)
                    .await
                {
                    CheckpointDelivery::Renewed { lease_expires_at } => {
                        last_known.store(lease_expires_at, Ordering::SeqCst);
                        Ok(CheckpointAck::Renewed { lease_expires_at })
                    }
                    CheckpointDelivery::Rejected { reason } => {
                        tracing::warn!("Checkpoint for task {} rejected: {}", task_id, reason);
                        Ok(CheckpointAck::Lost)
                    }
                    CheckpointDelivery::Transient { error } => {
                        tracing::warn!(
                            "Checkpoint for task {} not delivered ({}); continuing on current lease",
                            task_id,
                            error
                        );
                        Ok(CheckpointAck::Renewed {
                            lease_expires_at: last_known.load(Ordering::SeqCst),
                        })
                    }
                }
            })
        })
    }

    /// Submit a result; on transport failure park it in the cache. REJECT is
    /// terminal: the result is discarded, never retried.
    async fn deliver(&self, task_id: i64, outcome: TaskOutcome, result: &serde_json::Value) {
        match self
            .client
            .submit_result(&self.config.worker_id, task_id, outcome, result)
            .await
        {
            SubmitDelivery::Ack => {
                tracing::info!("Result for task {} submitted", task_id);
            }
            SubmitDelivery::Rejected { reason } => {
                tracing::warn!("Result for task {} rejected ({}); discarding", task_id, reason);
            }
            SubmitDelivery::Transient { error } => {
                tracing::warn!(
                    "Dispatcher unreachable for task {} ({}); caching result",
                    task_id,
                    error
                );

                let entry = CachedResult {
                    task_id,
                    worker_id: self.config.worker_id.clone(),
                    outcome,
                    result: result.clone(),
                    created_at: now_ms(),
                };

                if let Err(e) = self.cache.save(&entry) {
                    tracing::error!("Failed to cache result for task {}: {}", task_id, e);
                }
            }
        }
    }

    async fn heartbeat_loop(&self) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        // The first tick fires immediately and run() already sent one
        interval.tick().await;

        while !self.shutting_down() {
            interval.tick().await;
            self.client.heartbeat(&self.config.worker_id).await;
        }
    }

    async fn cache_retry_loop(&self) {
        let mut interval = tokio::time::interval(self.config.cache_retry_interval);
        interval.tick().await;

        while !self.shutting_down() {
            interval.tick().await;
            self.drain_cache_once().await;
        }
    }

    /// One pass over the cache: expired entries are dropped, deliverable
    /// ones submitted. ACK and REJECT both remove the entry; a transient
    /// failure leaves it for the next cycle.
    async fn drain_cache_once(&self) {
        let entries = match self.cache.entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read cache: {}", e);
                return;
            }
        };

        for (path, entry) in entries {
            if self.cache.is_expired(&entry) {
                tracing::warn!(
                    "Discarding cached result for task {} (older than TTL)",
                    entry.task_id
                );
                self.cache.remove(&path);
                continue;
            }

            match self
                .client
                .submit_result(&entry.worker_id, entry.task_id, entry.outcome, &entry.result)
                .await
            {
                SubmitDelivery::Ack => {
                    tracing::info!("Cached result for task {} delivered", entry.task_id);
                    self.cache.remove(&path);
                }
                SubmitDelivery::Rejected { reason } => {
                    tracing::warn!(
                        "Cached result for task {} rejected ({}); dropping",
                        entry.task_id,
                        reason
                    );
                    self.cache.remove(&path);
                }
                SubmitDelivery::Transient { error } => {
                    tracing::debug!(
                        "Cached result for task {} still undeliverable: {}",
                        entry.task_id,
                        error
                    );
                }
            }
        }
    }

    /// Startup drain: keep retrying until the cache is empty so results from
    /// a previous incarnation land before this one claims anything new.
    async fn drain_cache_until_empty(&self) {
        loop {
            self.drain_cache_once().await;

            if self.cache.is_empty() || self.shutting_down() {
                break;
            }

            tracing::info!(
                "{} cached result(s) still undelivered; retrying in {:?}",
                self.cache.len(),
                self.config.cache_retry_interval
            );
            tokio::time::sleep(self.config.cache_retry_interval).await;
        }
    }
}
