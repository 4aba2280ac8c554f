//! HTTP client for the coordinator API.
//!
//! Every call uses a bounded timeout. A 409 is a contract rejection and
//! terminal for the caller's attempt. Transport failures on the idempotent
//! operations (submit, checkpoint, heartbeat) are retried a few times with
//! doubling backoff and jitter before being reported as transient; claims
//! get exactly one attempt, because a claim whose response is lost leaves a
//! leased task orphaned until reclaim, and the poll loop retries anyway.

use crate::dispatcher::protocol::*;
use crate::store::types::{ClaimedTask, TaskOutcome};

use anyhow::Result;
use std::time::Duration;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

const SUBMIT_ATTEMPTS: usize = 3;
const CHECKPOINT_ATTEMPTS: usize = 3;
const HEARTBEAT_ATTEMPTS: usize = 2;

/// How a result submission went, from the worker's point of view.
#[derive(Debug, Clone)]
pub enum SubmitDelivery {
    Ack,
    Rejected { reason: String },
    Transient { error: String },
}

/// How a checkpoint save went.
#[derive(Debug, Clone)]
pub enum CheckpointDelivery {
    Renewed { lease_expires_at: u64 },
    Rejected { reason: String },
    Transient { error: String },
}

pub struct DispatcherClient {
    base_url: String,
    http: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Ask for the oldest pending task. `Ok(None)` is an empty queue;
    /// `Err` is transient and the poll loop will come back.
    ///
    /// Single attempt on purpose: a retry after a lost response could claim
    /// a second task while the first sits leased to us unseen.
    pub async fn claim_task(&self, worker_id: &str) -> Result<Option<ClaimedTask>> {
        let response = self
            .http
            .post(self.url(ENDPOINT_CLAIM_TASK))
            .json(&ClaimTaskRequest {
                worker_id: worker_id.to_string(),
                lease_duration_secs: None,
            })
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Claim failed: HTTP {}", response.status());
        }

        let body: ClaimTaskResponse = response.json().await?;
        Ok(body.task)
    }

    pub async fn submit_result(
        &self,
        worker_id: &str,
        task_id: i64,
        outcome: TaskOutcome,
        result: &serde_json::Value,
    ) -> SubmitDelivery {
        let request = SubmitResultRequest {
            worker_id: worker_id.to_string(),
            task_id,
            outcome,
            result: result.clone(),
        };

        let response = match self
            .post_with_retry(
                self.url(ENDPOINT_SUBMIT_RESULT),
                &request,
                SUBMIT_TIMEOUT,
                SUBMIT_ATTEMPTS,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SubmitDelivery::Transient {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body: Result<SubmitResultResponse, _> = response.json().await;

        match (status, body) {
            (reqwest::StatusCode::OK, Ok(body)) if body.ack => SubmitDelivery::Ack,
            (reqwest::StatusCode::CONFLICT, Ok(body)) => SubmitDelivery::Rejected {
                reason: body.reason.unwrap_or_else(|| "rejected".to_string()),
            },
            (status, Ok(body)) => SubmitDelivery::Transient {
                error: format!(
                    "HTTP {}: {}",
                    status,
                    body.reason.unwrap_or_else(|| "no reason".to_string())
                ),
            },
            (status, Err(e)) => SubmitDelivery::Transient {
                error: format!("HTTP {}: {}", status, e),
            },
        }
    }

    /// Save a checkpoint, retrying transport failures in place. The retry
    /// matters here more than anywhere else: a dropped checkpoint means the
    /// lease is not being refreshed at the coordinator while the executor
    /// keeps running, and the next scheduled checkpoint may be far away.
    pub async fn save_checkpoint(
        &self,
        worker_id: &str,
        task_id: i64,
        state: &serde_json::Value,
        elapsed_ms: u64,
    ) -> CheckpointDelivery {
        let request = SaveCheckpointRequest {
            worker_id: worker_id.to_string(),
            task_id,
            state: state.clone(),
            elapsed_ms,
        };

        let response = match self
            .post_with_retry(
                self.url(ENDPOINT_SAVE_CHECKPOINT),
                &request,
                CONTROL_TIMEOUT,
                CHECKPOINT_ATTEMPTS,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return CheckpointDelivery::Transient {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body: Result<SaveCheckpointResponse, _> = response.json().await;

        match (status, body) {
            (reqwest::StatusCode::OK, Ok(body)) => match body.lease_expires_at {
                Some(lease_expires_at) => CheckpointDelivery::Renewed { lease_expires_at },
                None => CheckpointDelivery::Transient {
                    error: "checkpoint ack without lease deadline".to_string(),
                },
            },
            (reqwest::StatusCode::CONFLICT, Ok(body)) => CheckpointDelivery::Rejected {
                reason: body.reason.unwrap_or_else(|| "rejected".to_string()),
            },
            (status, _) => CheckpointDelivery::Transient {
                error: format!("HTTP {}", status),
            },
        }
    }

    /// Fire one heartbeat. Failures are logged and swallowed; the next
    /// interval tick tries again.
    pub async fn heartbeat(&self, worker_id: &str) {
        let request = HeartbeatRequest {
            worker_id: worker_id.to_string(),
        };

        let result = self
            .post_with_retry(
                self.url(ENDPOINT_HEARTBEAT),
                &request,
                CONTROL_TIMEOUT,
                HEARTBEAT_ATTEMPTS,
            )
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::trace!("Heartbeat sent");
            }
            Ok(response) => {
                tracing::warn!("Heartbeat rejected: HTTP {}", response.status());
            }
            Err(e) => {
                tracing::warn!("Heartbeat failed: {}", e);
            }
        }
    }

    /// POST with a bounded number of attempts. Only transport-level failures
    /// are retried; any HTTP response is handed back for the caller to
    /// interpret. Delay doubles per attempt, capped, with a little jitter so
    /// a fleet of workers does not hammer a recovering coordinator in step.
    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    tracing::debug!(
                        "POST {} failed (attempt {}): {}; retrying in {}ms",
                        url,
                        attempt + 1,
                        e,
                        delay_ms
                    );
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
