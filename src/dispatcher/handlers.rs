//! HTTP Request Handlers
//!
//! Axum route handlers exposing the coordinator operations. Contract
//! rejections (lost lease, wrong owner, unknown task) map to 409 so workers
//! can tell "discard this result" apart from "try again later" (5xx and
//! transport failures).

use super::protocol::*;
use crate::config::DispatcherConfig;
use crate::store::Store;
use crate::store::types::{CheckpointStatus, SubmitStatus, TaskView};

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

/// Client API: enqueue a new task.
pub async fn handle_submit_task(
    Extension(store): Extension<Arc<Store>>,
    Json(req): Json<SubmitTaskRequest>,
) -> (StatusCode, Json<SubmitTaskResponse>) {
    match store.submit_task(&req.task_type, &req.payload).await {
        Ok(task_id) => (
            StatusCode::CREATED,
            Json(SubmitTaskResponse {
                task_id: Some(task_id),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to submit task: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitTaskResponse {
                    task_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Worker API: claim the oldest pending task.
///
/// An empty queue is a normal 200 with `task: null`; the worker's heartbeat
/// was refreshed either way.
pub async fn handle_claim_task(
    Extension(store): Extension<Arc<Store>>,
    Extension(config): Extension<DispatcherConfig>,
    Json(req): Json<ClaimTaskRequest>,
) -> (StatusCode, Json<ClaimTaskResponse>) {
    let lease = req
        .lease_duration_secs
        .map(Duration::from_secs)
        .unwrap_or(config.default_lease_duration);

    match store.claim_task(&req.worker_id, lease).await {
        Ok(task) => (StatusCode::OK, Json(ClaimTaskResponse { task })),
        Err(e) => {
            tracing::error!("Claim failed for worker {}: {}", req.worker_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ClaimTaskResponse { task: None }),
            )
        }
    }
}

/// Worker API: submit the final result for a claimed task.
pub async fn handle_submit_result(
    Extension(store): Extension<Arc<Store>>,
    Json(req): Json<SubmitResultRequest>,
) -> (StatusCode, Json<SubmitResultResponse>) {
    match store
        .submit_result(&req.worker_id, req.task_id, req.outcome, &req.result)
        .await
    {
        Ok(SubmitStatus::Saved) => (
            StatusCode::OK,
            Json(SubmitResultResponse {
                ack: true,
                reason: None,
            }),
        ),
        Ok(SubmitStatus::Rejected { reason }) => {
            tracing::warn!(
                "Rejected result for task {} from worker {}: {}",
                req.task_id,
                req.worker_id,
                reason
            );
            (
                StatusCode::CONFLICT,
                Json(SubmitResultResponse {
                    ack: false,
                    reason: Some(reason),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to save result for task {}: {}", req.task_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitResultResponse {
                    ack: false,
                    reason: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Worker API: save intermediate progress and refresh the lease.
pub async fn handle_save_checkpoint(
    Extension(store): Extension<Arc<Store>>,
    Extension(config): Extension<DispatcherConfig>,
    Json(req): Json<SaveCheckpointRequest>,
) -> (StatusCode, Json<SaveCheckpointResponse>) {
    match store
        .save_checkpoint(
            &req.worker_id,
            req.task_id,
            &req.state,
            req.elapsed_ms,
            config.default_lease_duration,
        )
        .await
    {
        Ok(CheckpointStatus::Renewed { lease_expires_at }) => (
            StatusCode::OK,
            Json(SaveCheckpointResponse {
                ack: true,
                lease_expires_at: Some(lease_expires_at),
                reason: None,
            }),
        ),
        Ok(CheckpointStatus::Rejected { reason }) => {
            tracing::warn!(
                "Rejected checkpoint for task {} from worker {}: {}",
                req.task_id,
                req.worker_id,
                reason
            );
            (
                StatusCode::CONFLICT,
                Json(SaveCheckpointResponse {
                    ack: false,
                    lease_expires_at: None,
                    reason: Some(reason),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to save checkpoint for task {}: {}", req.task_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SaveCheckpointResponse {
                    ack: false,
                    lease_expires_at: None,
                    reason: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Worker API: liveness ping. Idempotent, touches no task.
pub async fn handle_heartbeat(
    Extension(store): Extension<Arc<Store>>,
    Json(req): Json<HeartbeatRequest>,
) -> (StatusCode, Json<HeartbeatResponse>) {
    match store.heartbeat(&req.worker_id).await {
        Ok(()) => {
            tracing::debug!("Heartbeat from worker {}", req.worker_id);
            (StatusCode::OK, Json(HeartbeatResponse { ack: true }))
        }
        Err(e) => {
            tracing::error!("Heartbeat failed for worker {}: {}", req.worker_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HeartbeatResponse { ack: false }),
            )
        }
    }
}

/// Client API: task row plus result once terminal.
pub async fn handle_get_task(
    Extension(store): Extension<Arc<Store>>,
    Path(task_id): Path<i64>,
) -> (StatusCode, Json<Option<TaskView>>) {
    match store.get_task(task_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(Some(view))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(None)),
        Err(e) => {
            tracing::error!("Task lookup failed for {}: {}", task_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(None))
        }
    }
}

/// Client API: queue counts plus node resource usage.
pub async fn handle_stats(
    Extension(store): Extension<Arc<Store>>,
) -> (StatusCode, Json<Option<StatsResponse>>) {
    let stats = match store.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Stats query failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(None));
        }
    };

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    (
        StatusCode::OK,
        Json(Some(StatsResponse {
            pending: stats.pending,
            in_progress: stats.in_progress,
            completed: stats.completed,
            failed: stats.failed,
            workers_alive: stats.workers_alive,
            workers_dead: stats.workers_dead,
            cpu_usage,
            mem_used_mb,
            mem_total_mb,
        })),
    )
}

pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dispatcher".to_string(),
    })
}
