use crate::store::types::{ClaimedTask, TaskOutcome};
use serde::{Deserialize, Serialize};

// Endpoints
pub const ENDPOINT_SUBMIT_TASK: &str = "/submit-task";
pub const ENDPOINT_CLAIM_TASK: &str = "/get-task";
pub const ENDPOINT_SUBMIT_RESULT: &str = "/submit-result";
pub const ENDPOINT_SAVE_CHECKPOINT: &str = "/save-checkpoint";
pub const ENDPOINT_HEARTBEAT: &str = "/heartbeat";
pub const ENDPOINT_TASK_STATUS: &str = "/task";
pub const ENDPOINT_STATS: &str = "/stats";
pub const ENDPOINT_HEALTH: &str = "/health";

// Submit task (client API)
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Claim (worker API)
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    pub worker_id: String,
    /// Override for the dispatcher's default lease, in seconds.
    #[serde(default)]
    pub lease_duration_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimTaskResponse {
    pub task: Option<ClaimedTask>,
}

// Result submission (worker API)
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub worker_id: String,
    pub task_id: i64,
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// Checkpoint (worker API)
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveCheckpointRequest {
    pub worker_id: String,
    pub task_id: i64,
    pub state: serde_json::Value,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveCheckpointResponse {
    pub ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// Heartbeat (worker API)
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ack: bool,
}

// Stats (client API)
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub workers_alive: u64,
    pub workers_dead: u64,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}
