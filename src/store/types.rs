use serde::{Deserialize, Serialize};

/// Lifecycle state of a task. Stored as text in the `tasks` table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// Final outcome reported by a worker for one task attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(TaskOutcome::Success),
            "failed" => Some(TaskOutcome::Failed),
            _ => None,
        }
    }

    /// Terminal task status this outcome maps to.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Alive,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Alive => "alive",
            WorkerStatus::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "alive" => Some(WorkerStatus::Alive),
            "dead" => Some(WorkerStatus::Dead),
            _ => None,
        }
    }
}

/// One row of the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: i64,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub lease_expires_at: Option<u64>,
    pub attempts: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

/// One row of the `task_results` table. At most one per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: i64,
    pub worker_id: String,
    pub outcome: TaskOutcome,
    pub result: serde_json::Value,
    pub created_at: u64,
}

/// Intermediate progress saved by an executor. Only the highest `seq`
/// per task is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub task_id: i64,
    pub seq: u32,
    pub state: serde_json::Value,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub last_heartbeat_at: u64,
    pub status: WorkerStatus,
}

/// What a worker gets back from a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub task_id: i64,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub lease_expires_at: u64,
    pub checkpoint: Option<CheckpointRecord>,
}

/// Outcome of a result submission. `Rejected` is a contract rejection,
/// terminal for the worker's local attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    Saved,
    Rejected { reason: String },
}

/// Outcome of a checkpoint save. `Renewed` carries the refreshed lease
/// deadline so executors can self-pace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStatus {
    Renewed { lease_expires_at: u64 },
    Rejected { reason: String },
}

/// Task row plus its result, for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task: TaskRecord,
    pub result: Option<ResultRecord>,
}

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub workers_alive: u64,
    pub workers_dead: u64,
}

/// What one monitor tick did.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub workers_marked_dead: u64,
    pub tasks_reclaimed: u64,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
