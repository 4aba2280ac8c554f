use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Progress carried over from a previous attempt of the same task.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub state: serde_json::Value,
    pub elapsed_ms: u64,
}

/// Reply to a checkpoint call. `Renewed` carries the refreshed lease
/// deadline so the executor can self-pace; `Lost` means the coordinator no
/// longer considers this attempt the owner and the executor should abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAck {
    Renewed { lease_expires_at: u64 },
    Lost,
}

/// The one capability an executor gets for saving progress: a callback
/// taking `(state, elapsed_ms)` that blocks on the coordinator round trip.
pub type CheckpointFn = Arc<
    dyn Fn(serde_json::Value, u64) -> Pin<Box<dyn Future<Output = Result<CheckpointAck>> + Send>>
        + Send
        + Sync,
>;

/// Everything an executor sees about the task it is running.
pub struct TaskContext {
    pub task_id: i64,
    pub payload: serde_json::Value,
    pub resume: Option<ResumeState>,
    pub checkpoint: CheckpointFn,
}

pub type TaskFn = Arc<
    dyn Fn(TaskContext) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Static mapping from a task's type tag to its executor.
///
/// Populated once at worker startup; unknown tags are a well-typed failure
/// at claim time, never a load error.
pub struct TaskRegistry {
    handlers: DashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    /// Registry with the built-in executors (`prime`, `compute`) installed.
    pub fn with_builtins() -> Arc<Self> {
        let registry = Self::new();
        registry.register("prime", crate::tasks::prime::execute);
        registry.register("compute", crate::tasks::prime::execute_compute);
        registry
    }

    pub fn register<F, Fut>(&self, task_type: &str, handler: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let handler_fn: TaskFn = Arc::new(move |ctx: TaskContext| {
            Box::pin(handler(ctx)) as Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        });

        self.handlers.insert(task_type.to_string(), handler_fn);

        tracing::info!("Registered task executor: {}", task_type);
    }

    pub fn get(&self, task_type: &str) -> Option<TaskFn> {
        self.handlers.get(task_type).map(|entry| entry.value().clone())
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
