//! SQLite-backed durable store.
//!
//! All task lifecycle transitions happen inside a single write transaction
//! opened with `BEGIN IMMEDIATE`, so the database (not an in-process lock)
//! is the synchronization point between concurrent claimers, submitters and
//! the monitor loop. The connection itself is single-writer behind an async
//! mutex; transactions are short enough that handlers never hold it across
//! anything but the commit.

use super::types::*;

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    assigned_worker TEXT,
    lease_expires_at INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_lease_expires_at ON tasks(lease_expires_at);

CREATE TABLE IF NOT EXISTS task_results (
    task_id INTEGER PRIMARY KEY,
    worker_id TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    task_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    state TEXT NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, seq),
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE TABLE IF NOT EXISTS workers (
    worker_id TEXT PRIMARY KEY,
    last_heartbeat_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'alive'
);
";

pub struct Store {
    conn: Mutex<Connection>,
}

fn json_column(raw: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn status_column(raw: String) -> rusqlite::Result<TaskStatus> {
    TaskStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown task status '{}'", raw).into(),
        )
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        task_id: row.get("id")?,
        task_type: row.get("task_type")?,
        payload: json_column(row.get("payload")?)?,
        status: status_column(row.get("status")?)?,
        assigned_worker: row.get("assigned_worker")?,
        lease_expires_at: row.get::<_, Option<i64>>("lease_expires_at")?.map(|v| v as u64),
        attempts: row.get::<_, i64>("attempts")? as u32,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    })
}

fn heartbeat_in_tx(tx: &rusqlite::Transaction<'_>, worker_id: &str, now: u64) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO workers (worker_id, last_heartbeat_at, status)
         VALUES (?1, ?2, 'alive')
         ON CONFLICT(worker_id) DO UPDATE SET
             last_heartbeat_at = excluded.last_heartbeat_at,
             status = 'alive'",
        params![worker_id, now as i64],
    )?;
    Ok(())
}

/// Ownership/lease precondition shared by SubmitResult and SaveCheckpoint.
/// Returns the rejection reason, or None when the caller still owns the task.
fn check_ownership(
    tx: &rusqlite::Transaction<'_>,
    worker_id: &str,
    task_id: i64,
    now: u64,
) -> rusqlite::Result<Option<String>> {
    let row = tx
        .query_row(
            "SELECT status, assigned_worker, lease_expires_at FROM tasks WHERE id = ?1",
            params![task_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((status, assigned_worker, lease_expires_at)) = row else {
        return Ok(Some(format!("unknown task {}", task_id)));
    };

    if status != TaskStatus::InProgress.as_str() {
        return Ok(Some(format!("task {} is not in progress (status: {})", task_id, status)));
    }

    if assigned_worker.as_deref() != Some(worker_id) {
        return Ok(Some(format!(
            "task {} is assigned to {}, not {}",
            task_id,
            assigned_worker.as_deref().unwrap_or("nobody"),
            worker_id
        )));
    }

    // Checked against the clock here, not against whether the monitor has
    // already reclaimed: a stale submit must lose even before the next tick.
    if lease_expires_at.is_some_and(|expires| (expires as u64) < now) {
        return Ok(Some(format!("lease for task {} expired", task_id)));
    }

    Ok(None)
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!("Failed to open database at {}", path.as_ref().display())
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Arc<Self>> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Arc<Self>> {
        // WAL keeps readers off the writer's back; NORMAL sync is durable
        // enough at transaction granularity for a reclaimable queue.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// Insert a new pending task and return its id.
    pub async fn submit_task(&self, task_type: &str, payload: &serde_json::Value) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let now = now_ms();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO tasks (task_type, payload, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
            params![task_type, payload.to_string(), now as i64],
        )?;
        let task_id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!("Task {} submitted (type: {})", task_id, task_type);

        Ok(task_id)
    }

    /// Atomically hand the oldest pending task to `worker_id`.
    ///
    /// The select and the update share one immediate write transaction, so
    /// no two claimers can observe the same pending row. The worker's
    /// heartbeat is refreshed either way; an empty queue returns None with
    /// no other effect.
    pub async fn claim_task(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedTask>> {
        let mut conn = self.conn.lock().await;
        let now = now_ms();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        heartbeat_in_tx(&tx, worker_id, now)?;

        let candidate = tx
            .query_row(
                "SELECT id, task_type, payload, attempts FROM tasks
                 WHERE status = 'pending'
                 ORDER BY id ASC
                 LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        json_column(row.get(2)?)?,
                        row.get::<_, i64>(3)? as u32,
                    ))
                },
            )
            .optional()?;

        let Some((task_id, task_type, payload, attempts)) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let lease_expires_at = now + lease_duration.as_millis() as u64;

        tx.execute(
            "UPDATE tasks
             SET status = 'in_progress',
                 assigned_worker = ?1,
                 lease_expires_at = ?2,
                 attempts = attempts + 1,
                 updated_at = ?3
             WHERE id = ?4",
            params![worker_id, lease_expires_at as i64, now as i64, task_id],
        )?;

        let checkpoint = tx
            .query_row(
                "SELECT seq, state, elapsed_ms FROM checkpoints
                 WHERE task_id = ?1
                 ORDER BY seq DESC
                 LIMIT 1",
                params![task_id],
                |row| {
                    Ok(CheckpointRecord {
                        task_id,
                        seq: row.get::<_, i64>(0)? as u32,
                        state: json_column(row.get(1)?)?,
                        elapsed_ms: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;

        tx.commit()?;

        tracing::info!(
            "Task {} claimed by worker {} (attempt {})",
            task_id,
            worker_id,
            attempts + 1
        );

        Ok(Some(ClaimedTask {
            task_id,
            task_type,
            payload,
            attempts: attempts + 1,
            lease_expires_at,
            checkpoint,
        }))
    }

    /// Record a final result for a task the caller still owns.
    ///
    /// The result row, the terminal status flip and the checkpoint cleanup
    /// commit together or not at all.
    pub async fn submit_result(
        &self,
        worker_id: &str,
        task_id: i64,
        outcome: TaskOutcome,
        result: &serde_json::Value,
    ) -> Result<SubmitStatus> {
        let mut conn = self.conn.lock().await;
        let now = now_ms();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(reason) = check_ownership(&tx, worker_id, task_id, now)? {
            return Ok(SubmitStatus::Rejected { reason });
        }

        tx.execute(
            "INSERT INTO task_results (task_id, worker_id, status, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, worker_id, outcome.as_str(), result.to_string(), now as i64],
        )?;

        tx.execute(
            "UPDATE tasks
             SET status = ?1,
                 assigned_worker = NULL,
                 lease_expires_at = NULL,
                 updated_at = ?2
             WHERE id = ?3",
            params![outcome.task_status().as_str(), now as i64, task_id],
        )?;

        tx.execute("DELETE FROM checkpoints WHERE task_id = ?1", params![task_id])?;

        tx.commit()?;

        tracing::info!(
            "Result saved for task {} by worker {} ({})",
            task_id,
            worker_id,
            outcome.as_str()
        );

        Ok(SubmitStatus::Saved)
    }

    /// Save intermediate progress and refresh the lease.
    ///
    /// Checkpoints double as liveness proofs: a long task that checkpoints
    /// regularly never loses its lease while making progress. Older seqs are
    /// compacted away; only the newest matters.
    pub async fn save_checkpoint(
        &self,
        worker_id: &str,
        task_id: i64,
        state: &serde_json::Value,
        elapsed_ms: u64,
        lease_duration: Duration,
    ) -> Result<CheckpointStatus> {
        let mut conn = self.conn.lock().await;
        let now = now_ms();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(reason) = check_ownership(&tx, worker_id, task_id, now)? {
            return Ok(CheckpointStatus::Rejected { reason });
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO checkpoints (task_id, seq, state, elapsed_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, seq, state.to_string(), elapsed_ms as i64, now as i64],
        )?;

        tx.execute(
            "DELETE FROM checkpoints WHERE task_id = ?1 AND seq < ?2",
            params![task_id, seq],
        )?;

        let lease_expires_at = now + lease_duration.as_millis() as u64;

        tx.execute(
            "UPDATE tasks SET lease_expires_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![lease_expires_at as i64, now as i64, task_id],
        )?;

        tx.commit()?;

        tracing::debug!(
            "Checkpoint {} saved for task {} (lease extended to {})",
            seq,
            task_id,
            lease_expires_at
        );

        Ok(CheckpointStatus::Renewed { lease_expires_at })
    }

    /// Upsert the worker's registration. Touches no task.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = now_ms();

        conn.execute(
            "INSERT INTO workers (worker_id, last_heartbeat_at, status)
             VALUES (?1, ?2, 'alive')
             ON CONFLICT(worker_id) DO UPDATE SET
                 last_heartbeat_at = excluded.last_heartbeat_at,
                 status = 'alive'",
            params![worker_id, now as i64],
        )?;

        Ok(())
    }

    /// Fetch a task row plus its result, if terminal.
    pub async fn get_task(&self, task_id: i64) -> Result<Option<TaskView>> {
        let conn = self.conn.lock().await;

        let task = conn
            .query_row(
                "SELECT id, task_type, payload, status, assigned_worker, lease_expires_at,
                        attempts, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![task_id],
                task_from_row,
            )
            .optional()?;

        let Some(task) = task else {
            return Ok(None);
        };

        let result = conn
            .query_row(
                "SELECT worker_id, status, result, created_at FROM task_results WHERE task_id = ?1",
                params![task_id],
                |row| {
                    let raw_status: String = row.get(1)?;
                    let outcome = TaskOutcome::parse(&raw_status).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            Type::Text,
                            format!("unknown result status '{}'", raw_status).into(),
                        )
                    })?;
                    Ok(ResultRecord {
                        task_id,
                        worker_id: row.get(0)?,
                        outcome,
                        result: json_column(row.get(2)?)?,
                        created_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;

        Ok(Some(TaskView { task, result }))
    }

    /// Counts by task status and worker liveness.
    pub async fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().await;
        let mut stats = QueueStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        for row in rows {
            let (status, count) = row?;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => stats.pending = count,
                Some(TaskStatus::InProgress) => stats.in_progress = count,
                Some(TaskStatus::Completed) => stats.completed = count,
                Some(TaskStatus::Failed) => stats.failed = count,
                None => tracing::warn!("Unknown task status in store: {}", status),
            }
        }

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM workers GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        for row in rows {
            let (status, count) = row?;
            match WorkerStatus::parse(&status) {
                Some(WorkerStatus::Alive) => stats.workers_alive = count,
                Some(WorkerStatus::Dead) => stats.workers_dead = count,
                None => tracing::warn!("Unknown worker status in store: {}", status),
            }
        }

        Ok(stats)
    }

    /// One monitor tick: mark silent workers dead, then return every task
    /// with an expired lease or a dead assignee to pending.
    ///
    /// Both steps share a transaction, and the sweep runs first so a worker
    /// that died since the last tick is recognized before its tasks are
    /// examined. Re-running is a no-op.
    pub async fn sweep_and_reclaim(&self, worker_dead_after: Duration) -> Result<SweepReport> {
        let mut conn = self.conn.lock().await;
        let now = now_ms();
        let dead_cutoff = now.saturating_sub(worker_dead_after.as_millis() as u64);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let workers_marked_dead = tx.execute(
            "UPDATE workers
             SET status = 'dead'
             WHERE last_heartbeat_at < ?1 AND status != 'dead'",
            params![dead_cutoff as i64],
        )? as u64;

        let tasks_reclaimed = tx.execute(
            "UPDATE tasks
             SET status = 'pending',
                 assigned_worker = NULL,
                 lease_expires_at = NULL,
                 updated_at = ?1
             WHERE status = 'in_progress'
               AND (lease_expires_at < ?1
                    OR assigned_worker IN (SELECT worker_id FROM workers WHERE status = 'dead'))",
            params![now as i64],
        )? as u64;

        tx.commit()?;

        if workers_marked_dead > 0 {
            tracing::warn!("Marked {} worker(s) as dead", workers_marked_dead);
        }
        if tasks_reclaimed > 0 {
            tracing::info!("Reclaimed {} task(s) back to pending", tasks_reclaimed);
        }

        Ok(SweepReport {
            workers_marked_dead,
            tasks_reclaimed,
        })
    }

    /// Registered workers, for tests and the stats endpoint.
    pub async fn workers(&self) -> Result<Vec<WorkerRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt =
            conn.prepare("SELECT worker_id, last_heartbeat_at, status FROM workers ORDER BY worker_id")?;
        let rows = stmt.query_map([], |row| {
            let raw_status: String = row.get(2)?;
            let status = WorkerStatus::parse(&raw_status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    Type::Text,
                    format!("unknown worker status '{}'", raw_status).into(),
                )
            })?;
            Ok(WorkerRecord {
                worker_id: row.get(0)?,
                last_heartbeat_at: row.get::<_, i64>(1)? as u64,
                status,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Number of checkpoint rows held for a task.
    pub async fn checkpoint_count(&self, task_id: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
