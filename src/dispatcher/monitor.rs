//! Background monitor loop.
//!
//! Every tick runs one dead-worker sweep followed by one lease reclaim,
//! both inside a single store transaction (`Store::sweep_and_reclaim`).
//! Reclaimed tasks go back to `pending` rather than being handed to another
//! worker directly, so the claim path stays the only transition into
//! `in_progress`.

use crate::store::Store;

use std::sync::Arc;
use std::time::Duration;

pub async fn run(store: Arc<Store>, tick: Duration, worker_dead_after: Duration) {
    tracing::info!(
        "Starting monitor loop (tick: {:?}, worker_dead_after: {:?})",
        tick,
        worker_dead_after
    );

    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;

        match store.sweep_and_reclaim(worker_dead_after).await {
            Ok(report) => {
                if report.tasks_reclaimed > 0 || report.workers_marked_dead > 0 {
                    tracing::info!(
                        "Monitor tick: {} worker(s) marked dead, {} task(s) reclaimed",
                        report.workers_marked_dead,
                        report.tasks_reclaimed
                    );
                }
            }
            Err(e) => {
                // Transient store trouble; the next tick retries
                tracing::warn!("Monitor tick failed: {}", e);
            }
        }
    }
}
