use std::sync::atomic::Ordering;
use taskqueue::config::WorkerConfig;
use taskqueue::tasks::TaskRegistry;
use taskqueue::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // A broken configuration is fatal; the process exits non-zero
    let config = WorkerConfig::from_env()?;

    tracing::info!("Starting worker");
    tracing::info!("  Worker ID: {}", config.worker_id);
    tracing::info!("  Dispatcher: {}", config.dispatcher_url);
    tracing::info!(
        "  Poll interval: {:?}, heartbeat interval: {:?}",
        config.poll_interval,
        config.heartbeat_interval
    );
    tracing::info!(
        "  Cache: {} (ttl {:?}, retry {:?})",
        config.cache_dir.display(),
        config.cache_ttl,
        config.cache_retry_interval
    );

    let registry = TaskRegistry::with_builtins();
    let worker = Worker::new(config, registry)?;

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    // run() drains the submission cache before returning, so a signalled
    // shutdown exits 0 with nothing left on disk that could still be sent
    worker.run().await?;

    Ok(())
}
