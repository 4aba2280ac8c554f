use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use taskqueue::config::DispatcherConfig;
use taskqueue::dispatcher::handlers::{
    handle_claim_task, handle_get_task, handle_health, handle_heartbeat, handle_save_checkpoint,
    handle_stats, handle_submit_result, handle_submit_task,
};
use taskqueue::dispatcher::monitor;
use taskqueue::dispatcher::protocol::{
    ENDPOINT_CLAIM_TASK, ENDPOINT_HEALTH, ENDPOINT_HEARTBEAT, ENDPOINT_SAVE_CHECKPOINT,
    ENDPOINT_STATS, ENDPOINT_SUBMIT_RESULT, ENDPOINT_SUBMIT_TASK, ENDPOINT_TASK_STATUS,
};
use taskqueue::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = DispatcherConfig::from_env()?;

    tracing::info!("Starting dispatcher");
    tracing::info!("  Listen address: {}", config.listen_addr);
    tracing::info!("  Database: {}", config.db_path.display());
    tracing::info!(
        "  Monitor tick: {:?}, worker_dead_after: {:?}, default lease: {:?}",
        config.monitor_tick,
        config.worker_dead_after,
        config.default_lease_duration
    );

    // A store that cannot open is fatal; the process exits non-zero
    let store = Store::open(&config.db_path)?;

    // 1. HTTP router:
    let app = Router::new()
        // Client API
        .route(ENDPOINT_SUBMIT_TASK, post(handle_submit_task))
        .route(&format!("{}/:id", ENDPOINT_TASK_STATUS), get(handle_get_task))
        .route(ENDPOINT_STATS, get(handle_stats))
        .route(ENDPOINT_HEALTH, get(handle_health))
        // Worker API
        .route(ENDPOINT_CLAIM_TASK, post(handle_claim_task))
        .route(ENDPOINT_SUBMIT_RESULT, post(handle_submit_result))
        .route(ENDPOINT_SAVE_CHECKPOINT, post(handle_save_checkpoint))
        .route(ENDPOINT_HEARTBEAT, post(handle_heartbeat))
        .layer(Extension(store.clone()))
        .layer(Extension(config.clone()));

    // 2. Spawn the monitor loop:
    let monitor_store = store.clone();
    let monitor_tick = config.monitor_tick;
    let worker_dead_after = config.worker_dead_after;
    tokio::spawn(async move {
        monitor::run(monitor_store, monitor_tick, worker_dead_after).await;
    });

    // 3. Serve until signalled:
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Dispatcher listening on {}", config.listen_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
