use std::sync::Arc;
use std::time::Duration;

use gatrix_edge_config::{EdgeConfig, SyncMethod};
use gatrix_edge_server::backend::http::HttpBackend;
use gatrix_edge_server::cache::{CacheStore, TokenMirror};
use gatrix_edge_server::sync::{EngineOptions, RedisEventStream, SyncEngine};
use gatrix_edge_server::{AppState, EdgeServer};

/// Grace period for in-flight sync work after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Load .env if present, for local development.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    gatrix_edge_server::observability::init_tracing();

    let cfg = match EdgeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    gatrix_edge_server::observability::apply_logging_level(&cfg.log_level);
    gatrix_edge_server::metrics::init_metrics();

    tracing::info!(
        port = cfg.port,
        internal_port = cfg.internal_addr().port(),
        metrics_port = cfg.metrics_port,
        sync_method = %cfg.sync_method,
        backend = %cfg.backend_url,
        "starting gatrix edge"
    );

    let backend = match HttpBackend::new(&cfg.backend_url, &cfg.application_name, cfg.backend_timeout)
    {
        Ok(b) => Arc::new(b),
        Err(e) => {
            eprintln!("Backend client initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let store = Arc::new(CacheStore::new());
    let mirror = Arc::new(TokenMirror::new());
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        mirror.clone(),
        backend,
        EngineOptions::from_config(&cfg),
    ));
    let shutdown = engine.cancel_token();

    let events = match cfg.sync_method {
        SyncMethod::Event => Some(RedisEventStream::spawn(cfg.redis.url(), shutdown.clone())),
        SyncMethod::Polling | SyncMethod::Manual => None,
    };
    let engine_task = engine.clone().start(events);

    let state = AppState {
        config: Arc::new(cfg),
        store,
        mirror,
        engine: engine.clone(),
    };

    // Serving starts immediately; readiness stays false until bootstrap
    // completes.
    let server = EdgeServer::new(state);
    let serve_task = tokio::spawn(server.run(shutdown.clone()));

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    engine.shutdown();

    if tokio::time::timeout(SHUTDOWN_GRACE, engine_task).await.is_err() {
        tracing::warn!("sync engine did not stop within the grace period");
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, serve_task).await {
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "server task panicked"),
        Err(_) => tracing::warn!("listeners did not stop within the grace period"),
        Ok(Ok(Ok(()))) => {}
    }
}
