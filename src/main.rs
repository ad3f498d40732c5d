//! Event Store Server - Binary Entry Point
//!
//! Serves a file-backed event store over HTTP with a background snapshot
//! materializer.

use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entity_event_store::api::{create_router, AppState};
use entity_event_store::event_store::{
    EventStoreAdapter, FileRegistry, Materializer, MergeReducer, Registry,
};
use entity_event_store::EventStoreConfig;

/// Streams queued for the materializer before notifications are dropped
const MATERIALIZER_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EventStoreConfig::from_env()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        timeout_ms = config.operation_timeout.as_millis() as u64,
        snapshot_every = config.snapshot_every,
        "starting {} {}",
        entity_event_store::NAME,
        entity_event_store::VERSION
    );

    let registry: Arc<dyn Registry> = Arc::new(FileRegistry::from_config(&config));
    let shutdown = CancellationToken::new();

    let materializer = Arc::new(Materializer::from_config(
        registry.clone(),
        Arc::new(MergeReducer),
        &config,
    ));
    let (handle, worker) = materializer.spawn(MATERIALIZER_QUEUE, shutdown.clone());

    let adapter = EventStoreAdapter::with_config(registry, &config).with_materializer(handle);
    let app = create_router(Arc::new(AppState::new(adapter)));

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "materializer worker panicked");
    }
    Ok(())
}
