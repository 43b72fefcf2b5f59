use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod api;
mod blob;
mod chunking;
mod config;
mod db;
mod embeddings;
mod error;
mod ingestion;
mod retrieval;
mod service;
mod vector_store;
mod websocket;

use crate::config::AppConfig;
use crate::db::Database;
use crate::embeddings::EmbeddingGenerator;
use crate::service::ArchivistService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting Archivist service v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    let db_path = config.documents_db_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // One embedding handle shared by every store operation
    let embeddings = Arc::new(EmbeddingGenerator::new(config.embeddings.clone()));
    embeddings.verify().await;

    let service = Arc::new(ArchivistService::new(config.clone(), db, embeddings)?);
    let app = api::router(service.clone(), metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let workers = ArchivistService::start_workers(service.clone());
    info!(count = workers.len(), "Document workers running");

    match service.resume_unfinished_documents().await {
        Ok(count) if count > 0 => info!(count, "Re-queued unfinished documents"),
        Err(e) => warn!(error = %e, "Failed to re-queue unfinished documents"),
        _ => {}
    }

    let stopping = service.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            stopping.shutdown();
        })
        .await?;

    for worker in workers {
        let _ = worker.await;
    }
    info!("Archivist service stopped");

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archivist_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
