//! HTTP API for the Archivist service.
//!
//! This module provides:
//! - The vector-store API (`/ingest_text`, `/ingest_batch`, `/search`,
//!   `/delete/{id}`, `/health`)
//! - Document upload, processing and cascade deletes under `/api`
//! - The `/ws/notifications` socket and Prometheus `/metrics`

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::service::ArchivistService;
use crate::websocket::handle_ws_connection;

pub mod documents;
pub mod vectors;
use documents::{
    delete_conversation_documents_handler, delete_document_handler,
    delete_workspace_documents_handler, get_document_handler, list_workspace_documents_handler,
    process_document_handler, retrieve_handler, upload_document_handler,
};

/// Multipart framing on top of the file itself
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<ArchivistService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<ArchivistService>, metrics: Option<PrometheusHandle>) -> Router {
    let vector_routes = vectors::router(service.vectors.clone());
    let max_body_size = service.config.storage.max_upload_bytes as usize + UPLOAD_OVERHEAD_BYTES;

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/process", post(process_document_handler))
        .route("/documents/{id}", get(get_document_handler))
        .route("/documents/{id}", delete(delete_document_handler))
        .route(
            "/workspaces/{id}/documents",
            get(list_workspace_documents_handler),
        )
        .route(
            "/workspaces/{id}/documents",
            delete(delete_workspace_documents_handler),
        )
        .route(
            "/conversations/{id}/documents",
            delete(delete_conversation_documents_handler),
        )
        .route("/retrieve", post(retrieve_handler));

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/ws/notifications", get(ws_handler))
        .nest("/api", api_routes)
        .with_state(state)
        .merge(vector_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

// === Metrics ===

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            format!(
                "# metrics recorder not installed (uptime {}s)\n",
                state.start_time.elapsed().as_secs()
            ),
        ),
    }
}

// === WebSocket ===

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Notification socket upgrade request received");
    let hub = state.service.hub.clone();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, hub))
}
