//! Vector-store API endpoints.
//!
//! These routes only need the [`VectorStore`], so they are built as their
//! own router and can be served without the document pipeline.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::vector_store::VectorStore;
use crate::vector_store::{
    BatchIngestRequest, BatchIngestResponse, DeleteResponse, HealthResponse, IngestRequest,
    IngestResponse, SearchHit, SearchRequest,
};

const SERVICE_NAME: &str = "Archivist vector store (SQLite + local embeddings)";

/// Build the vector-store router
pub fn router(store: Arc<VectorStore>) -> Router {
    Router::new()
        .route("/ingest_text", post(ingest_text_handler))
        .route("/ingest_batch", post(ingest_batch_handler))
        .route("/search", post(search_handler))
        .route("/delete/{document_id}", delete(delete_handler))
        .route("/health", get(health_handler))
        .with_state(store)
}

/// Chunk, embed and index one document
pub async fn ingest_text_handler(
    State(store): State<Arc<VectorStore>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ServiceError> {
    let chunks_count = store.index_document(&request).await?;

    info!(
        doc_id = %request.document_id,
        workspace_id = %request.workspace_id,
        chunks = chunks_count,
        "Indexed document text"
    );

    Ok(Json(IngestResponse {
        document_id: request.document_id,
        chunks_count,
        status: "success".to_string(),
    }))
}

/// Index several documents; one failure does not stop the rest
pub async fn ingest_batch_handler(
    State(store): State<Arc<VectorStore>>,
    Json(batch): Json<BatchIngestRequest>,
) -> Json<BatchIngestResponse> {
    let mut results = Vec::with_capacity(batch.documents.len());
    let mut total_chunks = 0;

    for request in &batch.documents {
        match store.index_document(request).await {
            Ok(count) => {
                total_chunks += count;
                results.push(IngestResponse {
                    document_id: request.document_id.clone(),
                    chunks_count: count,
                    status: "success".to_string(),
                });
            }
            Err(e) => {
                error!(doc_id = %request.document_id, error = %e, "Batch document failed");
                results.push(IngestResponse {
                    document_id: request.document_id.clone(),
                    chunks_count: 0,
                    status: "error".to_string(),
                });
            }
        }
    }

    Json(BatchIngestResponse {
        total_processed: results.len(),
        total_chunks,
        results,
    })
}

pub async fn search_handler(
    State(store): State<Arc<VectorStore>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ServiceError> {
    Ok(Json(store.search(&request).await?))
}

pub async fn delete_handler(
    State(store): State<Arc<VectorStore>>,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    store.delete_document(&document_id)?;

    Ok(Json(DeleteResponse {
        status: "success".to_string(),
        message: format!("Document {} deleted", document_id),
    }))
}

pub async fn health_handler(
    State(store): State<Arc<VectorStore>>,
) -> Result<Json<HealthResponse>, ServiceError> {
    store.health()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
    }))
}
