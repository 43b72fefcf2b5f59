//! HTTP client for the vector-store API.
//!
//! The ingestion pipeline and context retrieval only talk to the vector
//! store through this client, so the store can run in this process or on
//! another host. Searching never fails: any error is logged and degrades to
//! an empty result set.

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::error::{RetrievalError, ServiceError, ServiceResult};
use crate::vector_store::{
    BatchIngestRequest, BatchIngestResponse, DeleteResponse, HealthResponse, IngestRequest,
    IngestResponse, SearchHit, SearchRequest,
};

/// Client for `/ingest_text`, `/ingest_batch`, `/search`, `/delete` and `/health`
pub struct RetrievalClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RetrievalClient {
    pub fn new(config: &AppConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.retrieval.timeout())
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("failed to build retrieval HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.retrieval_base_url(),
            api_key: config.retrieval.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Search; returns no hits instead of an error
    pub async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        match self
            .send_json::<_, Vec<SearchHit>>(self.post("/search"), request)
            .await
        {
            Ok(hits) => {
                debug!(hits = hits.len(), "Retrieved context");
                hits
            }
            Err(e) => {
                error!(error = %e, "Context retrieval failed, continuing without context");
                metrics::counter!("archivist_retrieval_degraded_total").increment(1);
                Vec::new()
            }
        }
    }

    /// Index one document's text
    pub async fn ingest(&self, request: &IngestRequest) -> ServiceResult<IngestResponse> {
        self.send_json(self.post("/ingest_text"), request).await
    }

    pub async fn ingest_batch(
        &self,
        request: &BatchIngestRequest,
    ) -> ServiceResult<BatchIngestResponse> {
        self.send_json(self.post("/ingest_batch"), request).await
    }

    /// Remove every chunk of a document; unknown ids are not an error
    pub async fn delete(&self, document_id: &str) -> ServiceResult<DeleteResponse> {
        let url = self.url(&format!("/delete/{}", document_id));
        let response = self.send(self.authorize(self.client.delete(&url))).await?;
        let body: DeleteResponse = self.decode(response).await?;

        if body.status != "success" {
            return Err(RetrievalError::InvalidResponse {
                message: format!("delete returned status {}: {}", body.status, body.message),
            }
            .into());
        }
        Ok(body)
    }

    pub async fn health(&self) -> ServiceResult<HealthResponse> {
        let response = self
            .send(self.authorize(self.client.get(self.url("/health"))))
            .await?;
        self.decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        body: &B,
    ) -> ServiceResult<T> {
        let response = self.send(request.json(body)).await?;
        self.decode(response).await
    }

    async fn send(&self, request: RequestBuilder) -> ServiceResult<Response> {
        let response = request.send().await.map_err(|e| unavailable(&self.base_url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            warn!(status = %status, message = %message, "Vector store returned server error");
            return Err(RetrievalError::VectorStoreUnavailable {
                url: self.base_url.clone(),
                message: format!("status {}: {}", status, message),
            }
            .into());
        }

        Err(RetrievalError::Rejected {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> ServiceResult<T> {
        response.json::<T>().await.map_err(|e| {
            RetrievalError::InvalidResponse {
                message: e.to_string(),
            }
            .into()
        })
    }
}

fn unavailable(base_url: &str, e: reqwest::Error) -> ServiceError {
    RetrievalError::VectorStoreUnavailable {
        url: base_url.to_string(),
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::vectors;
    use crate::chunking::Chunker;
    use crate::config::{EmbeddingProvider, EmbeddingsConfig};
    use crate::embeddings::EmbeddingGenerator;
    use crate::vector_store::VectorStore;
    use serde_json::Map;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn client_for(base_url: &str) -> RetrievalClient {
        let mut config = AppConfig::default();
        config.retrieval.base_url = Some(base_url.to_string());
        config.retrieval.timeout_secs = 5;
        RetrievalClient::new(&config).unwrap()
    }

    async fn serve_store(dir: &TempDir) -> (RetrievalClient, Arc<VectorStore>) {
        let embeddings = Arc::new(EmbeddingGenerator::new(EmbeddingsConfig {
            provider: EmbeddingProvider::Hashed,
            dimension: 256,
            ..EmbeddingsConfig::default()
        }));
        let store = Arc::new(
            VectorStore::open(
                &dir.path().join("vectors.db"),
                "documents_v2",
                embeddings,
                Chunker::new(2000, 200).unwrap(),
            )
            .unwrap(),
        );
        store.ensure_collection().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = vectors::router(store.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (client_for(&format!("http://{}", addr)), store)
    }

    fn request(document_id: &str, content: &str) -> IngestRequest {
        IngestRequest {
            document_id: document_id.to_string(),
            workspace_id: "ws-1".to_string(),
            content: content.to_string(),
            metadata: Map::new(),
            user_id: None,
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_search_delete_over_http() {
        let dir = TempDir::new().unwrap();
        let (client, store) = serve_store(&dir).await;

        let health = client.health().await.unwrap();
        assert_eq!(health.status, "healthy");

        let ingested = client
            .ingest(&request("doc-1", "The quartermaster keeps the ledger of supplies."))
            .await
            .unwrap();
        assert_eq!(ingested.chunks_count, 1);
        assert_eq!(ingested.status, "success");

        let hits = client
            .search(&SearchRequest::new("quartermaster ledger").in_workspace("ws-1"))
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc-1");

        let deleted = client.delete("doc-1").await.unwrap();
        assert_eq!(deleted.message, "Document doc-1 deleted");
        assert_eq!(store.count_document_points("doc-1").unwrap(), 0);

        // Unknown ids delete successfully
        client.delete("doc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_reports_failures_per_document() {
        let dir = TempDir::new().unwrap();
        let (client, _store) = serve_store(&dir).await;

        let response = client
            .ingest_batch(&BatchIngestRequest {
                documents: vec![request("doc-1", "first document"), request("doc-2", "   ")],
            })
            .await
            .unwrap();

        assert_eq!(response.total_processed, 2);
        assert_eq!(response.total_chunks, 1);
        assert_eq!(response.results[0].status, "success");
        assert_eq!(response.results[1].status, "error");
        assert_eq!(response.results[1].chunks_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_ingest_is_rejected_not_unavailable() {
        let dir = TempDir::new().unwrap();
        let (client, _store) = serve_store(&dir).await;

        let err = client.ingest(&request("doc-1", "")).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Retrieval(RetrievalError::Rejected { status: 400, .. })
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_search() {
        let client = client_for("http://127.0.0.1:9");

        let hits = client.search(&SearchRequest::new("anything")).await;
        assert!(hits.is_empty());

        let err = client.ingest(&request("doc-1", "text")).await.unwrap_err();
        assert!(err.is_transient());
        tokio_test::assert_err!(client.delete("doc-1").await);
    }
}
