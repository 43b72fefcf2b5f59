//! Test harness: a full service backed by temp storage, served on a local port.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;

use super::{ArchivistService, UploadScope};
use crate::api;
use crate::config::{AppConfig, EmbeddingProvider};
use crate::db::{Database, Document, ProcessingStatus};
use crate::embeddings::EmbeddingGenerator;

pub(crate) struct Harness {
    pub dir: TempDir,
    pub service: Arc<ArchivistService>,
    pub base_url: String,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with config tweaks applied after the test defaults
    pub async fn start_with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.embeddings.provider = EmbeddingProvider::Hashed;
        config.embeddings.dimension = 256;
        config.retrieval.base_url = Some(base_url.clone());
        config.retrieval.timeout_secs = 5;
        config.blob.timeout_secs = 5;
        config.workers.concurrency = 2;
        config.workers.initial_backoff_ms = 10;
        config.workers.max_backoff_ms = 50;
        configure(&mut config);

        let db = Arc::new(Database::open(&config.documents_db_path()).unwrap());
        let embeddings = Arc::new(EmbeddingGenerator::new(config.embeddings.clone()));
        let service = Arc::new(ArchivistService::new(config, db, embeddings).unwrap());

        let app = api::router(service.clone(), None);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            dir,
            service,
            base_url,
        }
    }

    pub fn scope(workspace_id: &str) -> UploadScope {
        UploadScope {
            workspace_id: workspace_id.to_string(),
            ..UploadScope::default()
        }
    }

    /// Upload `content` as a plain file and return the PENDING record
    pub async fn upload(
        &self,
        workspace_id: &str,
        conversation_id: Option<&str>,
        filename: &str,
        content: &[u8],
    ) -> Document {
        let scope = UploadScope {
            workspace_id: workspace_id.to_string(),
            conversation_id: conversation_id.map(String::from),
            user_id: Some("user-1".to_string()),
        };
        self.service
            .upload_document(content, filename, None, scope)
            .await
            .unwrap()
    }

    /// Write a source file outside the uploads directory
    pub fn write_source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("sources").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Poll until the document reaches `status`, failing after a few seconds
pub(crate) async fn wait_for_status(
    service: &ArchivistService,
    document_id: &str,
    status: ProcessingStatus,
) -> Document {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(doc) = service.db.get_document(document_id).unwrap()
            && doc.status == status
        {
            return doc;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "document {} never reached {:?}",
            document_id,
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
