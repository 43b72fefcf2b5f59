mod document_processing;
#[cfg(test)]
pub(crate) mod test_support;

pub use document_processing::{Job, ProcessOutcome, RetryPolicy, UploadScope};

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::blob::BlobClient;
use crate::chunking::Chunker;
use crate::config::AppConfig;
use crate::db::Database;
use crate::embeddings::EmbeddingGenerator;
use crate::error::ServiceResult;
use crate::ingestion::TextExtractor;
use crate::retrieval::RetrievalClient;
use crate::vector_store::VectorStore;
use crate::websocket::NotificationHub;

/// Main service coordinator
pub struct ArchivistService {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub vectors: Arc<VectorStore>,
    pub retrieval: Arc<RetrievalClient>,
    pub blobs: Arc<BlobClient>,
    pub extractor: TextExtractor,
    pub hub: Arc<NotificationHub>,
    retry: RetryPolicy,
    jobs: mpsc::Sender<Job>,
    /// Handed to the worker pool when it starts
    job_receiver: Mutex<Option<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
}

impl ArchivistService {
    /// Create a new service instance around an opened database and a shared
    /// embedding generator
    pub fn new(
        config: AppConfig,
        db: Arc<Database>,
        embeddings: Arc<EmbeddingGenerator>,
    ) -> ServiceResult<Self> {
        info!("Initializing Archivist service");

        let chunker = Chunker::from_config(&config.chunking)?;
        let vectors = Arc::new(VectorStore::open(
            &config.vectors_db_path(),
            &config.vector_store.collection,
            embeddings,
            chunker,
        )?);
        info!(
            collection = %config.vector_store.collection,
            path = %config.vectors_db_path().display(),
            "Vector store ready"
        );

        let retrieval = Arc::new(RetrievalClient::new(&config)?);
        info!(url = %retrieval.base_url(), "Retrieval client initialized");

        let blobs = Arc::new(BlobClient::new(&config.blob, config.scratch_dir())?);
        let retry = RetryPolicy::from_config(&config.workers);
        let (jobs, job_receiver) = mpsc::channel(config.workers.queue_capacity);

        Ok(Self {
            config,
            db,
            vectors,
            retrieval,
            blobs,
            extractor: TextExtractor::new(),
            hub: Arc::new(NotificationHub::new()),
            retry,
            jobs,
            job_receiver: Mutex::new(Some(job_receiver)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Stop workers from taking new jobs
    pub fn shutdown(&self) {
        info!("Stopping document workers");
        self.shutdown.cancel();
    }
}
