//! Service configuration.
//!
//! Loaded once at startup from an optional `config.{toml,yaml,json}` file and
//! `ARCHIVIST`-prefixed environment variables (nested keys separated by `__`).
//! Every field has a default so the service starts with no configuration at all.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use ::config::{Config as ConfigBuilder, Environment, File};

use crate::error::{ServiceError, ServiceResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub blob: BlobConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    /// Deterministic feature hashing, no model server required
    Hashed,
}

/// Embedding generator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    #[serde(default = "default_passage_prefix")]
    pub passage_prefix: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// Text chunking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters of context carried over from the previous chunk
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

/// Vector collection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Database file name, relative to `storage.data_dir`
    #[serde(default = "default_vector_db_file")]
    pub database_file: String,
}

/// Retrieval client configuration (the pipeline's view of the vector store)
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the vector-store API. Defaults to this process.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub indexing_enabled: bool,
}

/// Background worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Blob storage download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Base URL that `gs://bucket/object` references resolve against
    #[serde(default = "default_blob_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default = "default_blob_timeout")]
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from `config.*` and the environment, then validate it
    pub fn load() -> ServiceResult<Self> {
        let config: AppConfig = ConfigBuilder::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("ARCHIVIST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServiceError::Config {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the pipeline cannot run with
    pub fn validate(&self) -> ServiceResult<()> {
        if self.chunking.chunk_size == 0 {
            return Err(config_error("chunking.chunk_size must be greater than zero"));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(config_error(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.dimension == 0 {
            return Err(config_error("embeddings.dimension must be greater than zero"));
        }
        if self.workers.concurrency == 0 {
            return Err(config_error("workers.concurrency must be greater than zero"));
        }
        if self.workers.max_attempts == 0 {
            return Err(config_error("workers.max_attempts must be at least 1"));
        }
        if self.workers.queue_capacity == 0 {
            return Err(config_error("workers.queue_capacity must be greater than zero"));
        }
        if self.vector_store.collection.trim().is_empty() {
            return Err(config_error("vector_store.collection must not be empty"));
        }
        Ok(())
    }

    pub fn documents_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("archivist.db")
    }

    pub fn vectors_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.vector_store.database_file)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage.data_dir.join("uploads")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.storage.data_dir.join("scratch")
    }

    /// Base URL the retrieval client talks to
    pub fn retrieval_base_url(&self) -> String {
        match &self.retrieval.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.server.host.as_str() {
                    "0.0.0.0" | "::" => "127.0.0.1",
                    other => other,
                };
                format!("http://{}:{}", host, self.server.port)
            }
        }
    }
}

impl EmbeddingsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BlobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn config_error(message: impl Into<String>) -> ServiceError {
    ServiceError::Config {
        message: message.into(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            query_prefix: default_query_prefix(),
            passage_prefix: default_passage_prefix(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            database_file: default_vector_db_file(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_retrieval_timeout(),
            indexing_enabled: true,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            endpoint: default_blob_endpoint(),
            bearer_token: None,
            timeout_secs: default_blob_timeout(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "jeffh/intfloat-multilingual-e5-base:f16".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_query_prefix() -> String {
    "query: ".to_string()
}

fn default_passage_prefix() -> String {
    "passage: ".to_string()
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    2000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_collection() -> String {
    "documents_v2".to_string()
}

fn default_vector_db_file() -> String {
    "vectors.db".to_string()
}

fn default_retrieval_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_blob_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_blob_timeout() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 2000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.embeddings.dimension, 768);
        assert_eq!(config.vector_store.collection, "documents_v2");
        assert_eq!(config.workers.max_attempts, 3);
        assert!(config.retrieval.indexing_enabled);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = AppConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.overlap = 100;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ServiceError::Config { .. }));
    }

    #[test]
    fn test_rejects_zero_workers_and_attempts() {
        let mut config = AppConfig::default();
        config.workers.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.workers.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.embeddings.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "server": { "port": 9100 },
            "embeddings": { "provider": "hashed", "dimension": 64 },
            "retrieval": { "base_url": "http://vectors:8000/" }
        }))
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.embeddings.provider, EmbeddingProvider::Hashed);
        assert_eq!(config.embeddings.dimension, 64);
        assert_eq!(config.embeddings.query_prefix, "query: ");
        assert_eq!(config.retrieval_base_url(), "http://vectors:8000");
    }

    #[test]
    fn test_retrieval_defaults_to_own_listener() {
        let mut config = AppConfig::default();
        config.server.port = 8123;
        assert_eq!(config.retrieval_base_url(), "http://127.0.0.1:8123");
    }
}
