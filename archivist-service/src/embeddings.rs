//! Embedding generation with asymmetric query/passage encoding.
//!
//! A single [`EmbeddingGenerator`] is built at startup and shared by `Arc`.
//! The backend behind it is constructed on first use and is read-only after
//! that, so concurrent callers never race on initialization.

mod hashed;
mod ollama;

pub use hashed::HashedEmbedder;
pub use ollama::OllamaEmbedder;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{EmbeddingProvider, EmbeddingsConfig};
use crate::error::{EmbeddingError, ServiceResult};

/// How a piece of text will be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// A search query
    Query,
    /// A stored document chunk
    Passage,
}

enum EmbeddingBackend {
    Ollama(OllamaEmbedder),
    Hashed(HashedEmbedder),
}

impl EmbeddingBackend {
    fn from_config(config: &EmbeddingsConfig) -> ServiceResult<Self> {
        match config.provider {
            EmbeddingProvider::Ollama => {
                info!(
                    url = %config.base_url,
                    model = %config.model,
                    "Initializing Ollama embedding backend"
                );
                Ok(Self::Ollama(OllamaEmbedder::new(config)?))
            }
            EmbeddingProvider::Hashed => {
                info!(
                    dimension = config.dimension,
                    "Initializing feature-hashing embedding backend"
                );
                Ok(Self::Hashed(HashedEmbedder::new(config.dimension)))
            }
        }
    }

    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        match self {
            Self::Ollama(backend) => backend.embed(text).await,
            Self::Hashed(backend) => Ok(backend.embed(text)),
        }
    }
}

/// Shared embedding handle
pub struct EmbeddingGenerator {
    config: EmbeddingsConfig,
    backend: OnceCell<EmbeddingBackend>,
}

impl EmbeddingGenerator {
    pub fn new(config: EmbeddingsConfig) -> Self {
        Self {
            config,
            backend: OnceCell::new(),
        }
    }

    /// Fixed output dimension
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn backend(&self) -> ServiceResult<&EmbeddingBackend> {
        self.backend
            .get_or_try_init(|| async { EmbeddingBackend::from_config(&self.config) })
            .await
    }

    fn prefix(&self, mode: EmbedMode) -> &str {
        match mode {
            EmbedMode::Query => &self.config.query_prefix,
            EmbedMode::Passage => &self.config.passage_prefix,
        }
    }

    /// Embed one piece of text
    pub async fn embed(&self, text: &str, mode: EmbedMode) -> ServiceResult<Vec<f32>> {
        let input = format!("{}{}", self.prefix(mode), text);
        let vector = self.backend().await?.embed(&input).await?;

        if vector.len() != self.config.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            }
            .into());
        }

        Ok(vector)
    }

    /// Embed a batch of passages, preserving order
    pub async fn embed_passages(&self, passages: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(passages.len());
        for (index, passage) in passages.iter().enumerate() {
            vectors.push(self.embed(passage, EmbedMode::Passage).await?);
            debug!(index, total = passages.len(), "Embedded passage");
        }
        Ok(vectors)
    }

    /// Try a test embedding so a misconfigured backend shows up at startup.
    pub async fn verify(&self) {
        match self.embed("test", EmbedMode::Query).await {
            Ok(_) => info!("Embedding backend verified successfully"),
            Err(e) => {
                warn!(error = %e, "Embedding backend verification failed - indexing and search may not work")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed_config(dimension: usize) -> EmbeddingsConfig {
        EmbeddingsConfig {
            provider: EmbeddingProvider::Hashed,
            dimension,
            ..EmbeddingsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embedding_is_deterministic_and_fixed_size() {
        let generator = EmbeddingGenerator::new(hashed_config(64));
        let a = generator.embed("hello world", EmbedMode::Passage).await.unwrap();
        let b = generator.embed("hello world", EmbedMode::Passage).await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_query_and_passage_encodings_differ() {
        let generator = EmbeddingGenerator::new(hashed_config(768));
        let query = generator.embed("river delta", EmbedMode::Query).await.unwrap();
        let passage = generator
            .embed("river delta", EmbedMode::Passage)
            .await
            .unwrap();
        assert_ne!(query, passage);
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_a_connection_error() {
        let generator = EmbeddingGenerator::new(EmbeddingsConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..EmbeddingsConfig::default()
        });
        let err = generator.embed("hello", EmbedMode::Query).await.unwrap_err();
        assert!(err.is_transient());
    }
}
