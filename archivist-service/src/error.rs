use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("{0}")]
    Embedding(#[from] EmbeddingError),

    #[error("{0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to extract text from page {page}")]
    TextExtraction {
        page: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Text extraction failed for {file}: {reason}")]
    ExtractionFailed { file: String, reason: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Source file not found: {path}")]
    SourceNotFound { path: String },

    #[error("Failed to download {uri}: {reason}")]
    BlobDownloadFailed {
        uri: String,
        reason: String,
        transient: bool,
    },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// Embedding errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {message}")]
    ModelInit { message: String },

    #[error("Connection failed to embedding backend at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Embedding generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Invalid response from embedding backend: {message}")]
    InvalidResponse { message: String },

    #[error("Embedding has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors talking to the vector-store HTTP API
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Vector store unavailable at {url}: {message}")]
    VectorStoreUnavailable { url: String, message: String },

    #[error("Vector store rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from vector store: {message}")]
    InvalidResponse { message: String },
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ServiceError::InvalidRequest {
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Retrieval(RetrievalError::Rejected { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Retrieval(RetrievalError::VectorStoreUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Processing(ProcessingError::ExtractionFailed { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Processing(ProcessingError::BlobDownloadFailed { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(ProcessingError::TextExtraction { .. })
            | ServiceError::Processing(ProcessingError::ExtractionFailed { .. }) => {
                "extraction_failed"
            }
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::SourceNotFound { .. }) => "source_not_found",
            ServiceError::Processing(ProcessingError::BlobDownloadFailed { .. }) => {
                "blob_download_failed"
            }
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::Embedding(_) => "embedding_error",
            ServiceError::Retrieval(RetrievalError::VectorStoreUnavailable { .. }) => {
                "vector_store_unavailable"
            }
            ServiceError::Retrieval(RetrievalError::Rejected { .. }) => "validation_error",
            ServiceError::Retrieval(RetrievalError::InvalidResponse { .. }) => {
                "vector_store_invalid_response"
            }
            ServiceError::InvalidRequest { .. } => "validation_error",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Network hiccups against blob storage, the vector store, or the
    /// embedding backend are transient. Malformed input, unsupported or
    /// corrupt files, and validation failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Processing(ProcessingError::BlobDownloadFailed { transient, .. }) => {
                *transient
            }
            ServiceError::Retrieval(RetrievalError::VectorStoreUnavailable { .. }) => true,
            ServiceError::Embedding(EmbeddingError::Connection { .. }) => true,
            ServiceError::Embedding(EmbeddingError::Generation { status, .. }) => *status >= 500,
            ServiceError::Database(DatabaseError::Connection(_)) => true,
            _ => false,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: format_error_chain(&self),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Render an error and its `source()` chain as one line.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let unavailable = ServiceError::Retrieval(RetrievalError::VectorStoreUnavailable {
            url: "http://localhost:8000".to_string(),
            message: "connection refused".to_string(),
        });
        assert!(unavailable.is_transient());

        let blob_timeout = ServiceError::Processing(ProcessingError::BlobDownloadFailed {
            uri: "gs://bucket/a.pdf".to_string(),
            reason: "timed out".to_string(),
            transient: true,
        });
        assert!(blob_timeout.is_transient());

        let blob_missing = ServiceError::Processing(ProcessingError::BlobDownloadFailed {
            uri: "gs://bucket/a.pdf".to_string(),
            reason: "status 404".to_string(),
            transient: false,
        });
        assert!(!blob_missing.is_transient());

        let unsupported = ServiceError::Processing(ProcessingError::UnsupportedFormat {
            format: "exe".to_string(),
        });
        assert!(!unsupported.is_transient());

        let rejected = ServiceError::Retrieval(RetrievalError::Rejected {
            status: 400,
            message: "content must not be empty".to_string(),
        });
        assert!(!rejected.is_transient());

        let overloaded = ServiceError::Embedding(EmbeddingError::Generation {
            status: 503,
            message: "busy".to_string(),
        });
        assert!(overloaded.is_transient());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::invalid_request("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::DocumentNotFound {
                document_id: "x".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Processing(ProcessingError::UnsupportedFormat {
                format: "exe".to_string()
            })
            .error_code(),
            "unsupported_format"
        );
    }

    #[test]
    fn test_error_chain_includes_source() {
        let error = ServiceError::Processing(ProcessingError::Io(std::io::Error::other(
            "disk on fire",
        )));
        let message = format_error_chain(&error);
        assert!(message.starts_with("IO error"));
        assert!(message.contains("disk on fire"));
    }
}
