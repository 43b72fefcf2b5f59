//! Request, response, and payload types of the vector-store API.
//!
//! The same types are used by the HTTP handlers and by the retrieval client,
//! so the two sides of the wire cannot drift apart.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

pub const MAX_QUERY_CHARS: usize = 1000;
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Payload keys owned by the store; caller metadata cannot override them.
const RESERVED_KEYS: [&str; 7] = [
    "document_id",
    "workspace_id",
    "conversation_id",
    "chunk_index",
    "chunk_id",
    "content",
    "user_id",
];

/// Deterministic point id for a chunk
pub fn point_id(document_id: &str, chunk_index: usize) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, chunk_key(document_id, chunk_index).as_bytes())
}

pub fn chunk_key(document_id: &str, chunk_index: usize) -> String {
    format!("{}_chunk_{}", document_id, chunk_index)
}

/// Text to chunk and index for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub workspace_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl IngestRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        if self.document_id.trim().is_empty() {
            return Err(ServiceError::invalid_request("document_id must not be empty"));
        }
        if self.workspace_id.trim().is_empty() {
            return Err(ServiceError::invalid_request("workspace_id must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(ServiceError::invalid_request("Content cannot be empty"));
        }
        Ok(())
    }

    /// Conversation scope: the explicit field, else a `conversation_id` metadata entry
    pub fn conversation_scope(&self) -> Option<String> {
        self.conversation_id
            .clone()
            .or_else(|| {
                self.metadata
                    .get("conversation_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .filter(|c| !c.is_empty())
    }

    /// Build the payload for one chunk of this document
    pub fn payload_for_chunk(&self, chunk_index: usize, content: String) -> ChunkPayload {
        let mut extra: Map<String, Value> = self
            .metadata
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(user_id) = &self.user_id {
            extra.insert("user_id".to_string(), Value::String(user_id.clone()));
        }

        ChunkPayload {
            document_id: self.document_id.clone(),
            workspace_id: self.workspace_id.clone(),
            conversation_id: self.conversation_scope(),
            chunk_index,
            chunk_id: chunk_key(&self.document_id, chunk_index),
            content,
            extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub chunks_count: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestRequest {
    pub documents: Vec<IngestRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestResponse {
    pub results: Vec<IngestResponse>,
    pub total_processed: usize,
    pub total_chunks: usize,
}

/// Semantic search scoped to a workspace and optionally a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: f32,
}

fn default_limit() -> usize {
    5
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            workspace_id: None,
            conversation_id: None,
            limit: default_limit(),
            threshold: 0.0,
        }
    }

    pub fn in_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn validate(&self) -> ServiceResult<()> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ServiceError::invalid_request("Query cannot be empty"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(ServiceError::invalid_request(format!(
                "query must be at most {} characters",
                MAX_QUERY_CHARS
            )));
        }
        if !(1..=MAX_SEARCH_LIMIT).contains(&self.limit) {
            return Err(ServiceError::invalid_request(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ServiceError::invalid_request(
                "threshold must be between 0.0 and 1.0",
            ));
        }
        if self.workspace_id.as_deref().is_some_and(str::is_empty) {
            return Err(ServiceError::invalid_request(
                "workspace_id must not be empty when provided",
            ));
        }
        if self.conversation_id.as_deref().is_some_and(str::is_empty) {
            return Err(ServiceError::invalid_request(
                "conversation_id must not be empty when provided",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Payload stored with every point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub workspace_id: String,
    pub conversation_id: Option<String>,
    pub chunk_index: usize,
    pub chunk_id: String,
    pub content: String,
    /// File name, file type, user id, created_at, and any caller metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChunkPayload {
    pub fn point_id(&self) -> Uuid {
        point_id(&self.document_id, self.chunk_index)
    }

    /// The payload as one flat JSON object
    pub fn to_metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
