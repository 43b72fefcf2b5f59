//! WebSocket message types.
//!
//! Defines the client-to-server and server-to-client message formats
//! for the notification channel.

use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Receive document events, optionally only for one workspace
    Subscribe {
        #[serde(default)]
        workspace_id: Option<String>,
    },
    /// Stop receiving document events
    Unsubscribe,
    /// Keepalive ping
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Pipeline status change for a document
    Document(DocumentEvent),
    /// Acknowledges a subscription change
    Subscribed {
        active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        workspace_id: Option<String>,
    },
    /// Keepalive pong response
    Pong { timestamp: u64 },
    /// Error message
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

/// Status carried by a document event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Processing,
    Completed,
    Error,
}

/// Published on every pipeline transition of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub status: EventStatus,
    pub document_id: String,
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentEvent {
    fn for_document(doc: &Document, status: EventStatus) -> Self {
        Self {
            status,
            document_id: doc.id.clone(),
            workspace_id: doc.workspace_id.clone(),
            conversation_id: doc.conversation_id.clone(),
            message: None,
            chunk_count: None,
            error: None,
        }
    }

    pub fn processing(doc: &Document, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::for_document(doc, EventStatus::Processing)
        }
    }

    pub fn completed(doc: &Document, chunk_count: usize) -> Self {
        Self {
            message: Some("Processing completed successfully".to_string()),
            chunk_count: Some(chunk_count),
            ..Self::for_document(doc, EventStatus::Completed)
        }
    }

    pub fn failed(doc: &Document, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::for_document(doc, EventStatus::Error)
        }
    }
}

impl From<DocumentEvent> for ServerMessage {
    fn from(event: DocumentEvent) -> Self {
        ServerMessage::Document(event)
    }
}
