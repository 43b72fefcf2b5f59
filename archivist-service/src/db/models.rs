//! Database model structs.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Processing status for documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Uploaded, waiting for a worker
    Pending,
    /// A worker is extracting and indexing it
    Processing,
    /// Indexed; `chunk_count` points are stored
    Completed,
    /// Gave up; `error` says why
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PROCESSING" => ProcessingStatus::Processing,
            "COMPLETED" => ProcessingStatus::Completed,
            "FAILED" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub file_name: String,
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    pub status: ProcessingStatus,
    pub chunk_count: usize,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const DOCUMENT_COLUMNS: &str = "id, workspace_id, conversation_id, user_id, file_name, file_type, source_uri, status, chunk_count, attempts, error, created_at, updated_at";

impl Document {
    /// New PENDING record
    pub fn new_pending(
        workspace_id: impl Into<String>,
        conversation_id: Option<String>,
        user_id: Option<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            conversation_id,
            user_id,
            file_name: file_name.into(),
            file_type: file_type.into(),
            source_uri: None,
            status: ProcessingStatus::Pending,
            chunk_count: 0,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(7)?;
        let chunk_count: i64 = row.get(8)?;
        let attempts: i64 = row.get(9)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        Ok(Self {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            conversation_id: row.get(2)?,
            user_id: row.get(3)?,
            file_name: row.get(4)?,
            file_type: row.get(5)?,
            source_uri: row.get(6)?,
            status: ProcessingStatus::from_str(&status_str),
            chunk_count: chunk_count as usize,
            attempts: attempts as u32,
            error: row.get(10)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
