//! Document upload.

use std::path::Path;

use tracing::info;

use super::workers::Job;
use crate::db::Document;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::ingestion::FileKind;
use crate::service::ArchivistService;

/// Who and what an upload belongs to
#[derive(Debug, Clone, Default)]
pub struct UploadScope {
    pub workspace_id: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

impl ArchivistService {
    /// Save an uploaded file and enqueue it for processing
    ///
    /// The file lands in `uploads/{id}_{name}` and the record starts as
    /// PENDING. Clients follow progress on the notification socket or by
    /// polling the document.
    pub async fn upload_document(
        &self,
        content: &[u8],
        filename: &str,
        content_type: Option<&str>,
        scope: UploadScope,
    ) -> ServiceResult<Document> {
        let max_size = self.config.storage.max_upload_bytes;
        if content.len() as u64 > max_size {
            return Err(ProcessingError::FileTooLarge {
                size: content.len() as u64,
                max: max_size,
            }
            .into());
        }
        if content.is_empty() {
            return Err(ServiceError::invalid_request("uploaded file is empty"));
        }
        if scope.workspace_id.trim().is_empty() {
            return Err(ServiceError::invalid_request("workspace_id must not be empty"));
        }

        // Keep only the final path component of client-supplied names
        let filename = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("document")
            .to_string();

        // Reject unsupported formats before anything is written
        let kind = FileKind::detect(content_type, Path::new(&filename))?;

        let mut document = Document::new_pending(
            scope.workspace_id,
            scope.conversation_id.filter(|c| !c.is_empty()),
            scope.user_id,
            filename.clone(),
            kind.as_str(),
        );

        let uploads_dir = self.config.uploads_dir();
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(ProcessingError::Io)?;
        let stored_path = uploads_dir.join(format!("{}_{}", document.id, filename));
        tokio::fs::write(&stored_path, content)
            .await
            .map_err(ProcessingError::Io)?;
        document.source_uri = Some(stored_path.to_string_lossy().to_string());

        self.db.insert_document(&document)?;
        info!(
            doc_id = %document.id,
            workspace_id = %document.workspace_id,
            file_name = %filename,
            kind = kind.as_str(),
            bytes = content.len(),
            "Document uploaded"
        );

        self.enqueue(Job::new(document.id.clone(), None)).await?;
        Ok(document)
    }
}
