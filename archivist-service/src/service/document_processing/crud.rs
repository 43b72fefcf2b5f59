//! Document lookup, deletion and context retrieval.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::db::Document;
use crate::error::{ServiceError, ServiceResult};
use crate::service::ArchivistService;
use crate::vector_store::{SearchHit, SearchRequest};

impl ArchivistService {
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    pub fn list_workspace_documents(&self, workspace_id: &str) -> ServiceResult<Vec<Document>> {
        self.db.list_workspace_documents(workspace_id)
    }

    /// Delete a document's record, chunks and uploaded file.
    ///
    /// The record goes first: a worker still indexing the document then
    /// fails to complete it and drops the chunks it wrote. Deleting an id
    /// again retries the chunk removal. Returns whether a record existed.
    pub async fn delete_document(&self, document_id: &str) -> ServiceResult<bool> {
        let existing = self.db.get_document(document_id)?;
        let deleted = self.db.delete_document(document_id)?;

        self.retrieval.delete(document_id).await?;

        if let Some(path) = existing.and_then(|doc| self.uploaded_file(&doc)) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete uploaded file");
            }
        }

        info!(doc_id = %document_id, existed = deleted, "Deleted document");
        Ok(deleted)
    }

    /// Delete every document of a workspace
    pub async fn purge_workspace(&self, workspace_id: &str) -> ServiceResult<usize> {
        let ids = self.db.workspace_document_ids(workspace_id)?;
        let count = self.delete_all(&ids).await?;
        info!(workspace_id = %workspace_id, count, "Purged workspace documents");
        Ok(count)
    }

    /// Delete every document attached to a conversation
    pub async fn purge_conversation(&self, conversation_id: &str) -> ServiceResult<usize> {
        let ids = self.db.conversation_document_ids(conversation_id)?;
        let count = self.delete_all(&ids).await?;
        info!(conversation_id = %conversation_id, count, "Purged conversation documents");
        Ok(count)
    }

    /// Scoped search through the retrieval client; empty on any failure
    pub async fn retrieve_context(&self, request: &SearchRequest) -> Vec<SearchHit> {
        self.retrieval.search(request).await
    }

    async fn delete_all(&self, ids: &[String]) -> ServiceResult<usize> {
        let mut count = 0;
        for id in ids {
            if self.delete_document(id).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The stored upload for a document, if its source lives in the uploads directory
    fn uploaded_file(&self, doc: &Document) -> Option<PathBuf> {
        let path = PathBuf::from(doc.source_uri.as_deref()?);
        path.starts_with(self.config.uploads_dir()).then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ServiceError;
    use crate::service::test_support::Harness;

    #[tokio::test]
    async fn test_delete_unknown_document_is_not_an_error() {
        let harness = Harness::start().await;
        assert!(!harness.service.delete_document("never-existed").await.unwrap());
        assert!(matches!(
            harness.service.get_document("never-existed"),
            Err(ServiceError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_uploaded_file() {
        let harness = Harness::start().await;
        let doc = harness.upload("ws-1", None, "a.txt", b"alpha beta").await;
        let path = std::path::PathBuf::from(doc.source_uri.clone().unwrap());
        assert!(path.exists());

        harness.service.delete_document(&doc.id).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cascade_deletes() {
        let harness = Harness::start().await;
        let service = &harness.service;

        let a = harness.upload("ws-1", Some("conv-1"), "a.txt", b"alpha text").await;
        let b = harness.upload("ws-1", None, "b.txt", b"beta text").await;
        let c = harness.upload("ws-2", Some("conv-1"), "c.txt", b"gamma text").await;
        for doc in [&a, &b, &c] {
            service.process(&doc.id, None).await.unwrap();
        }

        assert_eq!(service.purge_conversation("conv-1").await.unwrap(), 2);
        assert_eq!(service.vectors.count_document_points(&a.id).unwrap(), 0);
        assert_eq!(service.vectors.count_document_points(&c.id).unwrap(), 0);
        assert_eq!(service.vectors.count_document_points(&b.id).unwrap(), 1);

        assert_eq!(service.purge_workspace("ws-1").await.unwrap(), 1);
        assert!(service.list_workspace_documents("ws-1").unwrap().is_empty());
        assert_eq!(service.vectors.health().unwrap(), 0);
    }
}
