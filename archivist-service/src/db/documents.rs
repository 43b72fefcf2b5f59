//! Document record operations.
//!
//! Insert, lookup, listing and the status transitions used by the worker
//! pool. Claiming is a single conditional UPDATE from PENDING or FAILED, so
//! two workers can never both process the same record. Only the PROCESSING
//! holder may move a record on, which keeps COMPLETED terminal.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{DOCUMENT_COLUMNS, Document, ProcessingStatus};
use crate::error::{DatabaseError, ServiceResult};

/// Result of trying to take a document for processing
#[derive(Debug)]
pub enum ClaimOutcome {
    /// Status is now PROCESSING; the record reflects the claim
    Claimed(Document),
    /// Already indexed, nothing to do
    AlreadyCompleted,
    /// Another worker holds the claim
    InProgress,
    /// No such record
    Missing,
}

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO documents (id, workspace_id, conversation_id, user_id, file_name, file_type, source_uri, status, chunk_count, attempts, error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                doc.id,
                doc.workspace_id,
                doc.conversation_id,
                doc.user_id,
                doc.file_name,
                doc.file_type,
                doc.source_uri,
                doc.status.as_str(),
                doc.chunk_count as i64,
                doc.attempts as i64,
                doc.error,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        let doc = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id],
                Document::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(doc)
    }

    /// List a workspace's documents, newest first
    pub fn list_workspace_documents(&self, workspace_id: &str) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE workspace_id = ?1 ORDER BY created_at DESC",
                DOCUMENT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let docs = stmt
            .query_map(params![workspace_id], Document::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(docs)
    }

    /// Documents left PENDING or PROCESSING, oldest first
    pub fn list_unfinished_documents(&self) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE status IN ('PENDING', 'PROCESSING') ORDER BY created_at ASC",
                DOCUMENT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let docs = stmt
            .query_map([], Document::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(docs)
    }

    /// IDs of every document in a workspace
    pub fn workspace_document_ids(&self, workspace_id: &str) -> ServiceResult<Vec<String>> {
        self.ids_where("workspace_id = ?1", workspace_id)
    }

    /// IDs of every document attached to a conversation
    pub fn conversation_document_ids(&self, conversation_id: &str) -> ServiceResult<Vec<String>> {
        self.ids_where("conversation_id = ?1", conversation_id)
    }

    fn ids_where(&self, clause: &str, value: &str) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!("SELECT id FROM documents WHERE {}", clause))
            .map_err(DatabaseError::Query)?;

        let ids = stmt
            .query_map(params![value], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(ids)
    }

    /// Move a PENDING or FAILED document to PROCESSING.
    ///
    /// `attempt` is recorded on the row and the previous error is cleared.
    pub fn claim_document(&self, id: &str, attempt: u32) -> ServiceResult<ClaimOutcome> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, attempts = ?2, error = NULL, updated_at = ?3 \
                 WHERE id = ?4 AND status IN (?5, ?6)",
                params![
                    ProcessingStatus::Processing.as_str(),
                    attempt as i64,
                    now,
                    id,
                    ProcessingStatus::Pending.as_str(),
                    ProcessingStatus::Failed.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        let doc = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id],
                Document::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(match doc {
            None => ClaimOutcome::Missing,
            Some(doc) if rows > 0 => ClaimOutcome::Claimed(doc),
            Some(doc) if doc.status == ProcessingStatus::Completed => {
                ClaimOutcome::AlreadyCompleted
            }
            Some(_) => ClaimOutcome::InProgress,
        })
    }

    /// Put documents a previous run left PROCESSING back to PENDING
    pub fn reset_interrupted_documents(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, updated_at = ?2 WHERE status = ?3",
                params![
                    ProcessingStatus::Pending.as_str(),
                    now,
                    ProcessingStatus::Processing.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Record a successful run; false when the claim is gone
    pub fn mark_completed(&self, id: &str, chunk_count: usize) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, chunk_count = ?2, error = NULL, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    ProcessingStatus::Completed.as_str(),
                    chunk_count as i64,
                    now,
                    id,
                    ProcessingStatus::Processing.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Record a terminal failure of the current claim
    pub fn mark_failed(&self, id: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
                params![
                    ProcessingStatus::Failed.as_str(),
                    error,
                    now,
                    id,
                    ProcessingStatus::Processing.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Put a document back in the queue after a transient failure
    pub fn mark_pending(&self, id: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
                params![
                    ProcessingStatus::Pending.as_str(),
                    error,
                    now,
                    id,
                    ProcessingStatus::Processing.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Point a document at a (new) source
    pub fn update_source_uri(&self, id: &str, source_uri: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET source_uri = ?1, updated_at = ?2 WHERE id = ?3",
                params![source_uri, now, id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Delete a document record
    pub fn delete_document(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("archivist.db")).unwrap();
        (dir, db)
    }

    fn pending(workspace: &str, conversation: Option<&str>) -> Document {
        Document::new_pending(
            workspace,
            conversation.map(str::to_string),
            Some("user-1".to_string()),
            "notes.txt",
            "text",
        )
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, db) = open();
        let mut doc = pending("ws-a", Some("conv-1"));
        doc.source_uri = Some("gs://bucket/notes.txt".to_string());
        db.insert_document(&doc).unwrap();

        let loaded = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.workspace_id, "ws-a");
        assert_eq!(loaded.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(loaded.source_uri.as_deref(), Some("gs://bucket/notes.txt"));
        assert_eq!(loaded.status, ProcessingStatus::Pending);
        assert_eq!(loaded.chunk_count, 0);

        assert!(db.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_claim_complete_and_reclaim() {
        let (_dir, db) = open();
        let doc = pending("ws-a", None);
        db.insert_document(&doc).unwrap();

        match db.claim_document(&doc.id, 1).unwrap() {
            ClaimOutcome::Claimed(claimed) => {
                assert_eq!(claimed.status, ProcessingStatus::Processing);
                assert_eq!(claimed.attempts, 1);
            }
            other => panic!("unexpected claim outcome: {:?}", other),
        }

        assert!(db.mark_completed(&doc.id, 7).unwrap());
        let done = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.chunk_count, 7);

        assert!(matches!(
            db.claim_document(&doc.id, 2).unwrap(),
            ClaimOutcome::AlreadyCompleted
        ));
        assert!(!db.mark_pending(&doc.id, "late retry").unwrap());
        assert!(matches!(
            db.claim_document("missing", 1).unwrap(),
            ClaimOutcome::Missing
        ));
    }

    #[test]
    fn test_failed_documents_can_be_reclaimed() {
        let (_dir, db) = open();
        let doc = pending("ws-a", None);
        db.insert_document(&doc).unwrap();

        db.claim_document(&doc.id, 1).unwrap();
        db.mark_failed(&doc.id, "unsupported format").unwrap();
        let failed = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("unsupported format"));

        match db.claim_document(&doc.id, 1).unwrap() {
            ClaimOutcome::Claimed(claimed) => assert!(claimed.error.is_none()),
            other => panic!("unexpected claim outcome: {:?}", other),
        }
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (_dir, db) = open();
        let doc = pending("ws-a", None);
        db.insert_document(&doc).unwrap();

        assert!(matches!(
            db.claim_document(&doc.id, 1).unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(
            db.claim_document(&doc.id, 1).unwrap(),
            ClaimOutcome::InProgress
        ));

        let held = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(held.status, ProcessingStatus::Processing);
        assert_eq!(held.attempts, 1);
    }

    #[test]
    fn test_completed_is_terminal() {
        let (_dir, db) = open();
        let doc = pending("ws-a", None);
        db.insert_document(&doc).unwrap();

        db.claim_document(&doc.id, 1).unwrap();
        assert!(db.mark_completed(&doc.id, 3).unwrap());

        assert!(!db.mark_failed(&doc.id, "late failure").unwrap());
        assert!(!db.mark_completed(&doc.id, 9).unwrap());

        let done = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.chunk_count, 3);
        assert!(done.error.is_none());
    }

    #[test]
    fn test_transitions_require_a_claim() {
        let (_dir, db) = open();
        let doc = pending("ws-a", None);
        db.insert_document(&doc).unwrap();

        assert!(!db.mark_completed(&doc.id, 1).unwrap());
        assert!(!db.mark_failed(&doc.id, "boom").unwrap());
        assert!(!db.mark_pending(&doc.id, "retry").unwrap());
        assert!(!db.mark_completed("missing", 1).unwrap());

        let untouched = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(untouched.status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_reset_interrupted_documents() {
        let (_dir, db) = open();
        let interrupted = pending("ws-a", None);
        let done = pending("ws-a", None);
        db.insert_document(&interrupted).unwrap();
        db.insert_document(&done).unwrap();

        db.claim_document(&interrupted.id, 1).unwrap();
        db.claim_document(&done.id, 1).unwrap();
        db.mark_completed(&done.id, 2).unwrap();

        assert_eq!(db.reset_interrupted_documents().unwrap(), 1);
        let reset = db.get_document(&interrupted.id).unwrap().unwrap();
        assert_eq!(reset.status, ProcessingStatus::Pending);
        assert!(matches!(
            db.claim_document(&interrupted.id, 2).unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert_eq!(
            db.get_document(&done.id).unwrap().unwrap().status,
            ProcessingStatus::Completed
        );
    }

    #[test]
    fn test_unfinished_and_scoped_listing() {
        let (_dir, db) = open();
        let a = pending("ws-a", Some("conv-1"));
        let b = pending("ws-a", None);
        let c = pending("ws-b", Some("conv-1"));
        for doc in [&a, &b, &c] {
            db.insert_document(doc).unwrap();
        }
        db.claim_document(&b.id, 1).unwrap();
        db.claim_document(&c.id, 1).unwrap();
        db.mark_completed(&c.id, 1).unwrap();

        let unfinished: Vec<String> = db
            .list_unfinished_documents()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(unfinished.len(), 2);
        assert!(unfinished.contains(&a.id));
        assert!(unfinished.contains(&b.id));

        assert_eq!(db.list_workspace_documents("ws-a").unwrap().len(), 2);
        let mut conv = db.conversation_document_ids("conv-1").unwrap();
        conv.sort();
        let mut expected = vec![a.id.clone(), c.id.clone()];
        expected.sort();
        assert_eq!(conv, expected);
        assert_eq!(db.workspace_document_ids("ws-b").unwrap(), vec![c.id.clone()]);

        assert!(db.delete_document(&a.id).unwrap());
        assert!(!db.delete_document(&a.id).unwrap());
        assert!(db.update_source_uri(&b.id, "/tmp/b.txt").unwrap());
    }
}
