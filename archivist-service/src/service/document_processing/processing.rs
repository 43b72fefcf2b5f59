//! Main document processing pipeline.

use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::workers::Job;
use crate::db::{ClaimOutcome, Document};
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::ingestion::FileKind;
use crate::service::ArchivistService;
use crate::vector_store::IngestRequest;

/// What a processing attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Text extracted, indexed and recorded
    Completed { chunk_count: usize },
    /// The document was already COMPLETED; nothing was touched
    AlreadyCompleted,
    /// Another worker is processing the document
    InProgress,
}

impl ArchivistService {
    /// Process a document once, in the caller's task.
    ///
    /// Failures are recorded (FAILED plus an error event) and returned.
    pub async fn process(
        &self,
        document_id: &str,
        source_uri: Option<&str>,
    ) -> ServiceResult<ProcessOutcome> {
        let job = Job::new(document_id, source_uri.map(String::from));
        match self.run_attempt(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_failure(document_id, &e);
                Err(e)
            }
        }
    }

    /// One attempt: claim, resolve, extract, index, complete.
    ///
    /// Does not record failures; the caller decides between retry and FAILED.
    pub(crate) async fn run_attempt(&self, job: &Job) -> ServiceResult<ProcessOutcome> {
        let doc_id = job.document_id.as_str();

        let mut doc = match self.db.claim_document(doc_id, job.attempt)? {
            ClaimOutcome::Claimed(doc) => doc,
            ClaimOutcome::AlreadyCompleted => {
                info!(doc_id = %doc_id, "Document already completed, skipping");
                return Ok(ProcessOutcome::AlreadyCompleted);
            }
            ClaimOutcome::InProgress => {
                info!(doc_id = %doc_id, "Document is being processed elsewhere, skipping");
                return Ok(ProcessOutcome::InProgress);
            }
            ClaimOutcome::Missing => {
                return Err(ServiceError::DocumentNotFound {
                    document_id: doc_id.to_string(),
                });
            }
        };

        if let Some(uri) = &job.source_uri {
            self.db.update_source_uri(doc_id, uri)?;
            doc.source_uri = Some(uri.clone());
        }

        let started = Instant::now();
        info!(
            doc_id = %doc_id,
            workspace_id = %doc.workspace_id,
            attempt = job.attempt,
            "Processing document"
        );
        self.publish_progress(&doc, "Starting processing");

        let source = doc
            .source_uri
            .clone()
            .ok_or_else(|| ServiceError::invalid_request("document has no source_uri"))?;

        // Dropping `resolved` removes any downloaded scratch copy
        let resolved = self.blobs.resolve(&source).await?;
        let kind = FileKind::detect(Some(doc.file_type.as_str()), resolved.path())?;

        self.publish_progress(&doc, "Extracting text...");
        let text = self
            .extractor
            .extract(resolved.path(), kind)
            .collect_text()
            .await?;
        drop(resolved);

        let chunk_count = if self.config.retrieval.indexing_enabled {
            self.publish_progress(&doc, "Indexing...");
            let response = self
                .retrieval
                .ingest(&index_request(&doc, kind, text))
                .await?;
            response.chunks_count
        } else {
            warn!(doc_id = %doc_id, "Indexing disabled, completing without chunks");
            0
        };

        if !self.db.mark_completed(doc_id, chunk_count)? {
            return Err(self.discard_removed_document(doc_id, chunk_count).await);
        }
        self.publish_completed(&doc, chunk_count);

        metrics::counter!("archivist_documents_processed_total", "outcome" => "completed")
            .increment(1);
        metrics::histogram!("archivist_document_processing_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            doc_id = %doc_id,
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document processing complete"
        );
        Ok(ProcessOutcome::Completed { chunk_count })
    }

    /// The claim vanished mid-run: drop the chunks just written if the
    /// record was deleted meanwhile
    async fn discard_removed_document(&self, doc_id: &str, chunk_count: usize) -> ServiceError {
        match self.db.get_document(doc_id) {
            Ok(None) => {
                warn!(doc_id = %doc_id, "Document deleted during processing, removing its chunks");
                if chunk_count > 0
                    && let Err(e) = self.retrieval.delete(doc_id).await
                {
                    return e;
                }
                ServiceError::DocumentNotFound {
                    document_id: doc_id.to_string(),
                }
            }
            Ok(Some(doc)) => ServiceError::Internal {
                message: format!(
                    "document {} left PROCESSING during indexing (now {})",
                    doc_id,
                    doc.status.as_str()
                ),
            },
            Err(e) => e,
        }
    }

    /// Persist FAILED and publish the error event
    pub(crate) fn record_failure(&self, document_id: &str, error: &ServiceError) {
        let message = format_error_chain(error);
        error!(doc_id = %document_id, error = %message, "Document processing failed");
        metrics::counter!("archivist_documents_processed_total", "outcome" => "failed")
            .increment(1);

        match self.db.mark_failed(document_id, &message) {
            Ok(true) => {}
            Ok(false) => {
                warn!(doc_id = %document_id, "Document not held by this run, status left as is");
                return;
            }
            Err(update_err) => warn!(
                doc_id = %document_id,
                original_error = %message,
                update_error = %update_err,
                "Failed to mark document as failed"
            ),
        }

        match self.db.get_document(document_id) {
            Ok(Some(doc)) => self.publish_failure(&doc, &message),
            Ok(None) => {}
            Err(e) => warn!(doc_id = %document_id, error = %e, "Failed to load document for error event"),
        }
    }
}

/// Ingest request for a document's extracted text
fn index_request(doc: &Document, kind: FileKind, content: String) -> IngestRequest {
    let mut metadata = Map::new();
    metadata.insert("file_name".to_string(), Value::String(doc.file_name.clone()));
    metadata.insert("file_type".to_string(), Value::String(kind.as_str().to_string()));
    metadata.insert(
        "created_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    IngestRequest {
        document_id: doc.id.clone(),
        workspace_id: doc.workspace_id.clone(),
        content,
        metadata,
        user_id: doc.user_id.clone(),
        conversation_id: doc.conversation_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProcessingStatus;
    use crate::service::test_support::{Harness, wait_for_status};
    use crate::vector_store::SearchRequest;
    use crate::websocket::EventStatus;
    use axum::{Router, routing::get};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    /// Serve `router` on a local port and return its base URL
    async fn serve_bucket(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        endpoint
    }

    const SCENARIO_TEXT: &str = "The archive holds many records. One of them mentions the \
        word supercalifragilistic exactly once, buried in an otherwise ordinary paragraph.";

    #[tokio::test]
    async fn test_ingest_search_delete_scenario() {
        let harness = Harness::start().await;
        let service = &harness.service;

        let doc = harness
            .upload("ws-1", None, "notes.txt", SCENARIO_TEXT.as_bytes())
            .await;
        assert_eq!(doc.status, ProcessingStatus::Pending);

        let outcome = service.process(&doc.id, None).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Completed { chunk_count: 1 });

        let stored = service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.chunk_count, 1);
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 1);

        let hits = service
            .retrieve_context(&SearchRequest::new("supercalifragilistic").in_workspace("ws-1"))
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, doc.id);
        assert!(hits[0].content.contains("supercalifragilistic"));
        assert_eq!(hits[0].metadata["file_name"], "notes.txt");

        let other_workspace = service
            .retrieve_context(&SearchRequest::new("supercalifragilistic").in_workspace("ws-2"))
            .await;
        assert!(other_workspace.is_empty());

        assert!(service.delete_document(&doc.id).await.unwrap());
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 0);
        let after = service
            .retrieve_context(&SearchRequest::new("supercalifragilistic").in_workspace("ws-1"))
            .await;
        assert!(after.is_empty());
        assert!(service.db.get_document(&doc.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_processing_completed_document_is_noop() {
        let harness = Harness::start().await;
        let service = &harness.service;
        let doc = harness
            .upload("ws-1", None, "notes.txt", SCENARIO_TEXT.as_bytes())
            .await;

        service.process(&doc.id, None).await.unwrap();
        let first = service.db.get_document(&doc.id).unwrap().unwrap();

        let mut events = service.hub.subscribe_events();
        let outcome = service
            .process(&doc.id, Some("gs://bucket/elsewhere.txt"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadyCompleted);

        let second = service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(second.source_uri, first.source_uri);
        assert_eq!(second.chunk_count, first.chunk_count);
        assert_eq!(second.attempts, first.attempts);
        assert_eq!(second.status, ProcessingStatus::Completed);
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_follow_pipeline_order() {
        let harness = Harness::start().await;
        let service = &harness.service;
        let doc = harness
            .upload("ws-1", Some("conv-1"), "notes.txt", SCENARIO_TEXT.as_bytes())
            .await;

        let mut events = service.hub.subscribe_events();
        service.process(&doc.id, None).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.document_id, doc.id);
            assert_eq!(event.conversation_id.as_deref(), Some("conv-1"));
            seen.push((event.status, event.message));
        }
        assert_eq!(
            seen,
            vec![
                (EventStatus::Processing, Some("Starting processing".to_string())),
                (EventStatus::Processing, Some("Extracting text...".to_string())),
                (EventStatus::Processing, Some("Indexing...".to_string())),
                (
                    EventStatus::Completed,
                    Some("Processing completed successfully".to_string())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_document_fails_without_retry() {
        let harness = Harness::start().await;
        let service = &harness.service;
        let doc = harness.upload("ws-1", None, "blank.txt", b"   \n\n  ").await;

        let mut events = service.hub.subscribe_events();
        let err = service.process(&doc.id, None).await.unwrap_err();
        assert!(!err.is_transient());

        let stored = service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert!(stored.error.is_some());
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 0);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.status, EventStatus::Error);
        assert!(last.error.is_some());
    }

    #[tokio::test]
    async fn test_gs_source_is_downloaded_and_cleaned_up() {
        let endpoint = serve_bucket(Router::new().route(
            "/bucket/shared/notes.txt",
            get(|| async { SCENARIO_TEXT }),
        ))
        .await;

        let harness = Harness::start_with(|config| config.blob.endpoint = endpoint.clone()).await;
        let service = &harness.service;
        let doc = harness
            .upload("ws-1", None, "notes.txt", b"placeholder text")
            .await;

        let outcome = service
            .process(&doc.id, Some("gs://bucket/shared/notes.txt"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Completed { chunk_count: 1 });

        let stored = service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(
            stored.source_uri.as_deref(),
            Some("gs://bucket/shared/notes.txt")
        );
        let hits = service
            .retrieve_context(&SearchRequest::new("supercalifragilistic").in_workspace("ws-1"))
            .await;
        assert_eq!(hits.len(), 1);

        let leftovers = std::fs::read_dir(service.config.scratch_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_during_processing_leaves_no_points() {
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        let endpoint = serve_bucket(Router::new().route(
            "/bucket/slow.txt",
            get(move || {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    SCENARIO_TEXT
                }
            }),
        ))
        .await;

        let harness = Harness::start_with(|config| config.blob.endpoint = endpoint.clone()).await;
        let service = harness.service.clone();
        let doc = harness.upload("ws-1", None, "slow.txt", b"placeholder").await;

        let running = {
            let service = service.clone();
            let id = doc.id.clone();
            tokio::spawn(async move { service.process(&id, Some("gs://bucket/slow.txt")).await })
        };
        wait_for_status(&service, &doc.id, ProcessingStatus::Processing).await;

        let mut events = service.hub.subscribe_events();
        assert!(service.delete_document(&doc.id).await.unwrap());
        release.notify_one();

        let outcome = running.await.unwrap();
        assert!(matches!(outcome, Err(ServiceError::DocumentNotFound { .. })));
        assert!(service.db.get_document(&doc.id).unwrap().is_none());
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 0);
        while let Ok(event) = events.try_recv() {
            assert_ne!(event.status, EventStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_while_processing_is_skipped() {
        let harness = Harness::start().await;
        let service = &harness.service;
        let doc = harness
            .upload("ws-1", None, "notes.txt", SCENARIO_TEXT.as_bytes())
            .await;

        assert!(matches!(
            service.db.claim_document(&doc.id, 1).unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        let outcome = service.process(&doc.id, None).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::InProgress);

        let held = service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(held.status, ProcessingStatus::Processing);
        assert_eq!(service.vectors.count_document_points(&doc.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_workers_retry_then_fail_when_store_unreachable() {
        let harness = Harness::start_with(|config| {
            config.retrieval.base_url = Some("http://127.0.0.1:9".to_string());
            config.workers.max_attempts = 2;
            config.workers.initial_backoff_ms = 10;
            config.workers.max_backoff_ms = 20;
        })
        .await;
        let service = harness.service.clone();
        let workers = ArchivistService::start_workers(service.clone());

        let doc = harness
            .upload("ws-1", None, "notes.txt", SCENARIO_TEXT.as_bytes())
            .await;
        let failed = wait_for_status(&service, &doc.id, ProcessingStatus::Failed).await;
        assert_eq!(failed.attempts, 2);
        assert!(failed.error.unwrap().contains("unavailable"));

        service.shutdown();
        for worker in workers {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_workers_resume_unfinished_documents() {
        let harness = Harness::start().await;
        let service = harness.service.clone();

        let path = harness.write_source("resume.txt", SCENARIO_TEXT);
        let mut pending = Document::new_pending("ws-1", None, None, "resume.txt", "text");
        pending.source_uri = Some(path.display().to_string());
        service.db.insert_document(&pending).unwrap();

        let mut interrupted = Document::new_pending("ws-1", None, None, "resume.txt", "text");
        interrupted.id = format!("{}-interrupted", pending.id);
        interrupted.source_uri = pending.source_uri.clone();
        service.db.insert_document(&interrupted).unwrap();
        service.db.claim_document(&interrupted.id, 1).unwrap();

        assert_eq!(service.resume_unfinished_documents().await.unwrap(), 2);
        ArchivistService::start_workers(service.clone());

        for id in [&pending.id, &interrupted.id] {
            let done = wait_for_status(&service, id, ProcessingStatus::Completed).await;
            assert_eq!(done.chunk_count, 1);
        }
        service.shutdown();
    }
}
