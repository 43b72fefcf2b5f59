//! Job queue and the background worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::service::ArchivistService;

/// One processing attempt for a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub document_id: String,
    /// Replaces the stored source when set
    pub source_uri: Option<String>,
    /// 1-based
    pub attempt: u32,
}

impl Job {
    pub fn new(document_id: impl Into<String>, source_uri: Option<String>) -> Self {
        Self {
            document_id: document_id.into(),
            source_uri,
            attempt: 1,
        }
    }

    /// The follow-up attempt; the source is already recorded by then
    pub fn retry(&self) -> Self {
        Self {
            document_id: self.document_id.clone(),
            source_uri: None,
            attempt: self.attempt + 1,
        }
    }
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkersConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Whether a failed `attempt` may be followed by another one
    pub fn should_retry(&self, attempt: u32, error: &ServiceError) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Wait before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl ArchivistService {
    /// Queue a job for the worker pool
    pub async fn enqueue(&self, job: Job) -> ServiceResult<()> {
        debug!(doc_id = %job.document_id, attempt = job.attempt, "Queueing document job");
        self.jobs.send(job).await.map_err(|_| ServiceError::Internal {
            message: "document job queue is closed".to_string(),
        })
    }

    /// Queue processing of an existing document, optionally from a new source
    pub async fn dispatch(&self, document_id: &str, source_uri: Option<String>) -> ServiceResult<()> {
        if self.db.get_document(document_id)?.is_none() {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }
        self.enqueue(Job::new(document_id, source_uri)).await
    }

    /// Re-queue every document a previous run left unfinished.
    ///
    /// Claims held by the previous run are released first; call before the
    /// workers take jobs.
    pub async fn resume_unfinished_documents(&self) -> ServiceResult<usize> {
        let interrupted = self.db.reset_interrupted_documents()?;
        if interrupted > 0 {
            info!(count = interrupted, "Released documents interrupted mid-processing");
        }

        let unfinished = self.db.list_unfinished_documents()?;
        let count = unfinished.len();

        for doc in unfinished {
            info!(doc_id = %doc.id, status = doc.status.as_str(), "Resuming unfinished document");
            self.enqueue(Job::new(doc.id, None)).await?;
        }

        Ok(count)
    }

    /// Start the worker pool
    ///
    /// Call once on startup; later calls start nothing.
    pub fn start_workers(service: Arc<ArchivistService>) -> Vec<JoinHandle<()>> {
        let Some(receiver) = service.job_receiver.lock().unwrap().take() else {
            warn!("Document workers already started");
            return Vec::new();
        };
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let concurrency = service.config.workers.concurrency;

        (0..concurrency)
            .map(|worker| {
                let service = service.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    info!(worker, "Document worker started");
                    loop {
                        let job = tokio::select! {
                            _ = service.shutdown.cancelled() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else { break };
                        service.run_job(job).await;
                    }
                    info!(worker, "Document worker stopped");
                })
            })
            .collect()
    }

    /// Run one attempt and decide between done, retry and failed
    async fn run_job(self: &Arc<Self>, job: Job) {
        let error = match self.run_attempt(&job).await {
            Ok(_) => return,
            Err(e) => e,
        };

        if !self.retry.should_retry(job.attempt, &error) {
            self.record_failure(&job.document_id, &error);
            return;
        }

        let delay = self.retry.delay_for(job.attempt);
        let message = format_error_chain(&error);
        warn!(
            doc_id = %job.document_id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Transient failure, retrying"
        );
        if let Err(e) = self.db.mark_pending(&job.document_id, &message) {
            error!(doc_id = %job.document_id, error = %e, "Failed to requeue document");
        }
        metrics::counter!("archivist_document_retries_total").increment(1);

        let service = self.clone();
        let next = job.retry();
        tokio::spawn(async move {
            tokio::select! {
                _ = service.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = service.enqueue(next).await {
                        error!(error = %e, "Failed to schedule retry");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcessingError, RetrievalError};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_bounded() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let policy = policy();
        let unavailable: ServiceError = RetrievalError::VectorStoreUnavailable {
            url: "http://127.0.0.1:9".to_string(),
            message: "connection refused".to_string(),
        }
        .into();
        let unsupported: ServiceError = ProcessingError::UnsupportedFormat {
            format: "exe".to_string(),
        }
        .into();

        assert!(policy.should_retry(1, &unavailable));
        assert!(policy.should_retry(2, &unavailable));
        assert!(!policy.should_retry(3, &unavailable));
        assert!(!policy.should_retry(1, &unsupported));
    }

    #[test]
    fn test_retry_job_drops_source() {
        let job = Job::new("doc-1", Some("gs://b/o.pdf".to_string()));
        assert_eq!(job.attempt, 1);
        let next = job.retry();
        assert_eq!(next.attempt, 2);
        assert_eq!(next.document_id, "doc-1");
        assert!(next.source_uri.is_none());
    }
}
