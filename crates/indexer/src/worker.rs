//! Ingest queue worker
//!
//! Long-polls the ingest queue and runs each job through the indexer. A
//! message is deleted once its job succeeds, or once it fails in a way a
//! redelivery cannot fix. Anything else stays on the queue for redelivery
//! and, after the redrive limit, the dead-letter queue.

use lingoforge_common::{
    metrics::{record_ingestion_failure, record_queue_message},
    queue::{IngestJob, Queue},
    tutor::Indexer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// What to do with a message after its job ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ingested; delete the message
    Done,
    /// The job itself is unusable; delete it so it stops cycling
    Rejected,
    /// Upstream failure; leave the message for redelivery
    Retry,
}

impl Disposition {
    fn deletes_message(self) -> bool {
        !matches!(self, Disposition::Retry)
    }

    fn label(self) -> &'static str {
        match self {
            Disposition::Done => "done",
            Disposition::Rejected => "rejected",
            Disposition::Retry => "retry",
        }
    }
}

/// Run one job and decide its message's fate
pub async fn process_job(indexer: &Indexer, job: IngestJob) -> Disposition {
    let job_id = job.job_id;
    let documents = job.documents.len();

    match indexer.ingest(job.documents, job.namespace.as_deref()).await {
        Ok(result) => {
            info!(
                job_id = %job_id,
                count = result.count,
                namespace = %result.namespace,
                "Ingest job complete"
            );
            Disposition::Done
        }
        Err(e) => {
            record_ingestion_failure(&e.code().as_code().to_string());
            if e.is_caller_error() {
                warn!(job_id = %job_id, documents, error = %e, "Rejecting unusable ingest job");
                Disposition::Rejected
            } else {
                error!(job_id = %job_id, documents, error = %e, "Ingest job failed");
                Disposition::Retry
            }
        }
    }
}

/// Poll until ctrl-c
pub async fn run(queue: Queue, indexer: Arc<Indexer>) -> anyhow::Result<()> {
    let mut consecutive_failures = 0;

    info!(queue = %queue.url(), "Ingest worker polling");

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive::<IngestJob>() => {
                match result {
                    Ok(messages) => {
                        for (job, receipt_handle) in messages {
                            info!(
                                job_id = %job.job_id,
                                documents = job.documents.len(),
                                "Received ingest job"
                            );

                            let disposition = process_job(&indexer, job).await;
                            record_queue_message(disposition.label());

                            match disposition {
                                Disposition::Retry => consecutive_failures += 1,
                                _ => consecutive_failures = 0,
                            }

                            if disposition.deletes_message() {
                                if let Err(e) = queue.delete(&receipt_handle).await {
                                    error!(error = %e, "Failed to delete message");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(RECEIVE_BACKOFF).await;
                    }
                }
            }
        }
    }

    info!("Ingest worker shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingoforge_common::{
        db::{
            models::{MetadataRecord, NewDocument},
            MemoryStore, MetadataStore, PageRequest, ScanFilter, ScanPage,
        },
        embeddings::ReferenceEmbedder,
        index::{MemoryIndex, MetadataFilter, VectorIndexClient, VectorMatch, VectorRecord},
        AppError, Result,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::assert_ok;

    struct DownIndex;

    #[async_trait::async_trait]
    impl VectorIndexClient for DownIndex {
        async fn upsert(&self, _: &[VectorRecord], _: &str) -> Result<()> {
            Err(AppError::IndexUnavailable {
                message: "503".into(),
            })
        }
        async fn query(&self, _: &[f32], _: usize, _: &MetadataFilter, _: &str) -> Result<Vec<VectorMatch>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _: &[String], _: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Fails its first batch write, then behaves
    struct ThrottledOnceStore {
        inner: Arc<MemoryStore>,
        throttled: AtomicBool,
    }

    #[async_trait::async_trait]
    impl MetadataStore for ThrottledOnceStore {
        async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
            self.inner.get(id).await
        }
        async fn batch_get(&self, ids: &[String]) -> Result<Vec<MetadataRecord>> {
            self.inner.batch_get(ids).await
        }
        async fn put(&self, record: MetadataRecord) -> Result<()> {
            self.inner.put(record).await
        }
        async fn batch_put(&self, records: Vec<MetadataRecord>) -> Result<()> {
            if self.throttled.swap(false, Ordering::SeqCst) {
                return Err(AppError::Metadata {
                    message: "provisioned throughput exceeded".into(),
                });
            }
            self.inner.batch_put(records).await
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id).await
        }
        async fn scan(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage> {
            self.inner.scan(filter, page).await
        }
    }

    fn indexer(index: Arc<dyn VectorIndexClient>, store: Arc<dyn MetadataStore>) -> Indexer {
        Indexer::new(
            Arc::new(ReferenceEmbedder::new(32, 1000, "test-v1")),
            index,
            store,
            "default",
        )
    }

    #[tokio::test]
    async fn test_successful_job_is_done() {
        let store = Arc::new(MemoryStore::new());
        let indexer = indexer(Arc::new(MemoryIndex::new()), store.clone());
        let job = IngestJob::new(
            vec![NewDocument::new("Lesson 2: particles").with_id("doc_particles")],
            Some("japanese".into()),
        );

        assert_eq!(process_job(&indexer, job).await, Disposition::Done);
        assert!(assert_ok!(store.get("doc_particles").await).is_some());
    }

    #[tokio::test]
    async fn test_empty_job_is_rejected() {
        let indexer = indexer(Arc::new(MemoryIndex::new()), Arc::new(MemoryStore::new()));
        let disposition = process_job(&indexer, IngestJob::new(Vec::new(), None)).await;
        assert_eq!(disposition, Disposition::Rejected);
        assert!(disposition.deletes_message());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let indexer = indexer(Arc::new(DownIndex), store.clone());
        let job = IngestJob::new(vec![NewDocument::new("Lesson 4: keigo")], None);

        let disposition = process_job(&indexer, job).await;
        assert_eq!(disposition, Disposition::Retry);
        assert!(!disposition.deletes_message());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_redelivered_job_repairs_partial_write() {
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new());
        let throttled = Arc::new(ThrottledOnceStore {
            inner: store.clone(),
            throttled: AtomicBool::new(true),
        });
        let indexer = indexer(index.clone(), throttled);

        // No caller ids; the job is redelivered as the same message
        let job = IngestJob::new(
            vec![
                NewDocument::new("Lesson 5: classifiers"),
                NewDocument::new("Lesson 6: aspect markers"),
            ],
            None,
        );

        assert_eq!(process_job(&indexer, job.clone()).await, Disposition::Retry);
        assert_eq!(index.len("default").await, 2);
        assert!(store.is_empty().await);

        assert_eq!(process_job(&indexer, job.clone()).await, Disposition::Done);
        assert_eq!(index.len("default").await, 2);
        assert_eq!(store.len().await, 2);
        for doc in &job.documents {
            let id = doc.id.as_deref().unwrap();
            assert!(index.contains(id, "default").await);
            assert!(assert_ok!(store.get(id).await).is_some());
        }
    }
}
