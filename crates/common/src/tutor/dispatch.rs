//! Fire-and-forget ingest dispatch
//!
//! Upload flows hand new material to the indexer without waiting for it.
//! A dispatcher either queues the job for the indexer worker or runs it on
//! a detached task; either way the trigger never sees an ingest failure.

use super::indexer::{IngestResult, Indexer};
use crate::db::models::NewDocument;
use crate::errors::Result;
use crate::queue::{IngestJob, Queue};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Provenance tag for material stored by an upload flow
pub const LEARNING_MATERIAL_SOURCE: &str = "learning_material";

/// Id prefix for uploaded material without a caller-chosen id
const MATERIAL_ID_PREFIX: &str = "material";

#[async_trait]
pub trait IngestDispatcher: Send + Sync {
    /// Hand off a job. `Ok` means accepted, not ingested.
    async fn dispatch(&self, job: IngestJob) -> Result<()>;
}

/// Sends jobs to the ingest queue for the indexer worker
pub struct QueueDispatcher {
    queue: Arc<Queue>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl IngestDispatcher for QueueDispatcher {
    async fn dispatch(&self, job: IngestJob) -> Result<()> {
        let message_id = self.queue.send(&job).await?;
        info!(job_id = %job.job_id, message_id = %message_id, "Ingest job queued");
        Ok(())
    }
}

/// Runs jobs in-process on a detached tokio task
pub struct TaskDispatcher {
    indexer: Arc<Indexer>,
}

impl TaskDispatcher {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    /// Start the job and return its handle. Dropping the handle does not
    /// cancel the task.
    pub fn spawn(&self, job: IngestJob) -> JoinHandle<Option<IngestResult>> {
        let indexer = Arc::clone(&self.indexer);
        tokio::spawn(async move {
            match indexer.ingest(job.documents, job.namespace.as_deref()).await {
                Ok(result) => {
                    info!(job_id = %job.job_id, count = result.count, "Background ingest finished");
                    Some(result)
                }
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "Background ingest failed");
                    crate::metrics::record_ingestion_failure(&e.code().as_code().to_string());
                    None
                }
            }
        })
    }
}

#[async_trait]
impl IngestDispatcher for TaskDispatcher {
    async fn dispatch(&self, job: IngestJob) -> Result<()> {
        self.spawn(job);
        Ok(())
    }
}

/// Dispatch and forget. Failures to hand off are logged, never returned.
pub async fn trigger_ingest(dispatcher: &dyn IngestDispatcher, job: IngestJob) {
    let job_id = job.job_id;
    if let Err(e) = dispatcher.dispatch(job).await {
        warn!(job_id = %job_id, error = %e, "Could not dispatch ingest job");
        crate::metrics::record_ingestion_failure(&e.code().as_code().to_string());
    }
}

/// Job for one piece of newly stored learning material
pub fn material_job(mut document: NewDocument, namespace: Option<String>) -> IngestJob {
    if document.source.as_deref().map_or(true, |s| s.trim().is_empty()) {
        document.source = Some(LEARNING_MATERIAL_SOURCE.to_string());
    }
    IngestJob::new(vec![document.or_generated_id(MATERIAL_ID_PREFIX)], namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, MetadataStore};
    use crate::embeddings::ReferenceEmbedder;
    use crate::errors::AppError;
    use crate::index::MemoryIndex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn indexer(store: Arc<MemoryStore>) -> Arc<Indexer> {
        Arc::new(Indexer::new(
            Arc::new(ReferenceEmbedder::new(32, 1000, "test-v1")),
            Arc::new(MemoryIndex::new()),
            store,
            "default",
        ))
    }

    struct RefusingDispatcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IngestDispatcher for RefusingDispatcher {
        async fn dispatch(&self, _: IngestJob) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Queue {
                message: "queue does not exist".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_material_job_tags_source() {
        let job = material_job(NewDocument::new("Lesson 3: counters"), None);
        assert_eq!(job.documents.len(), 1);
        assert_eq!(job.documents[0].source.as_deref(), Some(LEARNING_MATERIAL_SOURCE));

        let kept = material_job(NewDocument::new("x").with_source("class_handout"), None);
        assert_eq!(kept.documents[0].source.as_deref(), Some("class_handout"));
    }

    #[tokio::test]
    async fn test_material_job_ids_survive_redelivery() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = TaskDispatcher::new(indexer(store.clone()));

        let job = material_job(NewDocument::new("Lesson 4: measure words"), None);
        let id = job.documents[0].id.clone().unwrap();
        assert!(id.starts_with("material_"));

        let kept = material_job(NewDocument::new("x").with_id("doc_x"), None);
        assert_eq!(kept.documents[0].id.as_deref(), Some("doc_x"));

        // Running the same job twice rewrites one document
        dispatcher.spawn(job.clone()).await.unwrap().unwrap();
        let again = dispatcher.spawn(job).await.unwrap().unwrap();
        assert_eq!(again.ids, vec![id.clone()]);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_task_dispatch_ingests_in_background() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = TaskDispatcher::new(indexer(store.clone()));

        let job = material_job(NewDocument::new("Lesson 1: greetings").with_id("doc_greetings"), None);
        let result = dispatcher.spawn(job).await.unwrap().unwrap();
        assert_eq!(result.ids, vec!["doc_greetings".to_string()]);

        let stored = store.get("doc_greetings").await.unwrap().unwrap();
        assert_eq!(stored.as_document().unwrap().source, LEARNING_MATERIAL_SOURCE);
    }

    #[tokio::test]
    async fn test_background_failure_stays_in_the_task() {
        let dispatcher = TaskDispatcher::new(indexer(Arc::new(MemoryStore::new())));

        // Blank content fails inside the task; the trigger still succeeds
        let job = IngestJob::new(vec![NewDocument::new("   ")], None);
        trigger_ingest(&dispatcher, job.clone()).await;
        assert_eq!(dispatcher.spawn(job).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_trigger_swallows_dispatch_errors() {
        let dispatcher = RefusingDispatcher {
            calls: AtomicUsize::new(0),
        };
        trigger_ingest(&dispatcher, material_job(NewDocument::new("x"), None)).await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }
}
