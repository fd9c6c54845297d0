//! Write path: embed documents, then write the vector index and the
//! metadata store.
//!
//! Write order is fixed: vectors first, metadata second. Removal uses the
//! same order. A failure between the two steps leaves vectors without
//! metadata; retrieval tolerates that (it synthesizes empty passages) and
//! re-running `ingest` with the same ids repairs it, since both stores
//! replace by id.

use crate::db::models::{
    generate_id, Document, MetadataRecord, NewDocument, DOC_ID_PREFIX, DOC_ID_SUFFIX_LEN,
};
use crate::db::MetadataStore;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{VectorAttributes, VectorIndexClient, VectorRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    /// Documents written to both stores
    pub count: usize,

    /// Final ids, in input order
    pub ids: Vec<String>,

    pub namespace: String,
}

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndexClient>,
    store: Arc<dyn MetadataStore>,
    default_namespace: String,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndexClient>,
        store: Arc<dyn MetadataStore>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            default_namespace: default_namespace.into(),
        }
    }

    fn namespace<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.default_namespace.as_str())
    }

    /// Give every document an id, unique within the batch
    fn assign_ids(documents: &[NewDocument]) -> Result<Vec<String>> {
        let mut seen = HashSet::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());

        for doc in documents {
            let id = match doc.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
                Some(id) => {
                    if seen.contains(id) {
                        return Err(AppError::invalid_input(format!(
                            "Document id {} appears more than once",
                            id
                        )));
                    }
                    id.to_string()
                }
                None => loop {
                    let candidate = generate_id(DOC_ID_PREFIX, DOC_ID_SUFFIX_LEN);
                    if !seen.contains(&candidate) {
                        break candidate;
                    }
                },
            };
            seen.insert(id.clone());
            ids.push(id);
        }

        Ok(ids)
    }

    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn ingest(
        &self,
        documents: Vec<NewDocument>,
        namespace: Option<&str>,
    ) -> Result<IngestResult> {
        if documents.is_empty() {
            return Err(AppError::invalid_input("At least one document is required"));
        }
        if let Some(position) = documents.iter().position(|d| d.content.trim().is_empty()) {
            return Err(AppError::invalid_input(format!(
                "Document {} has no content",
                position
            )));
        }

        let start = Instant::now();
        let namespace = self.namespace(namespace).to_string();
        let ids = Self::assign_ids(&documents)?;

        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&contents).await?;
        if embeddings.len() != documents.len() {
            return Err(AppError::Embedding {
                message: format!(
                    "Expected {} embeddings, got {}",
                    documents.len(),
                    embeddings.len()
                ),
            });
        }

        let timestamp = Utc::now();
        let version = self.embedder.version().to_string();
        let mut vectors = Vec::with_capacity(documents.len());
        let mut records = Vec::with_capacity(documents.len());

        for ((doc, id), values) in documents.into_iter().zip(&ids).zip(embeddings) {
            let stored = Document::from_new(doc, id.clone(), timestamp);
            vectors.push(VectorRecord {
                id: id.clone(),
                values,
                attributes: VectorAttributes {
                    language: Some(stored.language.clone()),
                    kind: Some(stored.kind.clone()),
                    source: Some(stored.source.clone()),
                    embedder_version: Some(version.clone()),
                },
            });
            records.push(MetadataRecord::from(stored));
        }

        self.index.upsert(&vectors, &namespace).await?;

        if let Err(e) = self.store.batch_put(records).await {
            error!(error = %e, ids = ?ids, "Vectors written but metadata write failed");
            return Err(AppError::Inconsistent {
                ids,
                message: format!("metadata write failed after vector upsert: {}", e),
            });
        }

        crate::metrics::record_ingestion(start.elapsed().as_secs_f64(), ids.len(), &namespace);
        info!(count = ids.len(), namespace = %namespace, "Documents ingested");

        Ok(IngestResult {
            count: ids.len(),
            ids,
            namespace,
        })
    }

    /// Delete a document from both stores. Returns whether metadata existed.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str, namespace: Option<&str>) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(AppError::invalid_input("Document id is required"));
        }
        let namespace = self.namespace(namespace);

        self.index.delete(&[id.to_string()], namespace).await?;

        match self.store.delete(id).await {
            Ok(existed) => {
                info!(id, namespace, existed, "Document removed");
                Ok(existed)
            }
            Err(e) => {
                error!(error = %e, id, "Vector deleted but metadata delete failed");
                Err(AppError::Inconsistent {
                    ids: vec![id.to_string()],
                    message: format!("metadata delete failed after vector delete: {}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, PageRequest, ScanFilter, ScanPage};
    use crate::embeddings::ReferenceEmbedder;
    use crate::index::{MemoryIndex, MetadataFilter};
    use crate::tutor::retriever::Retriever;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to a `MemoryStore` but can be told to reject writes
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(AppError::metadata("provisioned throughput exceeded"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
            self.inner.get(id).await
        }
        async fn batch_get(&self, ids: &[String]) -> Result<Vec<MetadataRecord>> {
            self.inner.batch_get(ids).await
        }
        async fn put(&self, record: MetadataRecord) -> Result<()> {
            self.check()?;
            self.inner.put(record).await
        }
        async fn batch_put(&self, records: Vec<MetadataRecord>) -> Result<()> {
            self.check()?;
            self.inner.batch_put(records).await
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            self.check()?;
            self.inner.delete(id).await
        }
        async fn scan(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage> {
            self.inner.scan(filter, page).await
        }
    }

    struct Fixture {
        embedder: Arc<ReferenceEmbedder>,
        index: Arc<MemoryIndex>,
        store: Arc<FlakyStore>,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        let embedder = Arc::new(ReferenceEmbedder::new(64, 4000, "test-v1"));
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(FlakyStore::default());
        let indexer = Indexer::new(embedder.clone(), index.clone(), store.clone(), "default");
        Fixture {
            embedder,
            index,
            store,
            indexer,
        }
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let f = fixture();
        let documents: Vec<NewDocument> = (0..40)
            .map(|i| NewDocument::new(format!("lesson {i}")))
            .collect();

        let result = f.indexer.ingest(documents, None).await.unwrap();
        assert_eq!(result.count, 40);
        assert_eq!(result.ids.len(), 40);
        assert_eq!(result.ids.iter().collect::<HashSet<_>>().len(), 40);
        assert!(result.ids.iter().all(|id| id.starts_with("doc_")));
        assert_eq!(result.namespace, "default");
        assert_eq!(f.index.len("default").await, 40);
        assert_eq!(f.store.inner.len().await, 40);
    }

    #[tokio::test]
    async fn test_rejects_empty_batch_and_blank_content() {
        let f = fixture();
        assert!(matches!(
            f.indexer.ingest(Vec::new(), None).await,
            Err(AppError::InvalidInput { .. })
        ));
        assert!(matches!(
            f.indexer
                .ingest(vec![NewDocument::new("ok"), NewDocument::new("  ")], None)
                .await,
            Err(AppError::InvalidInput { .. })
        ));
        assert!(matches!(
            f.indexer
                .ingest(
                    vec![
                        NewDocument::new("one").with_id("same"),
                        NewDocument::new("two").with_id("same")
                    ],
                    None
                )
                .await,
            Err(AppError::InvalidInput { .. })
        ));
        assert_eq!(f.index.len("default").await, 0);
    }

    #[tokio::test]
    async fn test_vectors_carry_attributes_and_version() {
        let f = fixture();
        let result = f
            .indexer
            .ingest(
                vec![NewDocument::new("敬語 basics").with_language("japanese").with_kind("grammar")],
                Some("school-a"),
            )
            .await
            .unwrap();

        let vector = f.embedder.embed("敬語 basics").await.unwrap();
        let matches = f
            .index
            .query(&vector, 1, &MetadataFilter::new(), "school-a")
            .await
            .unwrap();
        let attributes = matches[0].attributes.clone().unwrap();
        assert_eq!(matches[0].id, result.ids[0]);
        assert_eq!(attributes.language.as_deref(), Some("japanese"));
        assert_eq!(attributes.kind.as_deref(), Some("grammar"));
        assert_eq!(attributes.source.as_deref(), Some("user_uploaded"));
        assert_eq!(attributes.embedder_version.as_deref(), Some("test-v1"));
    }

    #[tokio::test]
    async fn test_ingest_then_retrieve_round_trip() {
        let f = fixture();
        let content = "Use 'the' when both speakers know which thing is meant.";
        f.indexer
            .ingest(
                vec![
                    NewDocument::new(content).with_source("learning_material"),
                    NewDocument::new("Use 'a' for any one thing of a kind."),
                    NewDocument::new("Plural nouns usually end in -s."),
                ],
                None,
            )
            .await
            .unwrap();

        let retriever = Retriever::new(f.embedder.clone(), f.index.clone(), f.store.clone(), "default");
        let passages = retriever
            .retrieve(content, "english", 1, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(passages[0].content, content);
        assert_eq!(passages[0].source, "learning_material");
    }

    #[tokio::test]
    async fn test_partial_ingest_is_flagged_and_repairable() {
        let f = fixture();
        f.store.failing.store(true, Ordering::SeqCst);

        let documents = vec![NewDocument::new("ように vs ために").with_id("doc_purpose")];
        let err = f.indexer.ingest(documents.clone(), None).await.unwrap_err();
        match err {
            AppError::Inconsistent { ids, .. } => assert_eq!(ids, vec!["doc_purpose".to_string()]),
            other => panic!("expected Inconsistent, got {other:?}"),
        }
        assert!(f.index.contains("doc_purpose", "default").await);
        assert!(f.store.get("doc_purpose").await.unwrap().is_none());

        f.store.failing.store(false, Ordering::SeqCst);
        f.indexer.ingest(documents, None).await.unwrap();
        assert_eq!(f.index.len("default").await, 1);
        assert!(f.store.get("doc_purpose").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_from_both_stores() {
        let f = fixture();
        f.indexer
            .ingest(vec![NewDocument::new("て-form").with_id("doc_te")], None)
            .await
            .unwrap();

        assert!(f.indexer.remove("doc_te", None).await.unwrap());
        assert!(!f.index.contains("doc_te", "default").await);
        assert!(f.store.get("doc_te").await.unwrap().is_none());

        assert!(!f.indexer.remove("doc_te", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_flags_metadata_failure() {
        let f = fixture();
        f.indexer
            .ingest(vec![NewDocument::new("counters").with_id("doc_counters")], None)
            .await
            .unwrap();

        f.store.failing.store(true, Ordering::SeqCst);
        let err = f.indexer.remove("doc_counters", None).await.unwrap_err();
        assert!(matches!(err, AppError::Inconsistent { .. }));
        assert!(!f.index.contains("doc_counters", "default").await);
    }
}
