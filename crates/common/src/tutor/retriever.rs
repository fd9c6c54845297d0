//! Context retrieval: embed the query, search the index, join metadata.

use crate::db::models::{Document, DEFAULT_KIND, DEFAULT_LANGUAGE, UNKNOWN_SOURCE};
use crate::db::MetadataStore;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{equality_filter, MetadataFilter, VectorIndexClient, VectorMatch};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// A retrieved passage handed to prompt assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub id: String,

    /// Similarity as reported by the index
    pub score: f32,

    /// Empty when the metadata store has no record for `id`
    pub content: String,

    pub language: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub source: String,
}

impl ContextPassage {
    fn from_document(hit: &VectorMatch, doc: &Document) -> Self {
        Self {
            id: hit.id.clone(),
            score: hit.score,
            content: doc.content.clone(),
            language: doc.language.clone(),
            kind: doc.kind.clone(),
            source: doc.source.clone(),
        }
    }

    /// Stand-in for a match whose metadata is missing: attributes carried
    /// by the index where present, fixed defaults otherwise
    fn from_match(hit: &VectorMatch) -> Self {
        let attribute = |field: &str, fallback: &str| {
            hit.attributes
                .as_ref()
                .and_then(|a| a.get(field))
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Self {
            id: hit.id.clone(),
            score: hit.score,
            content: String::new(),
            language: attribute("language", DEFAULT_LANGUAGE),
            kind: attribute("type", DEFAULT_KIND),
            source: attribute("source", UNKNOWN_SOURCE),
        }
    }
}

/// Read-only composition of embedder, vector index and metadata store
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndexClient>,
    store: Arc<dyn MetadataStore>,
    namespace: String,
    filter_by_language: bool,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndexClient>,
        store: Arc<dyn MetadataStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            namespace: namespace.into(),
            filter_by_language: false,
        }
    }

    /// Restrict matches to the query's target language
    pub fn with_language_filter(mut self, enabled: bool) -> Self {
        self.filter_by_language = enabled;
        self
    }

    /// Up to `k` passages in the index's ranking order.
    ///
    /// An empty query is `InvalidQuery` and a failed embedding is returned
    /// as is. Index and metadata failures only shrink the result.
    #[instrument(skip(self, query, filter), fields(language = %language, k = k))]
    pub async fn retrieve(
        &self,
        query: &str,
        language: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ContextPassage>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidQuery {
                message: "Query is required".to_string(),
            });
        }

        let start = Instant::now();
        let vector = self.embedder.embed(query).await?;

        let mut filter = filter.clone();
        if self.filter_by_language && !language.is_empty() && !filter.contains_key("language") {
            filter.extend(equality_filter("language", language));
        }

        let mut matches = match self.index.query(&vector, k, &filter, &self.namespace).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Vector search failed, answering without context");
                crate::metrics::record_retrieval(start.elapsed().as_secs_f64(), 0, true);
                return Ok(Vec::new());
            }
        };
        matches.truncate(k);

        if matches.is_empty() {
            crate::metrics::record_retrieval(start.elapsed().as_secs_f64(), 0, false);
            return Ok(Vec::new());
        }

        let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        let documents: HashMap<String, Document> = match self.store.batch_get(&ids).await {
            Ok(records) => records
                .into_iter()
                .filter_map(|r| r.into_document())
                .map(|doc| (doc.id.clone(), doc))
                .collect(),
            Err(e) => {
                warn!(error = %e, matches = matches.len(), "Metadata lookup failed, dropping context");
                crate::metrics::record_retrieval(start.elapsed().as_secs_f64(), 0, true);
                return Ok(Vec::new());
            }
        };

        let mut misses = 0;
        let passages: Vec<ContextPassage> = matches
            .iter()
            .map(|hit| match documents.get(&hit.id) {
                Some(doc) => ContextPassage::from_document(hit, doc),
                None => {
                    misses += 1;
                    ContextPassage::from_match(hit)
                }
            })
            .collect();

        if misses > 0 {
            // A vector without metadata: the stores disagree for these ids
            warn!(misses, "Index matches missing from the metadata store");
            crate::metrics::record_metadata_misses(misses);
        }

        debug!(passages = passages.len(), "Retrieved context");
        crate::metrics::record_retrieval(start.elapsed().as_secs_f64(), passages.len(), misses > 0);
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MetadataRecord, NewDocument};
    use crate::db::{MemoryStore, PageRequest, ScanFilter, ScanPage};
    use crate::embeddings::ReferenceEmbedder;
    use crate::index::{MemoryIndex, VectorAttributes, VectorRecord};
    use async_trait::async_trait;
    use chrono::Utc;

    struct DownIndex;

    #[async_trait]
    impl VectorIndexClient for DownIndex {
        async fn upsert(&self, _: &[VectorRecord], _: &str) -> Result<()> {
            Err(AppError::index("connection refused"))
        }

        async fn query(&self, _: &[f32], _: usize, _: &MetadataFilter, _: &str) -> Result<Vec<VectorMatch>> {
            Err(AppError::index("connection refused"))
        }

        async fn delete(&self, _: &[String], _: &str) -> Result<()> {
            Err(AppError::index("connection refused"))
        }
    }

    struct DownStore;

    #[async_trait]
    impl MetadataStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<MetadataRecord>> {
            Err(AppError::metadata("throttled"))
        }
        async fn batch_get(&self, _: &[String]) -> Result<Vec<MetadataRecord>> {
            Err(AppError::metadata("throttled"))
        }
        async fn put(&self, _: MetadataRecord) -> Result<()> {
            Err(AppError::metadata("throttled"))
        }
        async fn batch_put(&self, _: Vec<MetadataRecord>) -> Result<()> {
            Err(AppError::metadata("throttled"))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Err(AppError::metadata("throttled"))
        }
        async fn scan(&self, _: &ScanFilter, _: &PageRequest) -> Result<ScanPage> {
            Err(AppError::metadata("throttled"))
        }
    }

    fn embedder() -> Arc<ReferenceEmbedder> {
        Arc::new(ReferenceEmbedder::new(64, 1000, "test-v1"))
    }

    async fn seed(
        index: &MemoryIndex,
        store: &MemoryStore,
        embedder: &ReferenceEmbedder,
        docs: &[(&str, &str, &str)],
    ) {
        for (id, content, language) in docs {
            let vector = embedder.embed(content).await.unwrap();
            index
                .upsert(
                    &[VectorRecord {
                        id: id.to_string(),
                        values: vector,
                        attributes: VectorAttributes {
                            language: Some(language.to_string()),
                            kind: Some("grammar".into()),
                            source: Some("learning_material".into()),
                            embedder_version: Some("test-v1".into()),
                        },
                    }],
                    "default",
                )
                .await
                .unwrap();
            let doc = Document::from_new(
                NewDocument::new(*content)
                    .with_language(*language)
                    .with_kind("grammar")
                    .with_source("learning_material"),
                id.to_string(),
                Utc::now(),
            );
            store.put(doc.into()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_passages_bounded_and_ranked() {
        let embedder = embedder();
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new());
        seed(
            &index,
            &store,
            &embedder,
            &[
                ("a", "The definite article", "english"),
                ("b", "Countable nouns", "english"),
                ("c", "Present perfect", "english"),
                ("d", "Phrasal verbs", "english"),
            ],
        )
        .await;

        let retriever = Retriever::new(embedder, index, store, "default");
        for k in [1, 2, 3, 10] {
            let passages = retriever
                .retrieve("articles", "english", k, &MetadataFilter::new())
                .await
                .unwrap();
            assert!(passages.len() <= k);
            assert!(passages.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[tokio::test]
    async fn test_exact_content_is_top_match() {
        let embedder = embedder();
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new());
        seed(
            &index,
            &store,
            &embedder,
            &[
                ("x", "Use 'the' for specific nouns.", "english"),
                ("y", "The past tense of go is went.", "english"),
            ],
        )
        .await;

        let retriever = Retriever::new(embedder, index, store, "default");
        let passages = retriever
            .retrieve("Use 'the' for specific nouns.", "english", 1, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(passages[0].id, "x");
        assert_eq!(passages[0].content, "Use 'the' for specific nouns.");
        assert_eq!(passages[0].kind, "grammar");
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = Retriever::new(
            embedder(),
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryStore::new()),
            "default",
        );
        let err = retriever
            .retrieve("  ", "english", 5, &MetadataFilter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_empty() {
        let retriever = Retriever::new(embedder(), Arc::new(DownIndex), Arc::new(MemoryStore::new()), "default");
        let passages = retriever
            .retrieve("anything", "english", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_degrades_to_empty() {
        let embedder = embedder();
        let index = Arc::new(MemoryIndex::new());
        seed(&index, &MemoryStore::new(), &embedder, &[("a", "topic markers", "japanese")]).await;

        let retriever = Retriever::new(embedder, index, Arc::new(DownStore), "default");
        let passages = retriever
            .retrieve("topic markers", "japanese", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_metadata_synthesizes_passage() {
        let embedder = embedder();
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(
                &[
                    VectorRecord {
                        id: "tagged".into(),
                        values: embedder.embed("orphan one").await.unwrap(),
                        attributes: VectorAttributes {
                            language: Some("japanese".into()),
                            ..Default::default()
                        },
                    },
                    VectorRecord {
                        id: "bare".into(),
                        values: embedder.embed("orphan two").await.unwrap(),
                        attributes: VectorAttributes::default(),
                    },
                ],
                "default",
            )
            .await
            .unwrap();

        let retriever = Retriever::new(embedder, index, Arc::new(MemoryStore::new()), "default");
        let passages = retriever
            .retrieve("orphan", "english", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(passages.len(), 2);

        let tagged = passages.iter().find(|p| p.id == "tagged").unwrap();
        assert_eq!(tagged.content, "");
        assert_eq!(tagged.language, "japanese");
        assert_eq!(tagged.kind, "general");
        assert_eq!(tagged.source, "unknown");

        let bare = passages.iter().find(|p| p.id == "bare").unwrap();
        assert_eq!(bare.language, "english");
    }

    #[tokio::test]
    async fn test_language_filter_when_enabled() {
        let embedder = embedder();
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new());
        seed(
            &index,
            &store,
            &embedder,
            &[("en", "particles", "english"), ("ja", "particles", "japanese")],
        )
        .await;

        let unfiltered = Retriever::new(embedder.clone(), index.clone(), store.clone(), "default");
        let all = unfiltered
            .retrieve("particles", "japanese", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = Retriever::new(embedder, index, store, "default").with_language_filter(true);
        let only_ja = filtered
            .retrieve("particles", "japanese", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(only_ja.len(), 1);
        assert_eq!(only_ja[0].id, "ja");
    }
}
