//! Component wiring from configuration

use super::dispatch::TaskDispatcher;
use super::indexer::Indexer;
use super::invoker::{create_language_model, ModelInvoker};
use super::pipeline::QueryPipeline;
use super::prompt::PromptAssembler;
use super::retriever::Retriever;
use crate::config::AppConfig;
use crate::db::{create_metadata_store, MetadataStore};
use crate::embeddings::create_embedder;
use crate::errors::Result;
use crate::index::create_vector_index;
use std::sync::Arc;
use tracing::info;

/// Every component a binary needs, built once at start-up
pub struct TutorServices {
    pub pipeline: Arc<QueryPipeline>,
    pub indexer: Arc<Indexer>,
    pub store: Arc<dyn MetadataStore>,
}

impl TutorServices {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = create_vector_index(&config.vector_index).await?;
        let store = create_metadata_store(&config.metadata).await?;
        let model = create_language_model(&config.model).await?;
        let namespace = config.vector_index.default_namespace.clone();

        let assembler = PromptAssembler::new(&config.prompt);
        let invoker = ModelInvoker::new(model, config.model.clone(), assembler.session_persona());
        let retriever = Retriever::new(embedder.clone(), index.clone(), store.clone(), namespace.clone())
            .with_language_filter(config.retrieval.filter_by_language);

        let pipeline = QueryPipeline::new(retriever, assembler, invoker, store.clone(), config.retrieval.top_k);
        let indexer = Indexer::new(embedder.clone(), index, store.clone(), namespace);

        info!(
            embedder = embedder.model_name(),
            embedder_version = embedder.version(),
            index = %config.vector_index.provider,
            metadata = %config.metadata.provider,
            model = %config.model.provider,
            "Tutor services ready"
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            indexer: Arc::new(indexer),
            store,
        })
    }

    /// In-process dispatcher sharing this indexer
    pub fn task_dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(Arc::clone(&self.indexer))
    }
}
