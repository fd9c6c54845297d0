//! LingoForge Common Library
//!
//! Shared code for the LingoForge tutoring services including:
//! - The retrieval-augmented query pipeline (retrieve, assemble, invoke)
//! - The indexing write path and its fire-and-forget dispatchers
//! - Embedding, vector index, metadata store and secret clients
//! - Error types, configuration, metrics and queue plumbing

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod queue;
pub mod secrets;
pub mod tutor;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::MetadataStore;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndexClient;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Load the shared AWS configuration, optionally pinned to a region
pub async fn load_aws_config(region: Option<&str>) -> aws_config::SdkConfig {
    let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    match region {
        Some(region) => {
            loader
                .region(aws_types::region::Region::new(region.to_string()))
                .load()
                .await
        }
        None => loader.load().await,
    }
}
