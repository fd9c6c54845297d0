//! Vector index layer
//!
//! Provides:
//! - The `VectorIndexClient` contract (upsert, query, delete per namespace)
//! - A Pinecone client that resolves its API key on every call
//! - An in-memory index for local runs and tests
//!
//! Attribute filters use the Pinecone filter language; the in-memory index
//! understands the `$eq`, `$ne` and `$in` subset.

mod memory;
mod pinecone;

pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;

use crate::config::VectorIndexConfig;
use crate::errors::{AppError, Result};
use crate::secrets::{AwsSecretProvider, SecretProvider, StaticSecretProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Attribute filter passed through to the index
pub type MetadataFilter = serde_json::Map<String, Value>;

/// Approximate nearest-neighbour store, partitioned by namespace
#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    /// Insert or replace vectors by id
    async fn upsert(&self, records: &[VectorRecord], namespace: &str) -> Result<()>;

    /// At most `k` matches, highest score first
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
        namespace: &str,
    ) -> Result<Vec<VectorMatch>>;

    /// Remove vectors by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()>;
}

/// Attributes stored next to each vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Embedder that produced the vector, for tracking reindex work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedder_version: Option<String>,
}

impl VectorAttributes {
    /// Look up an attribute by its wire name
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "language" => self.language.as_deref(),
            "type" => self.kind.as_deref(),
            "source" => self.source.as_deref(),
            "embedder_version" => self.embedder_version.as_deref(),
            _ => None,
        }
    }
}

/// A vector to upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,

    pub values: Vec<f32>,

    #[serde(rename = "metadata")]
    pub attributes: VectorAttributes,
}

/// One similarity hit. Score scale is index specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,

    pub score: f32,

    #[serde(default, rename = "metadata")]
    pub attributes: Option<VectorAttributes>,
}

/// Filter restricting matches to one attribute value
pub fn equality_filter(field: &str, value: &str) -> MetadataFilter {
    let mut filter = MetadataFilter::new();
    filter.insert(field.to_string(), json!({ "$eq": value }));
    filter
}

/// Sort by descending score and keep the first `k`.
/// Equal scores keep their incoming order.
pub(crate) fn rank(mut matches: Vec<VectorMatch>, k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(k);
    matches
}

/// Create a vector index client based on configuration
pub async fn create_vector_index(config: &VectorIndexConfig) -> Result<Arc<dyn VectorIndexClient>> {
    match config.provider.as_str() {
        "pinecone" => {
            let host = config.host.clone().ok_or_else(|| AppError::Configuration {
                message: "vector_index.host is required for pinecone".to_string(),
            })?;

            let secrets: Arc<dyn SecretProvider> = match (&config.api_key_secret_id, &config.api_key) {
                (Some(secret_id), _) => {
                    let aws_config = crate::load_aws_config(None).await;
                    Arc::new(AwsSecretProvider::new(
                        aws_sdk_secretsmanager::Client::new(&aws_config),
                        secret_id.clone(),
                        config.api_key_field.clone(),
                    ))
                }
                (None, Some(key)) => Arc::new(StaticSecretProvider::new(key.clone())),
                (None, None) => {
                    return Err(AppError::Configuration {
                        message: "vector_index needs api_key_secret_id or api_key".to_string(),
                    })
                }
            };

            Ok(Arc::new(PineconeIndex::new(host, secrets, config)?))
        }
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown vector index provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> VectorMatch {
        VectorMatch {
            id: id.to_string(),
            score,
            attributes: None,
        }
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let ranked = rank(vec![hit("a", 0.2), hit("b", 0.9), hit("c", 0.5)], 2);
        let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_match_metadata_wire_shape() {
        let m: VectorMatch = serde_json::from_str(
            r#"{"id": "doc_1", "score": 0.8, "values": [], "metadata": {"language": "japanese", "type": "kanji", "extra": 1}}"#,
        )
        .unwrap();
        let attributes = m.attributes.unwrap();
        assert_eq!(attributes.get("language"), Some("japanese"));
        assert_eq!(attributes.get("type"), Some("kanji"));
        assert_eq!(attributes.get("source"), None);
    }

    #[test]
    fn test_equality_filter_shape() {
        let filter = equality_filter("language", "english");
        assert_eq!(Value::Object(filter), json!({"language": {"$eq": "english"}}));
    }

    #[tokio::test]
    async fn test_factory_requires_host_for_pinecone() {
        let config = VectorIndexConfig::default();
        assert!(matches!(
            create_vector_index(&config).await,
            Err(AppError::Configuration { .. })
        ));
    }
}
