//! In-memory vector index using cosine similarity.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{rank, MetadataFilter, VectorAttributes, VectorIndexClient, VectorMatch, VectorRecord};
use crate::errors::Result;

/// Namespaces map to id → record. Insertion order is not kept.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored in a namespace
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, HashMap::len)
    }

    pub async fn contains(&self, id: &str, namespace: &str) -> bool {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .is_some_and(|records| records.contains_key(id))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Every filter clause must hold. A bare value means `$eq`.
fn matches_filter(attributes: &VectorAttributes, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(field, condition)| {
        let actual = attributes.get(field);
        match condition {
            Value::Object(ops) => ops.iter().all(|(op, expected)| match op.as_str() {
                "$eq" => actual.is_some() && actual == expected.as_str(),
                "$ne" => actual != expected.as_str(),
                "$in" => expected
                    .as_array()
                    .is_some_and(|values| values.iter().any(|v| actual.is_some() && v.as_str() == actual)),
                _ => false,
            }),
            other => actual.is_some() && actual == other.as_str(),
        }
    })
}

#[async_trait]
impl VectorIndexClient for MemoryIndex {
    async fn upsert(&self, records: &[VectorRecord], namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let store = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            store.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
        namespace: &str,
    ) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(store) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let scored: Vec<VectorMatch> = store
            .values()
            .filter(|record| matches_filter(&record.attributes, filter))
            .map(|record| VectorMatch {
                id: record.id.clone(),
                score: cosine_similarity(&record.values, vector),
                attributes: Some(record.attributes.clone()),
            })
            .collect();

        Ok(rank(scored, k))
    }

    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(store) = namespaces.get_mut(namespace) {
            for id in ids {
                store.remove(id);
            }
        }
        Ok(())
    }
}
