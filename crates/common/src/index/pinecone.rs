//! Pinecone data-plane client

use super::{rank, MetadataFilter, VectorIndexClient, VectorMatch, VectorRecord};
use crate::config::VectorIndexConfig;
use crate::errors::{AppError, Result};
use crate::secrets::SecretProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct PineconeIndex {
    client: reqwest::Client,
    base_url: String,
    secrets: Arc<dyn SecretProvider>,
    upsert_batch_size: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "is_unfiltered")]
    filter: &'a MetadataFilter,
    namespace: &'a str,
}

fn is_unfiltered(filter: &&MetadataFilter) -> bool {
    filter.is_empty()
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

impl PineconeIndex {
    pub fn new(
        host: String,
        secrets: Arc<dyn SecretProvider>,
        config: &VectorIndexConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secrets,
            upsert_batch_size: config.upsert_batch_size.max(1),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        // Resolved per call; rotation takes effect without a restart
        let api_key = self
            .secrets
            .resolve()
            .await
            .map_err(|e| AppError::index(format!("Could not retrieve index API key: {}", e)))?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::index(format!("Request to {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::index(format!("{} returned {}: {}", path, status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl VectorIndexClient for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord], namespace: &str) -> Result<()> {
        for batch in records.chunks(self.upsert_batch_size) {
            self.post(
                "/vectors/upsert",
                &UpsertRequest {
                    vectors: batch,
                    namespace,
                },
            )
            .await?;
            debug!(count = batch.len(), namespace, "Upserted vectors");
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
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .post(
                "/query",
                &QueryRequest {
                    vector,
                    top_k: k,
                    include_metadata: true,
                    filter,
                    namespace,
                },
            )
            .await?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::index(format!("Unreadable query response: {}", e)))?;

        Ok(rank(body.matches, k))
    }

    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post("/vectors/delete", &DeleteRequest { ids, namespace })
            .await?;
        Ok(())
    }
}
