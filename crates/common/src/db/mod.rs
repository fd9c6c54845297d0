//! Metadata store layer for LingoForge
//!
//! Provides:
//! - The `MetadataStore` contract the pipeline depends on
//! - A DynamoDB implementation for deployments
//! - An in-memory implementation for local runs and tests
//!
//! Batch calls are split to the provider's per-request ceilings inside the
//! implementations; callers always make one logical call.

pub mod models;
mod dynamo;
mod memory;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

use crate::config::MetadataConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use models::MetadataRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// DynamoDB BatchGetItem key limit
pub const BATCH_GET_LIMIT: usize = 100;

/// DynamoDB BatchWriteItem request limit
pub const BATCH_WRITE_LIMIT: usize = 25;

/// Page size used when a scan does not name one
pub const DEFAULT_SCAN_LIMIT: usize = 50;

/// Key-addressed document store holding metadata records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch one record
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>>;

    /// Fetch many records. Unknown ids are omitted; result order is unspecified.
    async fn batch_get(&self, ids: &[String]) -> Result<Vec<MetadataRecord>>;

    /// Write one record, replacing any record with the same id
    async fn put(&self, record: MetadataRecord) -> Result<()>;

    /// Write many records
    async fn batch_put(&self, records: Vec<MetadataRecord>) -> Result<()>;

    /// Delete one record, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Scan with optional attribute filters, one page at a time
    async fn scan(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage>;
}

/// Attribute filters for `scan`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub language: Option<String>,

    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ScanFilter {
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        let language_ok = match &self.language {
            Some(wanted) => record.language() == Some(wanted.as_str()),
            None => true,
        };
        let kind_ok = match &self.kind {
            Some(wanted) => record.kind() == Some(wanted.as_str()),
            None => true,
        };
        language_ok && kind_ok
    }
}

/// Page request for `scan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,

    /// Continuation token from a previous page
    pub next_token: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SCAN_LIMIT,
            next_token: None,
        }
    }
}

/// One page of scan results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPage {
    pub records: Vec<MetadataRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Encode the last key of a page as an opaque continuation token
pub(crate) fn encode_token(last_id: &str) -> String {
    hex::encode(last_id.as_bytes())
}

/// Decode a continuation token back into the last key it names
pub(crate) fn decode_token(token: &str) -> Result<String> {
    let bytes = hex::decode(token)
        .map_err(|_| AppError::invalid_input("next_token is not a valid continuation token"))?;
    String::from_utf8(bytes)
        .map_err(|_| AppError::invalid_input("next_token is not a valid continuation token"))
}

/// Drop repeated ids, keeping first occurrences in order
pub(crate) fn unique_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Create a metadata store based on configuration
pub async fn create_metadata_store(config: &MetadataConfig) -> Result<Arc<dyn MetadataStore>> {
    match config.provider.as_str() {
        "dynamodb" => {
            let aws_config = crate::load_aws_config(config.region.as_deref()).await;
            let client = aws_sdk_dynamodb::Client::new(&aws_config);
            Ok(Arc::new(DynamoStore::new(client, config)))
        }
        "memory" => Ok(Arc::new(MemoryStore::with_batch_sizes(
            config.batch_get_size,
            config.batch_write_size,
        ))),
        other => Err(AppError::Configuration {
            message: format!("Unknown metadata provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = encode_token("material_1700000000000_abc");
        assert_eq!(decode_token(&token).unwrap(), "material_1700000000000_abc");
    }

    #[test]
    fn test_bad_token_is_caller_error() {
        let err = decode_token("not-hex").unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_unique_ids_keeps_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique_ids(&ids), vec!["b".to_string(), "a".to_string()]);
    }
}
