//! DynamoDB metadata store
//!
//! Records are stored as flat items keyed by the string attribute `id`.
//! Serde does the shaping; `to_item`/`from_item` translate between JSON
//! values and DynamoDB attribute values.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeValue, KeysAndAttributes, PutRequest, ReturnValue, WriteRequest,
};
use aws_sdk_dynamodb::Client;
use futures::future::try_join_all;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use super::models::MetadataRecord;
use super::{
    decode_token, encode_token, unique_ids, MetadataStore, PageRequest, ScanFilter, ScanPage,
};
use crate::config::MetadataConfig;
use crate::errors::{AppError, Result};

type Item = HashMap<String, AttributeValue>;

/// Rounds spent re-sending unprocessed keys or items before giving up
const MAX_UNPROCESSED_ROUNDS: usize = 5;

pub struct DynamoStore {
    client: Client,
    table: String,
    batch_get_size: usize,
    batch_write_size: usize,
}

impl DynamoStore {
    pub fn new(client: Client, config: &MetadataConfig) -> Self {
        Self {
            client,
            table: config.table_name.clone(),
            batch_get_size: config.batch_get_size.clamp(1, super::BATCH_GET_LIMIT),
            batch_write_size: config.batch_write_size.clamp(1, super::BATCH_WRITE_LIMIT),
        }
    }

    fn key(id: &str) -> Item {
        HashMap::from([("id".to_string(), AttributeValue::S(id.to_string()))])
    }

    /// One BatchGetItem call plus re-sends of whatever DynamoDB left unprocessed
    async fn get_chunk(&self, ids: &[String]) -> Result<Vec<MetadataRecord>> {
        let keys: Vec<Item> = ids.iter().map(|id| Self::key(id)).collect();
        let keys_and_attributes = KeysAndAttributes::builder()
            .set_keys(Some(keys))
            .build()
            .map_err(|e| AppError::metadata(format!("Invalid batch get request: {}", e)))?;

        let mut request_items = HashMap::from([(self.table.clone(), keys_and_attributes)]);
        let mut records = Vec::with_capacity(ids.len());

        for round in 0..MAX_UNPROCESSED_ROUNDS {
            let output = self
                .client
                .batch_get_item()
                .set_request_items(Some(request_items))
                .send()
                .await
                .map_err(|e| {
                    AppError::metadata(format!("Batch get failed: {}", DisplayErrorContext(&e)))
                })?;

            if let Some(mut responses) = output.responses {
                records.extend(readable_records(
                    responses.remove(&self.table).unwrap_or_default(),
                ));
            }

            match output.unprocessed_keys {
                Some(unprocessed) if !unprocessed.is_empty() => {
                    debug!(round, "Re-sending unprocessed keys");
                    request_items = unprocessed;
                }
                _ => return Ok(records),
            }
        }

        Err(AppError::metadata(
            "Batch get left keys unprocessed after repeated attempts",
        ))
    }

    /// One BatchWriteItem call plus re-sends of unprocessed items
    async fn put_chunk(&self, records: &[MetadataRecord]) -> Result<()> {
        let mut writes = Vec::with_capacity(records.len());
        for record in records {
            let put = PutRequest::builder()
                .set_item(Some(to_item(record)?))
                .build()
                .map_err(|e| AppError::metadata(format!("Invalid put request: {}", e)))?;
            writes.push(WriteRequest::builder().put_request(put).build());
        }

        let mut request_items = HashMap::from([(self.table.clone(), writes)]);

        for round in 0..MAX_UNPROCESSED_ROUNDS {
            let output = self
                .client
                .batch_write_item()
                .set_request_items(Some(request_items))
                .send()
                .await
                .map_err(|e| {
                    AppError::metadata(format!("Batch write failed: {}", DisplayErrorContext(&e)))
                })?;

            match output.unprocessed_items {
                Some(unprocessed) if !unprocessed.is_empty() => {
                    debug!(round, "Re-sending unprocessed items");
                    request_items = unprocessed;
                }
                _ => return Ok(()),
            }
        }

        Err(AppError::metadata(
            "Batch write left items unprocessed after repeated attempts",
        ))
    }
}

#[async_trait]
impl MetadataStore for DynamoStore {
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(id)))
            .send()
            .await
            .map_err(|e| AppError::metadata(format!("Get failed: {}", DisplayErrorContext(&e))))?;

        output.item.map(from_item).transpose()
    }

    async fn batch_get(&self, ids: &[String]) -> Result<Vec<MetadataRecord>> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = ids.chunks(self.batch_get_size).map(|chunk| self.get_chunk(chunk));
        let results = try_join_all(chunks).await?;

        Ok(results.into_iter().flatten().collect())
    }

    async fn put(&self, record: MetadataRecord) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(&record)?))
            .send()
            .await
            .map_err(|e| AppError::metadata(format!("Put failed: {}", DisplayErrorContext(&e))))?;

        Ok(())
    }

    async fn batch_put(&self, records: Vec<MetadataRecord>) -> Result<()> {
        for chunk in records.chunks(self.batch_write_size) {
            self.put_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(id)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| {
                AppError::metadata(format!("Delete failed: {}", DisplayErrorContext(&e)))
            })?;

        Ok(output.attributes.is_some())
    }

    async fn scan(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage> {
        let mut request = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(page.limit.clamp(1, i32::MAX as usize) as i32);

        if let Some(token) = &page.next_token {
            request = request.set_exclusive_start_key(Some(Self::key(&decode_token(token)?)));
        }

        // `language` and `type` are DynamoDB reserved words
        let mut conditions = Vec::new();
        if let Some(language) = &filter.language {
            conditions.push("#language = :language");
            request = request
                .expression_attribute_names("#language", "language")
                .expression_attribute_values(":language", AttributeValue::S(language.clone()));
        }
        if let Some(kind) = &filter.kind {
            conditions.push("#type = :type");
            request = request
                .expression_attribute_names("#type", "type")
                .expression_attribute_values(":type", AttributeValue::S(kind.clone()));
        }
        if !conditions.is_empty() {
            request = request.filter_expression(conditions.join(" AND "));
        }

        let output = request
            .send()
            .await
            .map_err(|e| AppError::metadata(format!("Scan failed: {}", DisplayErrorContext(&e))))?;

        let records = readable_records(output.items.unwrap_or_default());

        let next_token = output
            .last_evaluated_key
            .as_ref()
            .and_then(|key| key.get("id"))
            .and_then(|id| id.as_s().ok())
            .map(|id| encode_token(id));

        Ok(ScanPage { records, next_token })
    }
}

/// Serialize a record into a DynamoDB item
fn to_item(record: &MetadataRecord) -> Result<Item> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| (key, to_attribute(value)))
            .collect()),
        _ => Err(AppError::Internal {
            message: "Metadata record did not serialize to an object".to_string(),
        }),
    }
}

/// Records for the items that deserialize. An unreadable item is skipped
/// as if it were absent, so callers treat its id as a metadata miss.
fn readable_records(items: Vec<Item>) -> Vec<MetadataRecord> {
    items
        .into_iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(|v| v.as_s().ok()).cloned();
            match from_item(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(id = ?id, error = %e, "Skipping unreadable metadata item");
                    None
                }
            }
        })
        .collect()
}

/// Deserialize a DynamoDB item into a record
fn from_item(item: Item) -> Result<MetadataRecord> {
    let map: Map<String, Value> = item
        .into_iter()
        .map(|(key, value)| (key, from_attribute(value)))
        .collect();
    serde_json::from_value(Value::Object(map))
        .map_err(|e| AppError::metadata(format!("Unreadable metadata item: {}", e)))
}

fn to_attribute(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(values) => AttributeValue::L(values.into_iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.into_iter()
                .map(|(key, value)| (key, to_attribute(value)))
                .collect(),
        ),
    }
}

fn from_attribute(attribute: AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(s) => Value::String(s),
        AttributeValue::N(n) => parse_number(&n),
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(values) => Value::Array(values.into_iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, from_attribute(value)))
                .collect(),
        ),
        AttributeValue::Ss(values) => Value::Array(values.into_iter().map(Value::String).collect()),
        AttributeValue::Ns(values) => Value::Array(values.iter().map(|n| parse_number(n)).collect()),
        _ => Value::Null,
    }
}

fn parse_number(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::Number(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
