//! In-memory metadata store.
//!
//! Records live in a `BTreeMap` behind a `tokio::sync::RwLock`, so scans
//! walk ids in a stable order. Batch calls are split exactly like the
//! DynamoDB store and every simulated round trip is counted.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::MetadataRecord;
use super::{
    decode_token, encode_token, unique_ids, MetadataStore, PageRequest, ScanFilter, ScanPage,
    BATCH_GET_LIMIT, BATCH_WRITE_LIMIT,
};
use crate::errors::Result;

#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, MetadataRecord>>,
    batch_get_size: usize,
    batch_write_size: usize,
    round_trips: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_batch_sizes(BATCH_GET_LIMIT, BATCH_WRITE_LIMIT)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_sizes(batch_get_size: usize, batch_write_size: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            batch_get_size: batch_get_size.max(1),
            batch_write_size: batch_write_size.max(1),
            round_trips: AtomicUsize::new(0),
        }
    }

    /// Number of simulated provider round trips so far
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn round_trip(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
        self.round_trip();
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn batch_get(&self, ids: &[String]) -> Result<Vec<MetadataRecord>> {
        let ids = unique_ids(ids);
        let records = self.records.read().await;
        let mut found = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.batch_get_size) {
            self.round_trip();
            found.extend(chunk.iter().filter_map(|id| records.get(id).cloned()));
        }

        Ok(found)
    }

    async fn put(&self, record: MetadataRecord) -> Result<()> {
        self.round_trip();
        self.records
            .write()
            .await
            .insert(record.id().to_string(), record);
        Ok(())
    }

    async fn batch_put(&self, records: Vec<MetadataRecord>) -> Result<()> {
        let mut store = self.records.write().await;
        for chunk in records.chunks(self.batch_write_size) {
            self.round_trip();
            for record in chunk {
                store.insert(record.id().to_string(), record.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.round_trip();
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn scan(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage> {
        self.round_trip();
        let start = match &page.next_token {
            Some(token) => Bound::Excluded(decode_token(token)?),
            None => Bound::Unbounded,
        };
        let limit = page.limit.max(1);

        let store = self.records.read().await;
        let mut matching = store
            .range::<String, _>((start, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| filter.matches(record));

        let records: Vec<MetadataRecord> = matching.by_ref().take(limit).cloned().collect();
        let next_token = match (matching.next(), records.last()) {
            (Some(_), Some(last)) => Some(encode_token(last.id())),
            _ => None,
        };

        Ok(ScanPage { records, next_token })
    }
}
