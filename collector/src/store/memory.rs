use super::{ConnectionError, Connector, FeedbackStore, StoreError};
use crate::types::{FeedbackRecord, NewFeedback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local store. Used for development setups and tests.
#[derive(Default)]
pub struct MemoryStore {
    // Kept in insertion order
    records: RwLock<Vec<FeedbackRecord>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn latest_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let records = self.records.read();
        Ok(records
            .iter()
            .filter(|r| r.client_id.as_deref() == Some(client_id) && r.timestamp > since)
            .map(|r| r.timestamp)
            .max())
    }

    async fn insert(&self, feedback: NewFeedback) -> Result<FeedbackRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = feedback.into_record(format!("{id:024x}"));
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError> {
        let records = self.records.read();
        // Start from the newest insertion so equal timestamps stay newest first
        // after the stable sort.
        let mut newest_first: Vec<FeedbackRecord> = records.iter().rev().cloned().collect();
        newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        newest_first.truncate(limit);
        Ok(newest_first)
    }
}

/// Hands out the same `MemoryStore` on every connect.
#[derive(Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        MemoryConnector { store }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn describe(&self) -> String {
        "memory".into()
    }

    async fn connect(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError> {
        Ok(self.store.clone())
    }
}
