use crate::config::{Config, Listener, MAX_LIST_LIMIT, RateLimitConfig, StoreConfig, StoreType};
use crate::store::{ConnectionError, Connector, FeedbackStore, MemoryStore, StoreError};
use crate::types::{FeedbackRecord, FeedbackSchema, NewFeedback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Connector that takes `delay` to connect and fails its first `failures` attempts.
pub struct FakeConnector {
    delay: Duration,
    failures: usize,
    calls: AtomicUsize,
    store: Arc<MemoryStore>,
}

impl FakeConnector {
    pub fn new(delay: Duration, failures: usize) -> Self {
        FakeConnector {
            delay,
            failures,
            calls: AtomicUsize::new(0),
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn describe(&self) -> String {
        "fake".into()
    }

    async fn connect(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if call < self.failures {
            return Err(ConnectionError::Connect("connection refused".into()));
        }
        Ok(self.store.clone())
    }
}

/// Store whose every operation fails, as if the server went away after connecting.
pub struct BrokenStore;

#[async_trait]
impl FeedbackStore for BrokenStore {
    async fn latest_since(
        &self,
        _client_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Err(StoreError::Backend("socket closed".into()))
    }

    async fn insert(&self, _feedback: NewFeedback) -> Result<FeedbackRecord, StoreError> {
        Err(StoreError::Backend("socket closed".into()))
    }

    async fn list(&self, _limit: usize) -> Result<Vec<FeedbackRecord>, StoreError> {
        Err(StoreError::Backend("socket closed".into()))
    }
}

pub struct BrokenConnector;

#[async_trait]
impl Connector for BrokenConnector {
    fn describe(&self) -> String {
        "broken".into()
    }

    async fn connect(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError> {
        Ok(Arc::new(BrokenStore))
    }
}

/// In-memory deployment with every other setting at its default.
pub fn default_test_config() -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".into(),
            port: 5000,
        },
        admin_listener: Listener {
            host: "127.0.0.1".into(),
            port: 5001,
        },
        store: StoreConfig {
            r#type: StoreType::Memory,
        },
        schema: FeedbackSchema::Rating,
        rate_limit: RateLimitConfig::default(),
        list_limit: MAX_LIST_LIMIT,
        cors_allowed_origins: None,
        static_dir: None,
    }
}
