//! Document store abstraction. A `Connector` opens a connection and yields a
//! `FeedbackStore` handle that is shared by every request in the process.
use crate::config::{StoreConfig, StoreType, ValidationError};
use crate::types::{FeedbackRecord, NewFeedback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod memory;
pub mod mongo;

pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::MongoConnector;

/// Failure to obtain a live store handle.
///
/// The transport error is kept as a message so one failed attempt can be
/// handed to every caller that was waiting on it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("could not connect to the document store: {0}")]
    Connect(String),

    #[error("the store connection has been closed")]
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Backend(String),

    #[error("stored record {id} is invalid: {reason}")]
    CorruptRecord { id: String, reason: String },
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Timestamp of the newest record submitted by `client_id` strictly after `since`.
    async fn latest_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Persists one record atomically and returns it with its assigned id.
    async fn insert(&self, feedback: NewFeedback) -> Result<FeedbackRecord, StoreError>;

    /// Up to `limit` records, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Where this connector points, safe to log.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError>;
}

/// Selects the connector for the configured store.
pub fn get_connector(config: &StoreConfig) -> Result<Arc<dyn Connector>, ValidationError> {
    match &config.r#type {
        StoreType::Mongodb(mongo) => {
            let uri = mongo.connection_string()?;
            Ok(Arc::new(MongoConnector::new(uri, mongo)))
        }
        StoreType::Memory => {
            tracing::warn!("Using the in-memory store, feedback is lost when the process exits");
            Ok(Arc::new(MemoryConnector::default()))
        }
    }
}
