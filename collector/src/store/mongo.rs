use super::{ConnectionError, Connector, FeedbackStore, StoreError};
use crate::config::MongoConfig;
use crate::metrics_defs::STORE_CORRUPT_RECORDS;
use crate::types::{
    FeedbackKind, FeedbackRecord, FeedbackSchema, NewFeedback, Reaction, UNKNOWN_EMPLOYEE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use shared::counter;
use shared::redact::redact_credentials;
use std::sync::Arc;
use std::time::Duration;

const APP_NAME: &str = "feedback-collector";

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Feedback as laid out in the collection.
///
/// `kind` is absent on records written before the discriminator existed; for
/// those it is inferred from whichever of `rating`/`type` is set. Early records
/// also used `createdAt` for the creation time.
#[derive(Debug, Serialize, Deserialize)]
struct FeedbackDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[serde(rename = "employeeId", default = "unknown_employee")]
    employee_id: String,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<FeedbackSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rating: Option<i32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    reaction: Option<Reaction>,
    #[serde(default)]
    comment: String,
    #[serde(alias = "createdAt")]
    timestamp: bson::DateTime,
}

fn unknown_employee() -> String {
    UNKNOWN_EMPLOYEE.to_string()
}

impl From<&NewFeedback> for FeedbackDocument {
    fn from(feedback: &NewFeedback) -> Self {
        let (rating, reaction) = match feedback.kind {
            FeedbackKind::Rating { rating } => (Some(i32::from(rating)), None),
            FeedbackKind::Reaction { reaction } => (None, Some(reaction)),
        };

        FeedbackDocument {
            id: None,
            employee_id: feedback.employee_id.clone(),
            client_id: feedback.client_id.clone(),
            kind: Some(feedback.kind.schema()),
            rating,
            reaction,
            comment: feedback.comment.clone(),
            timestamp: bson::DateTime::from_millis(feedback.timestamp.timestamp_millis()),
        }
    }
}

impl TryFrom<FeedbackDocument> for FeedbackRecord {
    type Error = StoreError;

    fn try_from(document: FeedbackDocument) -> Result<Self, Self::Error> {
        let id = document
            .id
            .map(|oid| oid.to_hex())
            .unwrap_or_else(|| "<missing>".into());
        let corrupt = |reason: &str| StoreError::CorruptRecord {
            id: id.clone(),
            reason: reason.to_string(),
        };

        let schema = match (document.kind, document.rating, document.reaction) {
            (Some(schema), _, _) => schema,
            (None, Some(_), None) => FeedbackSchema::Rating,
            (None, None, Some(_)) => FeedbackSchema::Reaction,
            (None, Some(_), Some(_)) => return Err(corrupt("both rating and type are set")),
            (None, None, None) => return Err(corrupt("neither rating nor type is set")),
        };

        let kind = match schema {
            FeedbackSchema::Rating => {
                let rating = document
                    .rating
                    .and_then(|r| u8::try_from(r).ok())
                    .filter(|r| (1..=5).contains(r))
                    .ok_or_else(|| corrupt("rating missing or out of range"))?;
                FeedbackKind::Rating { rating }
            }
            FeedbackSchema::Reaction => {
                let reaction = document
                    .reaction
                    .ok_or_else(|| corrupt("type missing"))?;
                FeedbackKind::Reaction { reaction }
            }
        };

        let timestamp = DateTime::<Utc>::from_timestamp_millis(document.timestamp.timestamp_millis())
            .ok_or_else(|| corrupt("timestamp out of range"))?;

        Ok(FeedbackRecord {
            id,
            employee_id: document.employee_id,
            client_id: document.client_id,
            kind,
            comment: document.comment,
            timestamp,
        })
    }
}

fn bson_time(time: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(time.timestamp_millis())
}

/// Newest first. Legacy documents only carry `createdAt`.
fn list_order() -> bson::Document {
    doc! { "timestamp": -1, "createdAt": -1 }
}

/// Only the creation time of a document, so throttling never depends on the
/// rest of a record being readable.
#[derive(Debug, Deserialize)]
struct SubmissionTime {
    timestamp: bson::DateTime,
}

/// Maps raw documents to records, skipping the ones that cannot be read so a
/// single bad document does not hide the others.
fn records_from(documents: Vec<bson::Document>) -> Vec<FeedbackRecord> {
    documents
        .into_iter()
        .filter_map(|raw| {
            let id = raw
                .get_object_id("_id")
                .map(|oid| oid.to_hex())
                .unwrap_or_else(|_| "<missing>".into());

            let record = bson::from_document::<FeedbackDocument>(raw)
                .map_err(|e| StoreError::CorruptRecord {
                    id,
                    reason: e.to_string(),
                })
                .and_then(FeedbackRecord::try_from);

            match record {
                Ok(record) => Some(record),
                Err(err) => {
                    counter!(STORE_CORRUPT_RECORDS).increment(1);
                    tracing::warn!(error = %err, "Skipping unreadable feedback record");
                    None
                }
            }
        })
        .collect()
}

pub struct MongoFeedbackStore {
    collection: Collection<FeedbackDocument>,
}

#[async_trait]
impl FeedbackStore for MongoFeedbackStore {
    async fn latest_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let filter = doc! {
            "clientId": client_id,
            "timestamp": { "$gt": bson_time(since) },
        };

        let latest = self
            .collection
            .clone_with_type::<SubmissionTime>()
            .find_one(filter)
            .projection(doc! { "timestamp": 1 })
            .sort(doc! { "timestamp": -1 })
            .await?;

        Ok(latest.and_then(|found| {
            DateTime::<Utc>::from_timestamp_millis(found.timestamp.timestamp_millis())
        }))
    }

    async fn insert(&self, feedback: NewFeedback) -> Result<FeedbackRecord, StoreError> {
        let document = FeedbackDocument::from(&feedback);
        let result = self.collection.insert_one(&document).await?;

        let id = match result.inserted_id.as_object_id() {
            Some(oid) => oid.to_hex(),
            None => result.inserted_id.to_string(),
        };

        Ok(feedback.into_record(id))
    }

    async fn list(&self, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError> {
        let cursor = self
            .collection
            .clone_with_type::<bson::Document>()
            .find(doc! {})
            .sort(list_order())
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;

        let documents: Vec<bson::Document> = cursor.try_collect().await?;
        Ok(records_from(documents))
    }
}

pub struct MongoConnector {
    uri: String,
    database: String,
    collection: String,
    connect_timeout: Duration,
}

impl MongoConnector {
    pub fn new(uri: String, config: &MongoConfig) -> Self {
        MongoConnector {
            uri,
            database: config.database.clone(),
            collection: config.collection.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }

    async fn open(&self) -> Result<MongoFeedbackStore, mongodb::error::Error> {
        let mut options = ClientOptions::parse(self.uri.as_str()).await?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);

        let client = Client::with_options(options)?;
        let database = client.database(&self.database);

        // The driver connects lazily, ping so failures surface here
        database.run_command(doc! { "ping": 1 }).await?;

        let collection = database.collection::<FeedbackDocument>(&self.collection);
        collection.create_indexes(feedback_indexes()).await?;

        Ok(MongoFeedbackStore { collection })
    }
}

/// Listing sorts on `timestamp` then `createdAt`, throttling filters on
/// `clientId` then `timestamp`.
fn feedback_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::builder().keys(list_order()).build(),
        IndexModel::builder()
            .keys(doc! { "clientId": 1, "timestamp": -1 })
            .build(),
    ]
}

#[async_trait]
impl Connector for MongoConnector {
    fn describe(&self) -> String {
        redact_credentials(&self.uri)
    }

    async fn connect(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError> {
        let store = self
            .open()
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        Ok(Arc::new(store))
    }
}
