use crate::config::{Config, MAX_LIST_LIMIT};
use crate::connection_cache::ConnectionCache;
use crate::metrics_defs::{LIST_RECORDS, SUBMISSION_ACCEPTED, SUBMISSION_REJECTED};
use crate::store::{ConnectionError, StoreError};
use crate::types::{
    FeedbackKind, FeedbackRecord, FeedbackSchema, NewFeedback, Reaction, SubmissionPayload,
    UNKNOWN_EMPLOYEE,
};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionValidationError {
    #[error("rating is required")]
    MissingRating,

    #[error("rating must be an integer from 1 to 5")]
    InvalidRating,

    #[error("type is required")]
    MissingReaction,

    #[error("type must be \"like\" or \"dislike\"")]
    InvalidReaction,

    #[error("{0} is not accepted by this deployment")]
    UnexpectedField(&'static str),

    #[error("clientId is required")]
    MissingClientId,
}

#[derive(thiserror::Error, Debug)]
pub enum SubmissionError {
    #[error("{0}")]
    Validation(#[from] SubmissionValidationError),

    #[error("feedback from this device was already received, please wait before sending more")]
    RateLimited { retry_after: Duration },

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    #[error("{0}")]
    Storage(#[from] StoreError),
}

impl SubmissionError {
    /// Short label used for metrics tags.
    pub fn reason(&self) -> &'static str {
        match self {
            SubmissionError::Validation(_) => "validation",
            SubmissionError::RateLimited { .. } => "rate_limited",
            SubmissionError::Connection(_) => "connection",
            SubmissionError::Storage(_) => "storage",
        }
    }
}

/// Admission control in front of the store: validates submissions, throttles
/// repeat submissions per client, persists accepted records and serves the
/// bounded listing.
///
/// Throttling is a read followed by a write without a lock, so two submissions
/// from the same client racing each other can both be accepted.
pub struct SubmissionGate {
    connections: Arc<ConnectionCache>,
    schema: FeedbackSchema,
    window: Option<TimeDelta>,
    list_limit: usize,
}

impl SubmissionGate {
    pub fn new(
        connections: Arc<ConnectionCache>,
        schema: FeedbackSchema,
        window: Option<Duration>,
        list_limit: usize,
    ) -> Self {
        SubmissionGate {
            connections,
            schema,
            window: window.map(|w| TimeDelta::from_std(w).unwrap_or(TimeDelta::MAX)),
            list_limit: list_limit.clamp(1, MAX_LIST_LIMIT),
        }
    }

    pub fn from_config(connections: Arc<ConnectionCache>, config: &Config) -> Self {
        Self::new(
            connections,
            config.schema,
            config.rate_limit.window(),
            config.list_limit,
        )
    }

    /// Checks a raw payload without touching the store.
    pub fn validate(
        &self,
        payload: &SubmissionPayload,
        now: DateTime<Utc>,
    ) -> Result<NewFeedback, SubmissionValidationError> {
        let kind = match self.schema {
            FeedbackSchema::Rating => {
                if payload.reaction.is_some() {
                    return Err(SubmissionValidationError::UnexpectedField("type"));
                }
                FeedbackKind::Rating {
                    rating: parse_rating(payload.rating.as_ref())?,
                }
            }
            FeedbackSchema::Reaction => {
                if payload.rating.is_some() {
                    return Err(SubmissionValidationError::UnexpectedField("rating"));
                }
                FeedbackKind::Reaction {
                    reaction: parse_reaction(payload.reaction.as_ref())?,
                }
            }
        };

        let client_id = non_blank(payload.client_id.as_deref());
        if self.window.is_some() && client_id.is_none() {
            return Err(SubmissionValidationError::MissingClientId);
        }

        Ok(NewFeedback {
            employee_id: non_blank(payload.employee_id.as_deref())
                .unwrap_or_else(|| UNKNOWN_EMPLOYEE.to_string()),
            client_id,
            kind,
            comment: payload.comment.as_deref().unwrap_or_default().trim().to_string(),
            // The store keeps millisecond precision
            timestamp: now.trunc_subsecs(3),
        })
    }

    pub async fn submit(
        &self,
        payload: SubmissionPayload,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, SubmissionError> {
        let result = self.admit(&payload, now).await;

        match &result {
            Ok(record) => {
                counter!(SUBMISSION_ACCEPTED).increment(1);
                tracing::info!(
                    id = %record.id,
                    employee_id = %record.employee_id,
                    kind = %record.kind,
                    comment_len = record.comment.len(),
                    "Feedback created"
                );
            }
            Err(err) => {
                counter!(SUBMISSION_REJECTED, "reason" => err.reason()).increment(1);
                match err {
                    SubmissionError::Validation(_) | SubmissionError::RateLimited { .. } => {
                        tracing::info!(reason = err.reason(), error = %err, "Feedback rejected");
                    }
                    SubmissionError::Connection(_) | SubmissionError::Storage(_) => {
                        tracing::error!(error = %err, "Failed to store feedback");
                    }
                }
            }
        }

        result
    }

    async fn admit(
        &self,
        payload: &SubmissionPayload,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, SubmissionError> {
        // Window arithmetic must use the same precision as the stored timestamps
        let now = now.trunc_subsecs(3);
        let feedback = self.validate(payload, now)?;
        let store = self.connections.acquire().await?;

        if let (Some(window), Some(client_id)) = (self.window, feedback.client_id.as_deref()) {
            let since = now
                .checked_sub_signed(window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            if let Some(latest) = store.latest_since(client_id, since).await? {
                return Err(SubmissionError::RateLimited {
                    retry_after: retry_after(latest, window, now),
                });
            }
        }

        Ok(store.insert(feedback).await?)
    }

    /// Newest-first snapshot, at most `limit` records and never more than the configured cap.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<FeedbackRecord>, SubmissionError> {
        let limit = limit.map_or(self.list_limit, |l| l.min(self.list_limit));
        let store = self.connections.acquire().await?;

        let records = store.list(limit).await.inspect_err(|err| {
            tracing::error!(error = %err, "Failed to list feedback");
        })?;

        histogram!(LIST_RECORDS).record(records.len() as f64);
        tracing::debug!("Retrieved {} feedback records", records.len());
        Ok(records)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn parse_rating(value: Option<&Value>) -> Result<u8, SubmissionValidationError> {
    let rating = match value {
        None | Some(Value::Null) => return Err(SubmissionValidationError::MissingRating),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(SubmissionValidationError::MissingRating);
        }
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };

    rating
        .filter(|r| (1..=5).contains(r))
        .and_then(|r| u8::try_from(r).ok())
        .ok_or(SubmissionValidationError::InvalidRating)
}

fn parse_reaction(value: Option<&Value>) -> Result<Reaction, SubmissionValidationError> {
    match value {
        None | Some(Value::Null) => Err(SubmissionValidationError::MissingReaction),
        Some(Value::String(s)) => {
            Reaction::parse(s.trim()).ok_or(SubmissionValidationError::InvalidReaction)
        }
        Some(_) => Err(SubmissionValidationError::InvalidReaction),
    }
}

/// Time until the newest submission leaves the window, rounded up to whole seconds.
fn retry_after(latest: DateTime<Utc>, window: TimeDelta, now: DateTime<Utc>) -> Duration {
    let remaining = latest
        .checked_add_signed(window)
        .map(|until| until - now)
        .unwrap_or(window)
        .to_std()
        .unwrap_or(Duration::ZERO);

    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}
