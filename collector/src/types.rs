use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use std::fmt;

pub type RecordId = String;

/// Employee id recorded when a submission names nobody.
pub const UNKNOWN_EMPLOYEE: &str = "unknown";

/// Record shape accepted by a deployment. A deployment accepts exactly one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSchema {
    #[default]
    Rating,
    Reaction,
}

impl FeedbackSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSchema::Rating => "rating",
            FeedbackSchema::Reaction => "reaction",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Reaction::Like),
            "dislike" => Some(Reaction::Dislike),
            _ => None,
        }
    }
}

/// The rated part of a record, discriminated by `kind` on the wire:
/// `{"kind": "rating", "rating": 4}` or `{"kind": "reaction", "type": "like"}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeedbackKind {
    Rating {
        rating: u8,
    },
    Reaction {
        #[serde(rename = "type")]
        reaction: Reaction,
    },
}

impl FeedbackKind {
    pub fn schema(&self) -> FeedbackSchema {
        match self {
            FeedbackKind::Rating { .. } => FeedbackSchema::Rating,
            FeedbackKind::Reaction { .. } => FeedbackSchema::Reaction,
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackKind::Rating { rating } => write!(f, "rating={rating}"),
            FeedbackKind::Reaction { reaction } => write!(f, "type={reaction:?}"),
        }
    }
}

/// A stored feedback record. Records are never modified after creation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub id: RecordId,
    #[serde(rename = "employeeId")]
    pub employee_id: String,
    /// Only used for throttling, never exposed.
    #[serde(skip)]
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub kind: FeedbackKind,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// A validated submission waiting for the store to assign its id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewFeedback {
    pub employee_id: String,
    pub client_id: Option<String>,
    pub kind: FeedbackKind,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

impl NewFeedback {
    pub fn into_record(self, id: RecordId) -> FeedbackRecord {
        FeedbackRecord {
            id,
            employee_id: self.employee_id,
            client_id: self.client_id,
            kind: self.kind,
            comment: self.comment,
            timestamp: self.timestamp,
        }
    }
}

/// Submission body as sent by clients. Nothing here has been validated yet;
/// `rating` and `type` stay loosely typed so bad values become validation
/// errors instead of body parse failures.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubmissionPayload {
    #[serde(rename = "employeeId", default, deserialize_with = "string_or_number")]
    pub employee_id: Option<String>,
    #[serde(rename = "clientId", default, deserialize_with = "string_or_number")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub rating: Option<Value>,
    #[serde(rename = "type", default)]
    pub reaction: Option<Value>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Identifiers are sent as strings by most clients, but numeric ids are
/// accepted and kept in their decimal form.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_record_serialization() {
        let record = FeedbackRecord {
            id: "abc".into(),
            employee_id: "emp-1".into(),
            client_id: Some("device-1".into()),
            kind: FeedbackKind::Rating { rating: 4 },
            comment: "great".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "id": "abc",
                "employeeId": "emp-1",
                "kind": "rating",
                "rating": 4,
                "comment": "great",
                "timestamp": "2026-01-02T03:04:05Z",
            })
        );
    }

    #[test]
    fn test_reaction_serialization() {
        let kind = FeedbackKind::Reaction {
            reaction: Reaction::Dislike,
        };
        assert_eq!(
            serde_json::to_value(kind).unwrap(),
            json!({"kind": "reaction", "type": "dislike"})
        );
        assert_eq!(kind.schema(), FeedbackSchema::Reaction);
    }

    #[test]
    fn test_payload_accepts_loose_values() {
        let payload: SubmissionPayload = serde_json::from_value(json!({
            "clientId": "device-1",
            "rating": "4",
            "comment": null,
        }))
        .unwrap();

        assert_eq!(payload.client_id.as_deref(), Some("device-1"));
        assert_eq!(payload.rating, Some(json!("4")));
        assert_eq!(payload.employee_id, None);
        assert_eq!(payload.comment, None);
    }

    #[test]
    fn test_payload_numeric_identifiers() {
        let payload: SubmissionPayload = serde_json::from_value(json!({
            "employeeId": 123,
            "clientId": 4567,
            "rating": 5,
        }))
        .unwrap();

        assert_eq!(payload.employee_id.as_deref(), Some("123"));
        assert_eq!(payload.client_id.as_deref(), Some("4567"));

        let nested = serde_json::from_value::<SubmissionPayload>(json!({
            "clientId": {"id": 1},
        }));
        assert!(nested.is_err());
    }
}
