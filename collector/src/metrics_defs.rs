//! Metrics definitions for the feedback collector.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMISSION_ACCEPTED: MetricDef = MetricDef {
    name: "feedback.submission.accepted",
    metric_type: MetricType::Counter,
    description: "Number of feedback submissions persisted",
};

pub const SUBMISSION_REJECTED: MetricDef = MetricDef {
    name: "feedback.submission.rejected",
    metric_type: MetricType::Counter,
    description: "Number of feedback submissions refused, tagged by reason",
};

pub const LIST_RECORDS: MetricDef = MetricDef {
    name: "feedback.list.records",
    metric_type: MetricType::Histogram,
    description: "Number of records returned by a list call",
};

pub const STORE_CONNECTION_ATTEMPTS: MetricDef = MetricDef {
    name: "store.connection.attempts",
    metric_type: MetricType::Counter,
    description: "Number of document store connection attempts started",
};

pub const STORE_CONNECTION_FAILURES: MetricDef = MetricDef {
    name: "store.connection.failures",
    metric_type: MetricType::Counter,
    description: "Number of document store connection attempts that failed",
};

pub const STORE_CONNECTION_REUSED: MetricDef = MetricDef {
    name: "store.connection.reused",
    metric_type: MetricType::Counter,
    description: "Number of requests served from the cached store connection",
};

pub const STORE_CORRUPT_RECORDS: MetricDef = MetricDef {
    name: "store.records.corrupt",
    metric_type: MetricType::Counter,
    description: "Number of stored records skipped because they could not be read",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SUBMISSION_ACCEPTED,
    SUBMISSION_REJECTED,
    LIST_RECORDS,
    STORE_CONNECTION_ATTEMPTS,
    STORE_CONNECTION_FAILURES,
    STORE_CONNECTION_REUSED,
    STORE_CORRUPT_RECORDS,
];
