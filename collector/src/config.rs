use crate::types::FeedbackSchema;
use axum::http::HeaderValue;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted when the store config carries no connection string.
pub const MONGO_URI_ENV: &str = "MONGO_URI";

/// Upper bound on the number of records a single list call returns.
pub const MAX_LIST_LIMIT: usize = 1000;

const MIN_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const MAX_RATE_LIMIT_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("no document store connection string: set store.uri or the MONGO_URI environment variable")]
    MissingConnectionString,

    #[error("Empty {0} name")]
    EmptyName(&'static str),

    #[error("rate limit window of {0}s is below the minimum of {min}s", min = MIN_RATE_LIMIT_WINDOW_SECS)]
    RateLimitWindowTooShort(u64),

    #[error("rate limit window of {0}s exceeds the maximum of {max}s", max = MAX_RATE_LIMIT_WINDOW_SECS)]
    RateLimitWindowTooLong(u64),

    #[error("list_limit must be between 1 and {max}, got {0}", max = MAX_LIST_LIMIT)]
    InvalidListLimit(usize),

    #[error("invalid CORS origin: {0:?}")]
    InvalidCorsOrigin(String),
}

/// Network listener configuration
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 5000,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 5001,
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct MongoConfig {
    /// Connection string. Falls back to `MONGO_URI` when unset.
    pub uri: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database() -> String {
    "feedback".into()
}

fn default_collection() -> String {
    "feedbacks".into()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl MongoConfig {
    /// Resolves the connection string from the config file or the environment.
    pub fn connection_string(&self) -> Result<String, ValidationError> {
        self.connection_string_with(std::env::var(MONGO_URI_ENV).ok())
    }

    fn connection_string_with(&self, env_value: Option<String>) -> Result<String, ValidationError> {
        self.uri
            .clone()
            .or(env_value)
            .map(|uri| uri.trim().to_string())
            .filter(|uri| !uri.is_empty())
            .ok_or(ValidationError::MissingConnectionString)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Mongodb(MongoConfig),
    /// Process-local store, records do not survive a restart.
    Memory,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub r#type: StoreType,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60 * 60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: default_rate_limit_enabled(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    /// The submission window, or `None` when throttling is switched off.
    pub fn window(&self) -> Option<Duration> {
        self.enabled.then(|| Duration::from_secs(self.window_secs))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled {
            return Ok(());
        }
        if self.window_secs < MIN_RATE_LIMIT_WINDOW_SECS {
            return Err(ValidationError::RateLimitWindowTooShort(self.window_secs));
        }
        if self.window_secs > MAX_RATE_LIMIT_WINDOW_SECS {
            return Err(ValidationError::RateLimitWindowTooLong(self.window_secs));
        }
        Ok(())
    }
}

fn default_list_limit() -> usize {
    MAX_LIST_LIMIT
}

/// Feedback collector configuration
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// Listener for the feedback API
    #[serde(default = "default_listener")]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    pub store: StoreConfig,
    /// Which record shape this deployment accepts
    #[serde(default)]
    pub schema: FeedbackSchema,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    /// Origins allowed by CORS. Any origin is allowed when unset.
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Directory served for paths that are not API routes.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Validates the collector configuration, including that a connection
    /// string can be resolved, so that a misconfigured process never serves.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.rate_limit.validate()?;

        if self.list_limit == 0 || self.list_limit > MAX_LIST_LIMIT {
            return Err(ValidationError::InvalidListLimit(self.list_limit));
        }

        if let StoreType::Mongodb(mongo) = &self.store.r#type {
            if mongo.database.is_empty() {
                return Err(ValidationError::EmptyName("database"));
            }
            if mongo.collection.is_empty() {
                return Err(ValidationError::EmptyName("collection"));
            }
            mongo.connection_string()?;
        }

        for origin in self.cors_allowed_origins.iter().flatten() {
            if origin.is_empty() || HeaderValue::from_str(origin).is_err() {
                return Err(ValidationError::InvalidCorsOrigin(origin.clone()));
            }
        }

        Ok(())
    }
}
