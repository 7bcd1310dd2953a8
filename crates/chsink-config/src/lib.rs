//! chsink configuration loading and validation.
//!
//! This crate provides:
//! - The resolved [`SinkConfig`] consumed by the ingestion pipeline
//! - Layer resolution (defaults → JSON → environment)
//! - Go-style duration strings (`"10s"`, `"1m30s"`, `"250ms"`)
//! - DSN parsing, database-name extraction and credential redaction

pub mod dsn;
pub mod duration;
pub mod resolve;

pub use dsn::{parse_dsn, redact_url, Dsn};
pub use duration::{parse_duration, DurationError};
pub use resolve::{resolve_config, JsonConfig, SinkConfig};

use thiserror::Error;

/// Default ClickHouse endpoint when nothing else is configured.
pub const DEFAULT_URL: &str =
    "http://localhost:8123/default?dial_timeout=1s&max_execution_time=60";

/// Default push (flush) interval in seconds.
pub const DEFAULT_PUSH_INTERVAL_SECS: u64 = 10;

/// Default database when the DSN path is empty.
pub const DEFAULT_DATABASE: &str = "default";

/// Default run-metadata table.
pub const DEFAULT_RUNS_TABLE: &str = "k6_tests";

/// Default sample table.
pub const DEFAULT_SAMPLES_TABLE: &str = "k6_samples";

/// Environment keys understood by the resolver.
pub mod env {
    pub const PUSH_INTERVAL: &str = "K6_OUT_CLICKHOUSE_PUSH_INTERVAL";
    pub const TEST_NAME: &str = "K6_OUT_CLICKHOUSE_TESTNAME";
    pub const PARAMS: &str = "K6_OUT_CLICKHOUSE_PARAMS";
    pub const TABLE_TESTS: &str = "K6_OUT_CLICKHOUSE_TABLE_TESTS";
    pub const TABLE_SAMPLES: &str = "K6_OUT_CLICKHOUSE_TABLE_SAMPLES";
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("problem unmarshalling JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid {key}: {source}")]
    InvalidDuration {
        key: String,
        #[source]
        source: DurationError,
    },

    #[error("push interval must be positive, got {0}ns")]
    NonPositiveInterval(i64),

    #[error("invalid {what} name {name:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier { what: &'static str, name: String },
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Check that a database or table name is a plain SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
