//! Configuration resolution.
//!
//! Precedence (highest first):
//! 1. Environment (`K6_OUT_CLICKHOUSE_*`)
//! 2. JSON document (`{"url": ..., "pushInterval": ...}`)
//! 3. Built-in defaults
//!
//! The environment is passed in as a map so resolution stays a pure function
//! of its inputs.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dsn::{parse_dsn, redact_url};
use crate::duration::parse_duration;
use crate::{env, is_identifier, ConfigError, Result};
use crate::{
    DEFAULT_DATABASE, DEFAULT_PUSH_INTERVAL_SECS, DEFAULT_RUNS_TABLE, DEFAULT_SAMPLES_TABLE,
    DEFAULT_URL,
};

/// Fully resolved sink configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Store address, credentials and driver settings included.
    pub url: String,
    /// Database the tables live in (from the URL path).
    pub database: String,
    /// Time between flushes. Always positive.
    pub push_interval: Duration,
    /// Run name prefix; empty means "timestamp only".
    pub name: String,
    /// Opaque run parameters recorded with the run row.
    pub params: String,
    /// Run-metadata table.
    pub runs_table: String,
    /// Sample table.
    pub samples_table: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            push_interval: Duration::from_secs(DEFAULT_PUSH_INTERVAL_SECS),
            name: String::new(),
            params: String::new(),
            runs_table: DEFAULT_RUNS_TABLE.to_string(),
            samples_table: DEFAULT_SAMPLES_TABLE.to_string(),
        }
    }
}

/// Interval as written in JSON: a duration string or a nanosecond count.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawInterval {
    Nanos(f64),
    Text(String),
}

/// One override layer. Every field is optional; absent fields keep the
/// value from the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub push_interval: Option<RawInterval>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub table_tests: Option<String>,
    #[serde(default)]
    pub table_samples: Option<String>,
}

impl JsonConfig {
    /// Build the environment layer. Empty values count as unset, except for
    /// the interval, where an empty string is a parse error.
    pub fn from_env(vars: &HashMap<String, String>) -> Self {
        let non_empty = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            url: None,
            push_interval: vars
                .get(env::PUSH_INTERVAL)
                .map(|v| RawInterval::Text(v.clone())),
            name: non_empty(env::TEST_NAME),
            params: non_empty(env::PARAMS),
            table_tests: non_empty(env::TABLE_TESTS),
            table_samples: non_empty(env::TABLE_SAMPLES),
        }
    }
}

impl SinkConfig {
    /// Apply a JSON layer on top of this configuration.
    pub fn apply(self, layer: JsonConfig) -> Result<Self> {
        self.merge(layer, "pushInterval")
    }

    fn merge(mut self, layer: JsonConfig, interval_key: &str) -> Result<Self> {
        if let Some(url) = layer.url.filter(|u| !u.is_empty()) {
            let dsn = parse_dsn(&url)?;
            self.url = dsn.url;
            self.database = dsn.database;
        }
        if let Some(raw) = layer.push_interval {
            self.push_interval = interval_from_raw(&raw, interval_key)?;
        }
        if let Some(name) = layer.name {
            self.name = name;
        }
        if let Some(params) = layer.params {
            self.params = params;
        }
        if let Some(table) = layer.table_tests {
            self.runs_table = table;
        }
        if let Some(table) = layer.table_samples {
            self.samples_table = table;
        }
        Ok(self)
    }

    /// Check names that end up inside SQL text.
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("database", &self.database),
            ("runs table", &self.runs_table),
            ("samples table", &self.samples_table),
        ] {
            if !is_identifier(name) {
                return Err(ConfigError::InvalidIdentifier {
                    what,
                    name: name.clone(),
                });
            }
        }
        if self.push_interval.is_zero() {
            return Err(ConfigError::NonPositiveInterval(0));
        }
        Ok(())
    }

    /// The store URL with its password masked.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

fn interval_from_raw(raw: &RawInterval, key: &str) -> Result<Duration> {
    let nanos = match raw {
        RawInterval::Text(text) => {
            parse_duration(text).map_err(|source| ConfigError::InvalidDuration {
                key: key.to_string(),
                source,
            })?
        }
        RawInterval::Nanos(value) => {
            if !value.is_finite() || *value >= i64::MAX as f64 || *value <= i64::MIN as f64 {
                return Err(ConfigError::InvalidDuration {
                    key: key.to_string(),
                    source: crate::DurationError::Overflow(value.to_string()),
                });
            }
            *value as i64
        }
    };
    if nanos <= 0 {
        return Err(ConfigError::NonPositiveInterval(nanos));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Merge defaults, an optional JSON document and the environment.
pub fn resolve_config(json: Option<&[u8]>, vars: &HashMap<String, String>) -> Result<SinkConfig> {
    let mut config = SinkConfig::default();
    if let Some(raw) = json {
        let layer: JsonConfig = serde_json::from_slice(raw)?;
        config = config.apply(layer)?;
    }
    config = config.merge(JsonConfig::from_env(vars), env::PUSH_INTERVAL)?;
    config.validate()?;
    Ok(config)
}
