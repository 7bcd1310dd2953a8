//! Samples as delivered by the load generator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag set of a sample. Ordered by key; canonical rendering sorts on its own.
pub type Tags = BTreeMap<String, String>;

/// One observed metric data point. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub time: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

impl Sample {
    pub fn new(metric: impl Into<String>, time: DateTime<Utc>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            time,
            value,
            tags: Tags::new(),
        }
    }

    /// Builder-style tag insertion.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Tag value, or `""` when the tag is absent.
    pub fn tag(&self, key: &str) -> &str {
        self.tags.get(key).map_or("", String::as_str)
    }
}
