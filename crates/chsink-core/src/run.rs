//! Run identity.
//!
//! A run is one execution of the load test. Its id is the start time in
//! nanoseconds since the Unix epoch, so ids sort by start time.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Run identifier: start time in Unix nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl RunId {
    /// Derive the id from a start time. Times before 1970 or past 2262 do not
    /// fit in unsigned nanoseconds and clamp to the range ends.
    pub fn from_time(time: DateTime<Utc>) -> Self {
        match time.timestamp_nanos_opt() {
            Some(nanos) => RunId(nanos.max(0) as u64),
            None if time.timestamp() < 0 => RunId(0),
            None => RunId(i64::MAX as u64),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a run time: RFC 3339, UTC, always nine fractional digits.
///
/// Fixed width keeps names sortable as plain strings.
pub fn format_run_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// One execution of the pipeline. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub start_time: DateTime<Utc>,
    pub name: String,
    pub params: String,
}

impl Run {
    /// Build the run for a start time.
    ///
    /// An empty or missing `name_override` gives a timestamp-only name;
    /// otherwise the name is `"<override> <timestamp>"`.
    pub fn new(name_override: Option<&str>, now: DateTime<Utc>, params: impl Into<String>) -> Self {
        let stamp = format_run_time(now);
        let name = match name_override.filter(|n| !n.is_empty()) {
            Some(prefix) => format!("{prefix} {stamp}"),
            None => stamp,
        };
        Self {
            id: RunId::from_time(now),
            start_time: now,
            name,
            params: params.into(),
        }
    }
}
