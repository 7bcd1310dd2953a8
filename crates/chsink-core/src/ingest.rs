//! k6 JSON output reader.
//!
//! k6 `--out json` writes one object per line. `Point` lines carry a sample;
//! `Metric` lines describe a metric and are skipped. Malformed lines are
//! logged and skipped so one bad line doesn't end the run.

use std::collections::BTreeMap;
use std::io::{self, BufRead};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sample::{Sample, Tags};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Line {
    Point { metric: String, data: PointData },
    Metric { metric: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct PointData {
    time: DateTime<Utc>,
    value: f64,
    #[serde(default)]
    tags: Option<BTreeMap<String, serde_json::Value>>,
}

fn tag_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse one line. Blank and non-point lines give `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Sample>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Line>(line)? {
        Line::Point { metric, data } => {
            let tags: Tags = data
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, tag_text(v)))
                .collect();
            Ok(Some(Sample {
                metric,
                time: data.time,
                value: data.value,
                tags,
            }))
        }
        Line::Metric { metric } => {
            debug!(metric = %metric, "metric declaration skipped");
            Ok(None)
        }
        Line::Other => Ok(None),
    }
}

/// Counts from one pass over the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: u64,
    pub samples: u64,
    pub malformed: u64,
    pub batches: u64,
}

/// Read `reader` to the end, handing samples to `submit` in chunks of at
/// most `chunk_size`. The last partial chunk is submitted too, also when
/// the reader fails part way.
///
/// Lines that are not valid UTF-8 count as malformed.
pub fn read_samples<R, F>(mut reader: R, chunk_size: usize, mut submit: F) -> io::Result<IngestSummary>
where
    R: BufRead,
    F: FnMut(Vec<Sample>),
{
    let chunk_size = chunk_size.max(1);
    let mut summary = IngestSummary::default();
    let mut chunk = Vec::with_capacity(chunk_size);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !chunk.is_empty() {
                    summary.batches += 1;
                    submit(chunk);
                }
                return Err(e);
            }
        }
        summary.lines += 1;
        let line_no = summary.lines;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                summary.malformed += 1;
                warn!(line = line_no, error = %e, "skipping input line that is not UTF-8");
                continue;
            }
        };
        match parse_line(line) {
            Ok(Some(sample)) => {
                summary.samples += 1;
                chunk.push(sample);
                if chunk.len() >= chunk_size {
                    summary.batches += 1;
                    submit(std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size)));
                }
            }
            Ok(None) => {}
            Err(e) => {
                summary.malformed += 1;
                warn!(line = line_no, error = %e, "skipping malformed input line");
            }
        }
    }
    if !chunk.is_empty() {
        summary.batches += 1;
        submit(chunk);
    }
    Ok(summary)
}
