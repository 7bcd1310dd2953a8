//! Batch writer.
//!
//! Turns a drained batch into rows and writes them in one transaction:
//! begin, prepare the insert, execute once per row, commit. Any failure
//! rolls back (when a transaction is open) and the whole batch is dropped.
//! Nothing is retried and nothing is re-queued.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chsink_store::{Store, StoreError, Transaction, Value};
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::run::{Run, RunId};
use crate::sample::{Sample, Tags};
use crate::tags::{canonicalize, LABEL_TAG, STATUS_TAG, URL_TAG};

/// Sample-table columns, in insert order.
pub const SAMPLE_COLUMNS: [&str; 10] = [
    "id", "start", "ts", "metric", "url", "label", "status", "name", "tags", "value",
];

/// One persisted sample row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub run_id: RunId,
    pub run_start: DateTime<Utc>,
    pub sample_time: DateTime<Utc>,
    pub metric: String,
    pub url: String,
    pub label: String,
    pub status: String,
    /// Canonical rendering of `tags`.
    pub name: String,
    pub tags: Tags,
    pub value: f64,
}

impl Row {
    /// Combine run metadata with one sample. Missing well-known tags become
    /// empty strings; the full tag set is kept as well, both as a map and in
    /// canonical form.
    pub fn derive(run: &Run, sample: &Sample) -> Self {
        Self {
            run_id: run.id,
            run_start: run.start_time,
            sample_time: sample.time,
            metric: sample.metric.clone(),
            url: sample.tag(URL_TAG).to_string(),
            label: sample.tag(LABEL_TAG).to_string(),
            status: sample.tag(STATUS_TAG).to_string(),
            name: canonicalize(&sample.tags),
            tags: sample.tags.clone(),
            value: sample.value,
        }
    }

    /// Statement parameters, ordered as [`SAMPLE_COLUMNS`].
    pub fn into_params(self) -> [Value; 10] {
        [
            Value::UInt64(self.run_id.0),
            Value::DateTime(self.run_start),
            Value::DateTime(self.sample_time),
            Value::String(self.metric),
            Value::String(self.url),
            Value::String(self.label),
            Value::String(self.status),
            Value::String(self.name),
            Value::Map(self.tags),
            Value::Float64(self.value),
        ]
    }
}

/// Where a flush failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStage {
    Begin,
    Prepare,
    Execute,
    Commit,
}

impl fmt::Display for FlushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushStage::Begin => "begin",
            FlushStage::Prepare => "prepare",
            FlushStage::Execute => "execute",
            FlushStage::Commit => "commit",
        })
    }
}

/// Result of one flush cycle.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was buffered; no transaction was opened.
    Skipped,
    Committed { rows: usize, elapsed: Duration },
    /// The batch was discarded.
    Dropped {
        rows: usize,
        stage: FlushStage,
        error: StoreError,
    },
}

impl FlushOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, FlushOutcome::Committed { .. })
    }
}

pub fn insert_samples_sql(table: &str) -> String {
    format!("INSERT INTO {table} ({})", SAMPLE_COLUMNS.join(", "))
}

pub struct BatchWriter {
    store: Arc<dyn Store>,
    insert_sql: String,
    clock: Arc<dyn Clock>,
}

impl BatchWriter {
    /// `samples_table` is the qualified `database.table` name.
    pub fn new(store: Arc<dyn Store>, samples_table: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            insert_sql: insert_samples_sql(samples_table),
            clock,
        }
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// Write `batch` atomically. Never panics and never returns an error:
    /// failures are logged and reported through the outcome.
    pub fn flush(&self, run: &Run, batch: Vec<Sample>) -> FlushOutcome {
        if batch.is_empty() {
            return FlushOutcome::Skipped;
        }
        let rows = batch.len();
        let started = self.clock.now();

        let mut tx = match self.store.begin() {
            Ok(tx) => tx,
            Err(e) => return dropped(rows, FlushStage::Begin, e),
        };

        if let Err((stage, e)) = write_rows(tx.as_mut(), &self.insert_sql, run, &batch) {
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            return dropped(rows, stage, e);
        }

        if let Err(e) = tx.commit() {
            return dropped(rows, FlushStage::Commit, e);
        }

        let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
        debug!(
            rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "samples committed"
        );
        FlushOutcome::Committed { rows, elapsed }
    }
}

fn write_rows(
    tx: &mut (dyn Transaction + '_),
    sql: &str,
    run: &Run,
    batch: &[Sample],
) -> Result<(), (FlushStage, StoreError)> {
    let mut stmt = tx.prepare(sql).map_err(|e| (FlushStage::Prepare, e))?;
    for sample in batch {
        let params = Row::derive(run, sample).into_params();
        stmt.execute(&params)
            .map_err(|e| (FlushStage::Execute, e))?;
    }
    Ok(())
}

fn dropped(rows: usize, stage: FlushStage, error: StoreError) -> FlushOutcome {
    error!(stage = %stage, rows, error = %error, "flush failed, batch dropped");
    FlushOutcome::Dropped { rows, stage, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use chsink_store::MemoryStore;

    const TABLE: &str = "k6.k6_samples";

    fn run() -> Run {
        Run::new(
            Some("test"),
            Utc.timestamp_opt(1_669_909_784, 10).unwrap(),
            "",
        )
    }

    fn samples(n: u32) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::new("http_reqs", Utc.timestamp_opt(1_669_909_790, i).unwrap(), 1.0)
                    .with_tag("url", format!("/item/{i}"))
            })
            .collect()
    }

    fn writer(store: &Arc<MemoryStore>) -> BatchWriter {
        let clock = ManualClock::new(Utc.timestamp_opt(1_669_909_800, 0).unwrap());
        BatchWriter::new(store.clone(), TABLE, Arc::new(clock))
    }

    #[test]
    fn derive_fills_well_known_columns() {
        let sample = Sample::new("http_req_duration", Utc.timestamp_opt(1_669_909_785, 0).unwrap(), 12.5)
            .with_tag("url", "render")
            .with_tag("label", "1h")
            .with_tag("status", "200")
            .with_tag("method", "GET");
        let row = Row::derive(&run(), &sample);
        assert_eq!(row.run_id, RunId(1_669_909_784_000_000_010));
        assert_eq!(row.url, "render");
        assert_eq!(row.label, "1h");
        assert_eq!(row.status, "200");
        assert_eq!(row.name, "label=1h method=GET status=200 url=render");
        assert_eq!(row.tags.len(), 4);
        assert_eq!(row.value, 12.5);
    }

    #[test]
    fn derive_defaults_missing_tags() {
        let sample = Sample::new("vus", Utc.timestamp_opt(1_669_909_785, 0).unwrap(), 3.0);
        let row = Row::derive(&run(), &sample);
        assert_eq!((row.url.as_str(), row.label.as_str(), row.status.as_str()), ("", "", ""));
        assert_eq!(row.name, "");
        assert!(row.tags.is_empty());
    }

    #[test]
    fn insert_statement_lists_columns() {
        assert_eq!(
            insert_samples_sql(TABLE),
            "INSERT INTO k6.k6_samples (id, start, ts, metric, url, label, status, name, tags, value)"
        );
    }

    #[test]
    fn empty_batch_opens_no_transaction() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(writer(&store).flush(&run(), Vec::new()), FlushOutcome::Skipped));
        assert_eq!(store.counters().begins, 0);
    }

    #[test]
    fn commits_whole_batch() {
        let store = Arc::new(MemoryStore::new());
        let outcome = writer(&store).flush(&run(), samples(3));
        assert!(matches!(outcome, FlushOutcome::Committed { rows: 3, .. }));
        let rows = store.rows(TABLE);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["url"], Value::from("/item/2"));
        assert_eq!(store.counters().commits, 1);
    }

    #[test]
    fn mid_batch_failure_drops_everything() {
        let store = Arc::new(MemoryStore::new());
        store.fail_nth_row(3);
        let w = writer(&store);
        match w.flush(&run(), samples(5)) {
            FlushOutcome::Dropped { rows, stage, .. } => {
                assert_eq!(rows, 5);
                assert_eq!(stage, FlushStage::Execute);
            }
            other => panic!("expected drop, got {other:?}"),
        }
        assert!(store.rows(TABLE).is_empty());
        assert_eq!(store.counters().rollbacks, 1);

        assert!(w.flush(&run(), samples(2)).is_committed());
        assert_eq!(store.rows(TABLE).len(), 2);
    }

    #[test]
    fn begin_prepare_and_commit_failures() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store);

        store.fail_begin(true);
        assert!(matches!(
            w.flush(&run(), samples(1)),
            FlushOutcome::Dropped { stage: FlushStage::Begin, .. }
        ));
        store.clear_faults();

        store.fail_statements_starting_with("INSERT");
        assert!(matches!(
            w.flush(&run(), samples(1)),
            FlushOutcome::Dropped { stage: FlushStage::Prepare, .. }
        ));
        assert_eq!(store.counters().rollbacks, 1);
        store.clear_faults();

        store.fail_commit(true);
        assert!(matches!(
            w.flush(&run(), samples(1)),
            FlushOutcome::Dropped { stage: FlushStage::Commit, .. }
        ));
        assert!(store.rows(TABLE).is_empty());
    }
}
