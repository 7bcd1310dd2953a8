//! Ingestion pipeline lifecycle.
//!
//! `initialize` resolves the run and opens the store; `start` bootstraps the
//! schema, records the run and launches the flusher; `submit` buffers
//! samples; `stop` drains what is left, stops the flusher and closes the
//! store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chsink_config::SinkConfig;
use chsink_store::{HttpStore, Store};
use serde::Serialize;
use tracing::{info, warn};

use crate::buffer::SampleBuffer;
use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::flusher::PeriodicFlusher;
use crate::run::Run;
use crate::sample::Sample;
use crate::schema::{ensure_schema, insert_run, SchemaNames};
use crate::writer::{BatchWriter, FlushOutcome};

/// Flush counters, updated by the flusher thread.
#[derive(Debug, Default)]
pub struct FlushStats {
    cycles: AtomicU64,
    committed_batches: AtomicU64,
    committed_rows: AtomicU64,
    failed_batches: AtomicU64,
    dropped_rows: AtomicU64,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStatsSnapshot {
    pub cycles: u64,
    pub committed_batches: u64,
    pub committed_rows: u64,
    pub failed_batches: u64,
    pub dropped_rows: u64,
}

impl FlushStats {
    pub fn record(&self, outcome: &FlushOutcome) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        match outcome {
            FlushOutcome::Skipped => {}
            FlushOutcome::Committed { rows, .. } => {
                self.committed_batches.fetch_add(1, Ordering::Relaxed);
                self.committed_rows.fetch_add(*rows as u64, Ordering::Relaxed);
            }
            FlushOutcome::Dropped { rows, .. } => {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.dropped_rows.fetch_add(*rows as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            committed_batches: self.committed_batches.load(Ordering::Relaxed),
            committed_rows: self.committed_rows.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped_rows: self.dropped_rows.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initialized,
    Running,
    Stopped,
}

pub struct Pipeline {
    config: SinkConfig,
    names: SchemaNames,
    run: Arc<Run>,
    store: Arc<dyn Store>,
    buffer: Arc<SampleBuffer>,
    writer: Arc<BatchWriter>,
    stats: Arc<FlushStats>,
    flusher: Mutex<Option<PeriodicFlusher>>,
    state: Mutex<Lifecycle>,
}

impl Pipeline {
    /// Validate `config`, fix the run identity and connect to ClickHouse.
    pub fn initialize(config: SinkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = HttpStore::open(&config.url).map_err(PipelineError::Connect)?;
        Self::with_store(config, Arc::new(store), clock)
    }

    /// Like [`Pipeline::initialize`], over an already open store.
    pub fn with_store(
        config: SinkConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let run = Arc::new(Run::new(
            Some(config.name.as_str()),
            clock.now(),
            config.params.clone(),
        ));
        let names = SchemaNames::from_config(&config);
        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&store),
            &names.samples_table,
            clock,
        ));
        info!(
            run_id = %run.id,
            run_name = %run.name,
            url = %config.redacted_url(),
            "pipeline initialized"
        );
        Ok(Self {
            config,
            names,
            run,
            store,
            buffer: Arc::new(SampleBuffer::new()),
            writer,
            stats: Arc::new(FlushStats::default()),
            flusher: Mutex::new(None),
            state: Mutex::new(Lifecycle::Initialized),
        })
    }

    fn state(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn schema_names(&self) -> &SchemaNames {
        &self.names
    }

    /// Create the schema, record the run and start flushing.
    ///
    /// Nothing is flushed if this fails.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        match *state {
            Lifecycle::Initialized => {}
            Lifecycle::Running => return Err(PipelineError::AlreadyStarted),
            Lifecycle::Stopped => return Err(PipelineError::Stopped),
        }

        ensure_schema(self.store.as_ref(), &self.names)?;
        insert_run(self.store.as_ref(), &self.names.runs_table, &self.run)?;

        let buffer = Arc::clone(&self.buffer);
        let writer = Arc::clone(&self.writer);
        let run = Arc::clone(&self.run);
        let stats = Arc::clone(&self.stats);
        let flusher = PeriodicFlusher::start(self.config.push_interval, move || {
            let outcome = writer.flush(&run, buffer.drain_all());
            stats.record(&outcome);
        })
        .map_err(PipelineError::Spawn)?;

        *self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(flusher);
        *state = Lifecycle::Running;
        info!(
            run_id = %self.run.id,
            interval_ms = self.config.push_interval.as_millis() as u64,
            "pipeline started"
        );
        Ok(())
    }

    /// Hand a batch to the buffer. Never blocks on the store.
    pub fn submit(&self, batch: Vec<Sample>) {
        self.buffer.add(batch);
    }

    /// Samples waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flush what is buffered, stop the flusher and close the store.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state();
        if *state == Lifecycle::Stopped {
            return Ok(());
        }

        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flusher) = flusher {
            flusher.stop();
        }
        let discarded = self.buffer.drain_all().len();
        if discarded > 0 {
            warn!(samples = discarded, "samples left unflushed at stop, discarded");
        }
        *state = Lifecycle::Stopped;

        let stats = self.stats.snapshot();
        info!(
            run_id = %self.run.id,
            committed_rows = stats.committed_rows,
            dropped_rows = stats.dropped_rows,
            failed_batches = stats.failed_batches,
            "pipeline stopped"
        );
        self.store.close().map_err(PipelineError::Close)
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use chsink_store::MemoryStore;
    use std::time::Duration;

    fn config() -> SinkConfig {
        SinkConfig {
            database: "k6".into(),
            push_interval: Duration::from_secs(3600),
            name: "unit".into(),
            ..SinkConfig::default()
        }
    }

    fn pipeline(store: &Arc<MemoryStore>) -> Pipeline {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_669_909_784, 10).unwrap()));
        Pipeline::with_store(config(), store.clone(), clock).unwrap()
    }

    fn sample(n: u32) -> Sample {
        Sample::new("iterations", Utc.timestamp_opt(1_669_909_790, n).unwrap(), 1.0)
    }

    #[test]
    fn second_start_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(&store);
        p.start().unwrap();
        assert!(matches!(p.start(), Err(PipelineError::AlreadyStarted)));
        p.stop().unwrap();
        assert!(matches!(p.start(), Err(PipelineError::Stopped)));
    }

    #[test]
    fn stop_flushes_remaining_samples() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(&store);
        p.start().unwrap();
        p.submit(vec![sample(1), sample(2)]);
        p.stop().unwrap();
        assert_eq!(store.rows("k6.k6_samples").len(), 2);
        assert_eq!(p.stats().committed_rows, 2);
        assert!(store.is_closed());
    }

    #[test]
    fn stop_without_start_discards_and_closes() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(&store);
        p.submit(vec![sample(1)]);
        p.stop().unwrap();
        assert_eq!(p.buffered(), 0);
        assert_eq!(store.counters().begins, 0);
        assert!(store.is_closed());
    }

    #[test]
    fn failed_bootstrap_starts_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.fail_statements_starting_with("CREATE TABLE");
        let p = pipeline(&store);
        assert!(matches!(p.start(), Err(PipelineError::Schema { .. })));
        p.submit(vec![sample(1)]);
        p.stop().unwrap();
        assert_eq!(store.counters().begins, 0);
        assert!(store.rows("k6.k6_tests").is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let bad = SinkConfig {
            samples_table: "bad name".into(),
            ..config()
        };
        assert!(matches!(
            Pipeline::with_store(bad, store, clock),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn stats_count_outcomes() {
        let stats = FlushStats::default();
        stats.record(&FlushOutcome::Skipped);
        stats.record(&FlushOutcome::Committed {
            rows: 4,
            elapsed: Duration::ZERO,
        });
        stats.record(&FlushOutcome::Dropped {
            rows: 3,
            stage: crate::writer::FlushStage::Execute,
            error: chsink_store::StoreError::Closed,
        });
        assert_eq!(
            stats.snapshot(),
            FlushStatsSnapshot {
                cycles: 3,
                committed_batches: 1,
                committed_rows: 4,
                failed_batches: 1,
                dropped_rows: 3,
            }
        );
    }
}
