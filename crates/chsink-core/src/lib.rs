//! chsink core library.
//!
//! Buffered, periodically flushed ingestion of load-test samples into
//! ClickHouse. This crate provides:
//! - Run identity ([`run`]) and tag canonicalization ([`tags`])
//! - Schema bootstrap ([`schema`])
//! - The sample buffer, periodic flusher and batch writer
//! - The [`Pipeline`] lifecycle: initialize, start, submit, stop
//! - The k6 JSON-lines reader and the harness behind the `chsink` binary

pub mod buffer;
pub mod clock;
pub mod error;
pub mod exit_codes;
pub mod flusher;
pub mod harness;
pub mod ingest;
pub mod pipeline;
pub mod run;
pub mod sample;
pub mod schema;
pub mod tags;
pub mod writer;

pub use buffer::SampleBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PipelineError, Result};
pub use exit_codes::ExitCode;
pub use flusher::PeriodicFlusher;
pub use pipeline::{FlushStats, FlushStatsSnapshot, Pipeline};
pub use run::{Run, RunId};
pub use sample::{Sample, Tags};
pub use tags::canonicalize;
pub use writer::{BatchWriter, FlushOutcome, FlushStage, Row};

// Collaborator crates.
pub use chsink_config as config;
pub use chsink_store as store;
