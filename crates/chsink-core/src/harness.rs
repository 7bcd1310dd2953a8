//! Host harness: drives one pipeline over a k6 JSON output stream.
//!
//! Resolve configuration, open the store, start, feed every input sample,
//! stop. The binary is a thin wrapper around [`run_harness`].

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chsink_config::{resolve_config, JsonConfig, SinkConfig};
use chsink_store::MemoryStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::exit_codes::ExitCode;
use crate::ingest::{read_samples, IngestSummary};
use crate::pipeline::{FlushStatsSnapshot, Pipeline};
use crate::run::RunId;

/// Samples per submitted batch unless told otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// JSON configuration layer.
    pub config_path: Option<PathBuf>,
    /// Store URL; beats the JSON layer.
    pub url: Option<String>,
    /// k6 JSON output; stdin when absent.
    pub input: Option<PathBuf>,
    /// Write to an in-memory store instead of ClickHouse.
    pub dry_run: bool,
    pub chunk_size: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            url: None,
            input: None,
            dry_run: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What one harness run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub run_name: String,
    pub ingest: IngestSummary,
    pub flush: FlushStatsSnapshot,
}

impl RunReport {
    pub fn exit_code(&self) -> ExitCode {
        if self.flush.dropped_rows > 0 {
            ExitCode::SamplesDropped
        } else {
            ExitCode::Clean
        }
    }
}

/// Resolve the configuration from an optional file, an optional URL
/// override and an environment snapshot.
pub fn load_config(
    config_path: Option<&Path>,
    url: Option<&str>,
    env: &HashMap<String, String>,
) -> Result<SinkConfig> {
    let json = config_path.map(fs::read).transpose()?;
    let mut config = resolve_config(json.as_deref(), env)?;
    if let Some(url) = url {
        config = config.apply(JsonConfig {
            url: Some(url.to_string()),
            ..JsonConfig::default()
        })?;
        config.validate()?;
    }
    Ok(config)
}

fn open_input(input: Option<&Path>) -> io::Result<Box<dyn BufRead>> {
    Ok(match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    })
}

/// Run the whole lifecycle once.
pub fn run_harness(
    options: &HarnessOptions,
    env: &HashMap<String, String>,
    clock: Arc<dyn Clock>,
) -> Result<RunReport> {
    let config = load_config(options.config_path.as_deref(), options.url.as_deref(), env)?;
    let pipeline = if options.dry_run {
        info!("dry run, samples stay in memory");
        Pipeline::with_store(config, Arc::new(MemoryStore::new()), clock)?
    } else {
        Pipeline::initialize(config, clock)?
    };
    let reader = open_input(options.input.as_deref())?;
    drive(&pipeline, reader, options.chunk_size)
}

/// Start `pipeline`, feed it everything `reader` yields, then stop it.
pub fn drive<R: BufRead>(pipeline: &Pipeline, reader: R, chunk_size: usize) -> Result<RunReport> {
    if let Err(e) = pipeline.start() {
        if let Err(close) = pipeline.stop() {
            warn!(error = %close, "cleanup after failed start");
        }
        return Err(e);
    }

    let ingest = read_samples(reader, chunk_size, |batch| pipeline.submit(batch));
    let stopped = pipeline.stop();
    let ingest = ingest?;
    stopped?;

    let report = RunReport {
        run_id: pipeline.run().id,
        run_name: pipeline.run().name.clone(),
        ingest,
        flush: pipeline.stats(),
    };
    info!(
        run_id = %report.run_id,
        samples = report.ingest.samples,
        malformed = report.ingest.malformed,
        committed_rows = report.flush.committed_rows,
        "input exhausted"
    );
    Ok(report)
}
