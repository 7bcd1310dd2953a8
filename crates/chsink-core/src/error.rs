//! Error types for the ingestion pipeline.

use chsink_config::ConfigError;
use chsink_store::StoreError;
use thiserror::Error;

use crate::run::RunId;

/// Errors that stop the pipeline from starting or shutting down cleanly.
///
/// Flush failures are not here: they are logged, counted and the batch is
/// dropped, see [`crate::writer::FlushOutcome`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to connect to store: {0}")]
    Connect(#[source] StoreError),

    #[error("couldn't create table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("couldn't insert run {run_id}: {source}")]
    RunInsert {
        run_id: RunId,
        #[source]
        source: StoreError,
    },

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline already stopped")]
    Stopped,

    #[error("failed to spawn flusher: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to close store: {0}")]
    Close(#[source] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable numeric code for logs and process exit.
    pub fn code(&self) -> u32 {
        match self {
            PipelineError::Config(_) => 10,
            PipelineError::Connect(_) => 20,
            PipelineError::Schema { .. } => 21,
            PipelineError::RunInsert { .. } => 22,
            PipelineError::Close(_) => 23,
            PipelineError::AlreadyStarted => 30,
            PipelineError::Stopped => 31,
            PipelineError::Spawn(_) => 32,
            PipelineError::Io(_) => 60,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
