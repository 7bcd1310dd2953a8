//! Exit codes for the `chsink` binary.
//!
//! Scripts driving a load test can tell a clean run from one that lost
//! samples without parsing logs.

use crate::error::PipelineError;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every sample was committed
    Clean = 0,

    /// Ran to completion but at least one batch was dropped
    SamplesDropped = 1,

    /// Configuration error
    ConfigError = 10,

    /// Store unreachable or schema/run bootstrap failed
    StoreError = 11,

    /// Lifecycle misuse or flusher failure
    LifecycleError = 12,

    /// I/O error reading input
    IoError = 13,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&PipelineError> for ExitCode {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Config(_) => ExitCode::ConfigError,
            PipelineError::Connect(_)
            | PipelineError::Schema { .. }
            | PipelineError::RunInsert { .. }
            | PipelineError::Close(_) => ExitCode::StoreError,
            PipelineError::AlreadyStarted | PipelineError::Stopped | PipelineError::Spawn(_) => {
                ExitCode::LifecycleError
            }
            PipelineError::Io(_) => ExitCode::IoError,
        }
    }
}
