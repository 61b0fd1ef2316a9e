//! Error types for suite-conductor.

use std::path::PathBuf;
use thiserror::Error;

use crate::target::RunnerKind;

/// Top-level error type for test orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// A test target exited non-zero and the failure was not suppressed.
    #[error("TEST FAILED: {runner_kind} test {target} (exit code: {exit_code})")]
    TestFailure {
        runner_kind: RunnerKind,
        target: String,
        exit_code: i32,
    },

    /// The test command could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more requested package or test names do not exist.
    #[error("{} are not valid test targets", .0.join(","))]
    InvalidTargetName(Vec<String>),

    /// Failed to snapshot the integration test directory.
    #[error("failed to snapshot {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    /// Failed to restore the integration test directory from its snapshot.
    #[error("failed to restore {path} from snapshot: {reason}")]
    Restore { path: PathBuf, reason: String },

    /// IO error during orchestration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A parallel worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    WorkerPanic(String),
}

impl Error {
    /// Returns true for failures that `continue_on_errors` is allowed to downgrade.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Error::TestFailure { .. })
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
