//! Suite Conductor - test orchestration for multi-package repositories
//!
//! Runs each package's unit tests with bounded parallelism, retries known
//! transient crashes of the IDE-hosted runner once, and replays the
//! repository-wide integration suite one file at a time with guaranteed
//! restoration of the test directory.

pub mod config;
pub mod error;
pub mod executor;
pub mod harness;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::{
    CommandSpec, Commands, HeavySchedule, PackageManifest, RunOptions, Settings, Validate,
    ValidationResult,
};
pub use error::{Error, Result};
pub use executor::{CommandExecutor, ExecutionResult, ProcessExecutor};
pub use harness::{IntegrationHarness, IntegrationSnapshot, SuiteReport};
pub use retry::is_retryable;
pub use runner::{TestRunner, Verdict};
pub use scheduler::{RunSummary, Scheduler, SchedulingPlan};
pub use target::{PackageConfig, RunnerKind, TestTarget};
