//! Orchestrator settings, run options and package manifests.
//!
//! Settings come from an optional TOML file; every key has a default. The
//! package manifest is the JSON list of records emitted by package discovery.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::target::{PackageConfig, RunnerKind, TestTarget};

/// Package whose tests live in the repository-wide integration suite.
pub const DEFAULT_AGGREGATE_SUITE: &str = "nuclide";

/// How targets of the heavier runner kind are scheduled outside in-band mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeavySchedule {
    /// Dispatch alongside the lightweight targets on the worker pool.
    #[default]
    Parallel,
    /// Run one at a time after the parallel stage has drained.
    Serial,
}

/// Program and arguments used to invoke a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Default `<runner> test` invocation for a runner kind.
    pub fn default_for(kind: RunnerKind) -> Self {
        Self::new(kind.as_str(), &["test"])
    }
}

/// Per-kind command overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    #[serde(default = "default_npm_command")]
    pub npm: CommandSpec,
    #[serde(default = "default_apm_command")]
    pub apm: CommandSpec,
}

fn default_npm_command() -> CommandSpec {
    CommandSpec::default_for(RunnerKind::Npm)
}

fn default_apm_command() -> CommandSpec {
    CommandSpec::default_for(RunnerKind::Apm)
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            npm: default_npm_command(),
            apm: default_apm_command(),
        }
    }
}

impl Commands {
    pub fn for_kind(&self, kind: RunnerKind) -> &CommandSpec {
        match kind {
            RunnerKind::Npm => &self.npm,
            RunnerKind::Apm => &self.apm,
        }
    }
}

/// Settings loaded from the orchestrator's TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Package excluded from unit runs because the integration harness owns it.
    #[serde(default = "default_aggregate_suite")]
    pub aggregate_suite: String,

    /// Pause before retrying a transient crash.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Scheduling policy for the heavier runner kind.
    #[serde(default)]
    pub heavy_schedule: HeavySchedule,

    /// Worker pool size; `None` sizes the pool from available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub commands: Commands,
}

fn default_aggregate_suite() -> String {
    DEFAULT_AGGREGATE_SUITE.to_string()
}

fn default_retry_delay_secs() -> u64 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aggregate_suite: default_aggregate_suite(),
            retry_delay_secs: default_retry_delay_secs(),
            heavy_schedule: HeavySchedule::default(),
            workers: None,
            commands: Commands::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file and validates them.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parses and validates settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse settings: {}", e)))?;
        for warning in settings.validate().into_result()? {
            tracing::warn!(%warning, "settings warning");
        }
        Ok(settings)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Number of concurrent workers for the parallel stage.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count).max(1)
    }
}

/// One fewer than the available parallelism, never less than one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Per-invocation switches, typically set from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Restrict the run to these package names; empty means all.
    pub packages: Vec<String>,
    /// Include targets of the heavier runner kind.
    pub include_heavy: bool,
    /// Run every bucket sequentially on the calling task.
    pub run_in_band: bool,
    /// Log test failures and keep going instead of aborting.
    pub continue_on_errors: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self {
            include_heavy: true,
            ..Self::default()
        }
    }

    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_include_heavy(mut self, include: bool) -> Self {
        self.include_heavy = include;
        self
    }

    pub fn with_run_in_band(mut self, in_band: bool) -> Self {
        self.run_in_band = in_band;
        self
    }

    pub fn with_continue_on_errors(mut self, continue_on_errors: bool) -> Self {
        self.continue_on_errors = continue_on_errors;
        self
    }
}

/// Package records emitted by package discovery.
#[derive(Debug, Clone, Default)]
pub struct PackageManifest {
    packages: Vec<PackageConfig>,
}

impl PackageManifest {
    /// Loads a manifest from a JSON file containing an array of package records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let packages: Vec<PackageConfig> = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse package manifest: {}", e)))?;
        let manifest = Self { packages };
        for warning in manifest.validate().into_result()? {
            tracing::warn!(%warning, "manifest warning");
        }
        Ok(manifest)
    }

    /// Converts every record into a test target, in discovery order.
    pub fn targets(&self) -> Vec<TestTarget> {
        self.packages.iter().cloned().map(TestTarget::from).collect()
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for Settings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.aggregate_suite.trim().is_empty() {
            result.add_error("aggregate_suite cannot be empty");
        }

        if self.workers == Some(0) {
            result.add_error("workers must be at least 1");
        }

        for kind in [RunnerKind::Npm, RunnerKind::Apm] {
            if self.commands.for_kind(kind).program.trim().is_empty() {
                result.add_error(format!("commands.{} program cannot be empty", kind));
            }
        }

        if self.retry_delay_secs > 60 {
            result.add_warning("retry_delay_secs over a minute will slow down crash recovery");
        }

        result
    }
}

impl Validate for PackageManifest {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut seen = HashSet::new();

        for package in &self.packages {
            if package.name.trim().is_empty() {
                result.add_error(format!(
                    "package at {} has an empty name",
                    package.package_root_absolute_path.display()
                ));
            }
            if !seen.insert(package.name.as_str()) {
                result.add_error(format!("duplicate package name '{}'", package.name));
            }
            if !package.package_root_absolute_path.is_absolute() {
                result.add_warning(format!(
                    "package '{}' root {} is not absolute",
                    package.name,
                    package.package_root_absolute_path.display()
                ));
            }
        }

        result
    }
}
