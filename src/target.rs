//! Test targets and the package records they are derived from.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which underlying test command a target uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Lightweight runner (`npm test`).
    Npm,
    /// Heavier, IDE-hosted runner (`apm test`).
    Apm,
}

impl RunnerKind {
    /// Returns the runner name as used in commands and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Npm => "npm",
            RunnerKind::Apm => "apm",
        }
    }

    /// Directory that must exist for the runner to have anything to run.
    ///
    /// `apm test` exits with an error when there is no `spec` directory, so
    /// its absence means an empty suite rather than a failure.
    pub fn marker_dir(&self) -> Option<&'static str> {
        match self {
            RunnerKind::Npm => None,
            RunnerKind::Apm => Some("spec"),
        }
    }

    /// Whether this runner is known to crash transiently.
    pub fn crashes_transiently(&self) -> bool {
        matches!(self, RunnerKind::Apm)
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package record as produced by package discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageConfig {
    pub package_root_absolute_path: PathBuf,
    pub name: String,
    pub test_runner: RunnerKind,
    #[serde(default)]
    pub exclude_tests_from_continuous_integration: bool,
    #[serde(default)]
    pub tests_cannot_be_run_in_parallel: bool,
}

/// One runnable unit of tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTarget {
    runner_kind: RunnerKind,
    working_dir: PathBuf,
    display_name: String,
    allow_parallel: bool,
    skip_in_ci: bool,
}

impl TestTarget {
    /// Creates a parallel-safe target that is not skipped in CI.
    pub fn new(
        runner_kind: RunnerKind,
        working_dir: impl Into<PathBuf>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            runner_kind,
            working_dir: working_dir.into(),
            display_name: display_name.into(),
            allow_parallel: true,
            skip_in_ci: false,
        }
    }

    /// Marks the target as unsafe to run alongside others.
    pub fn serial_only(mut self) -> Self {
        self.allow_parallel = false;
        self
    }

    /// Marks the target as excluded from CI runs.
    pub fn skipped_in_ci(mut self) -> Self {
        self.skip_in_ci = true;
        self
    }

    pub fn runner_kind(&self) -> RunnerKind {
        self.runner_kind
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn allow_parallel(&self) -> bool {
        self.allow_parallel
    }

    pub fn skip_in_ci(&self) -> bool {
        self.skip_in_ci
    }
}

impl From<PackageConfig> for TestTarget {
    fn from(config: PackageConfig) -> Self {
        let mut target = Self::new(
            config.test_runner,
            config.package_root_absolute_path,
            config.name,
        );
        if config.tests_cannot_be_run_in_parallel {
            target = target.serial_only();
        }
        if config.exclude_tests_from_continuous_integration {
            target = target.skipped_in_ci();
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_config_parses_discovery_record() {
        let json = r#"{
            "packageRootAbsolutePath": "/repo/pkg/pkg-a",
            "name": "pkg-a",
            "testRunner": "apm",
            "excludeTestsFromContinuousIntegration": false,
            "testsCannotBeRunInParallel": true
        }"#;
        let config: PackageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "pkg-a");
        assert_eq!(config.test_runner, RunnerKind::Apm);
        assert!(config.tests_cannot_be_run_in_parallel);

        let target = TestTarget::from(config);
        assert_eq!(target.working_dir(), Path::new("/repo/pkg/pkg-a"));
        assert!(!target.allow_parallel());
        assert!(!target.skip_in_ci());
    }

    #[test]
    fn package_config_flags_default_to_false() {
        let json = r#"{"packageRootAbsolutePath": "/p", "name": "p", "testRunner": "npm"}"#;
        let target = TestTarget::from(serde_json::from_str::<PackageConfig>(json).unwrap());
        assert!(target.allow_parallel());
        assert!(!target.skip_in_ci());
    }

    #[test]
    fn ci_exclusion_carries_into_target() {
        let json = r#"{"packageRootAbsolutePath": "/p", "name": "p", "testRunner": "npm",
            "excludeTestsFromContinuousIntegration": true}"#;
        let target = TestTarget::from(serde_json::from_str::<PackageConfig>(json).unwrap());
        assert!(target.skip_in_ci());
        assert!(target.allow_parallel());
    }

    #[test]
    fn unknown_runner_is_rejected() {
        let json = r#"{"packageRootAbsolutePath": "/p", "name": "p", "testRunner": "yarn"}"#;
        assert!(serde_json::from_str::<PackageConfig>(json).is_err());
    }

    #[test]
    fn only_apm_has_marker_and_crashes() {
        assert_eq!(RunnerKind::Apm.marker_dir(), Some("spec"));
        assert_eq!(RunnerKind::Npm.marker_dir(), None);
        assert!(RunnerKind::Apm.crashes_transiently());
        assert!(!RunnerKind::Npm.crashes_transiently());
    }
}
