//! Single-target test runner with transient-crash retry.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::retry::is_retryable;
use crate::target::TestTarget;

/// Final verdict of a target that did not fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The runner exited zero.
    Passed,
    /// The runner's marker directory is absent; nothing to run.
    NoTests,
    /// The runner failed but `continue_on_errors` downgraded it to a log line.
    FailureSuppressed { exit_code: i32 },
}

/// Runs one target to a final verdict.
#[derive(Clone)]
pub struct TestRunner {
    executor: Arc<dyn CommandExecutor>,
    retry_delay: Duration,
}

impl TestRunner {
    /// Creates a runner that waits `retry_delay` before retrying a crash.
    pub fn new(executor: Arc<dyn CommandExecutor>, retry_delay: Duration) -> Self {
        Self {
            executor,
            retry_delay,
        }
    }

    /// Runs `target`, retrying at most once on a recognized transient crash.
    ///
    /// Launch failures always propagate. A test failure propagates as
    /// [`Error::TestFailure`] unless `continue_on_errors` is set.
    pub async fn run_one(&self, target: &TestTarget, continue_on_errors: bool) -> Result<Verdict> {
        let runner = target.runner_kind();
        let name = target.display_name();

        if let Some(marker) = runner.marker_dir() {
            if !target.working_dir().join(marker).is_dir() {
                tracing::info!(runner = %runner, target = %name, "NO TESTS TO RUN FOR: {}", name);
                return Ok(Verdict::NoTests);
            }
        }

        let mut retry_used = false;
        loop {
            let result = self.executor.execute(target).await?;

            if result.success() {
                tracing::info!(
                    runner = %runner,
                    target = %name,
                    duration_secs = result.duration_secs(),
                    "TEST PASSED: {}",
                    name
                );
                return Ok(Verdict::Passed);
            }

            let output = result.combined_output();
            tracing::error!(
                runner = %runner,
                target = %name,
                exit_code = result.exit_code,
                "TEST FAILED: {} (exit code: {})\nstdout:\n{}",
                name,
                result.exit_code,
                output
            );

            if !retry_used && runner.crashes_transiently() && is_retryable(&output) {
                tracing::warn!(runner = %runner, target = %name, "RETRYING TEST: {}", name);
                retry_used = true;
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            if continue_on_errors {
                tracing::warn!(
                    runner = %runner,
                    target = %name,
                    exit_code = result.exit_code,
                    "continuing past failed test"
                );
                return Ok(Verdict::FailureSuppressed {
                    exit_code: result.exit_code,
                });
            }

            return Err(Error::TestFailure {
                runner_kind: runner,
                target: name.to_string(),
                exit_code: result.exit_code,
            });
        }
    }
}
