//! Subprocess execution for test runners.
//!
//! Launches a runner in the target's working directory, merges stdout and
//! stderr, and forwards every line to the log as it arrives.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::{CommandSpec, Commands};
use crate::error::{Error, Result};
use crate::target::TestTarget;

/// Outcome of one runner invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Process exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Merged stdout and stderr, in arrival order.
    pub output: Vec<String>,
    /// Wall-clock time from launch to exit.
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// Captured output joined into a single string.
    pub fn combined_output(&self) -> String {
        self.output.join("\n")
    }
}

/// Runs a test target's command to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Executes the runner for `target` and waits for it to exit.
    ///
    /// Fails only if the command could not be launched or waited on; a
    /// non-zero exit is reported through [`ExecutionResult::exit_code`].
    async fn execute(&self, target: &TestTarget) -> Result<ExecutionResult>;
}

/// Executor that spawns real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    commands: Commands,
}

impl ProcessExecutor {
    /// Creates an executor invoking `npm test` and `apm test`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor with custom per-kind commands.
    pub fn with_commands(commands: Commands) -> Self {
        Self { commands }
    }

    fn command_for(&self, target: &TestTarget) -> &CommandSpec {
        self.commands.for_kind(target.runner_kind())
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, target: &TestTarget) -> Result<ExecutionResult> {
        let spec = self.command_for(target);
        let runner = target.runner_kind();
        let name = target.display_name();

        tracing::info!(
            runner = %runner,
            target = %name,
            working_dir = ?target.working_dir(),
            "running `{} test`",
            runner
        );

        let start = Instant::now();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(target.working_dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| Error::Launch {
                program: spec.program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Launch {
                program: spec.program.clone(),
                source: std::io::Error::other("child output was not piped"),
            });
        };

        // Each stream keeps its own partial-line buffer so a read interrupted by
        // the other branch of the select resumes where it stopped.
        let mut stdout = Some(BufReader::new(stdout));
        let mut stderr = Some(BufReader::new(stderr));
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut output = Vec::new();

        // Both pipes are drained to EOF; stopping early would let the child
        // block on a full pipe and never exit.
        while stdout.is_some() || stderr.is_some() {
            let (from_stdout, read) = tokio::select! {
                read = read_line(&mut stdout, &mut stdout_buf), if stdout.is_some() => (true, read),
                read = read_line(&mut stderr, &mut stderr_buf), if stderr.is_some() => (false, read),
            };
            let buf = if from_stdout {
                &mut stdout_buf
            } else {
                &mut stderr_buf
            };

            let closed = match read {
                Ok(true) => {
                    let line = take_line(buf);
                    tracing::info!(runner = %runner, target = %name, "{}", line);
                    output.push(line);
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    tracing::warn!(runner = %runner, target = %name, error = %e, "error reading test output");
                    true
                }
            };

            if closed {
                if !buf.is_empty() {
                    let line = take_line(buf);
                    tracing::info!(runner = %runner, target = %name, "{}", line);
                    output.push(line);
                }
                // Dropping a reader closes its pipe, so the child cannot block on it.
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
            }
        }

        let status = child.wait().await?;

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            output,
            duration: start.elapsed(),
        })
    }
}

/// Reads up to and including the next newline into `buf`.
///
/// Returns `false` at end of stream. Bytes are kept raw so output that is not
/// valid UTF-8 is still consumed.
async fn read_line<R>(reader: &mut Option<R>, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(reader) => Ok(reader.read_until(b'\n', buf).await? > 0),
        None => Ok(false),
    }
}

/// Decodes a buffered line lossily, without its line terminator, and clears
/// the buffer.
fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    line
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::target::RunnerKind;
    use crate::testing::LogBuffer;
    use std::time::Duration;

    fn shell_executor(script: &str) -> ProcessExecutor {
        let spec = CommandSpec::new("sh", &["-c", script]);
        ProcessExecutor::with_commands(Commands {
            npm: spec.clone(),
            apm: spec,
        })
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let executor = shell_executor("echo out; echo err 1>&2");
        let target = TestTarget::new(RunnerKind::Npm, std::env::temp_dir(), "pkg");

        let result = executor.execute(&target).await.expect("execute failed");

        assert!(result.success());
        assert!(result.output.contains(&"out".to_string()));
        assert!(result.output.contains(&"err".to_string()));
        assert_eq!(result.output.len(), 2);
    }

    #[tokio::test]
    async fn reports_nonzero_exit_code() {
        let executor = shell_executor("echo failing; exit 3");
        let target = TestTarget::new(RunnerKind::Apm, std::env::temp_dir(), "pkg");

        let result = executor.execute(&target).await.expect("execute failed");

        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.combined_output(), "failing");
    }

    #[tokio::test]
    async fn runs_in_target_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let executor = shell_executor("cat marker.txt");
        let target = TestTarget::new(RunnerKind::Npm, dir.path(), "pkg");

        let result = executor.execute(&target).await.expect("execute failed");

        assert_eq!(result.output, vec!["here".to_string()]);
    }

    #[tokio::test]
    async fn missing_program_is_launch_failure() {
        let spec = CommandSpec::new("/nonexistent/suite-runner-binary", &["test"]);
        let executor = ProcessExecutor::with_commands(Commands {
            npm: spec.clone(),
            apm: spec,
        });
        let target = TestTarget::new(RunnerKind::Npm, std::env::temp_dir(), "pkg");

        let err = executor.execute(&target).await.unwrap_err();

        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn undecodable_and_oversized_output_is_drained() {
        // A byte that is not UTF-8, then a single line larger than the pipe buffer.
        let executor =
            shell_executor("printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; exit 0");
        let target = TestTarget::new(RunnerKind::Npm, std::env::temp_dir(), "pkg");

        let result = tokio::time::timeout(Duration::from_secs(10), executor.execute(&target))
            .await
            .expect("runner output was not drained")
            .expect("execute failed");

        assert!(result.success());
        assert_eq!(result.output.len(), 2);
        assert_eq!(result.output[0], "\u{FFFD}");
        assert_eq!(result.output[1].len(), 300_000);
    }

    #[tokio::test]
    async fn output_lines_are_logged_before_exit() {
        let logs = LogBuffer::default();
        let _guard = logs.capture();
        let executor = shell_executor("echo first-line-marker; sleep 2; echo last-line-marker");
        let target = TestTarget::new(RunnerKind::Npm, std::env::temp_dir(), "pkg");

        // Watches the log while the runner is still sleeping.
        let watch = async {
            for _ in 0..100 {
                let contents = logs.contents();
                if contents.contains("first-line-marker") {
                    return !contents.contains("last-line-marker");
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            false
        };
        let (result, streamed) = tokio::join!(executor.execute(&target), watch);

        assert!(result.expect("execute failed").success());
        assert!(streamed, "first line was not logged while the runner was running");
        let contents = logs.contents();
        assert!(contents.contains("last-line-marker"));
        assert!(contents.contains("target=pkg"));
    }

    #[test]
    fn default_commands_are_runner_test() {
        let executor = ProcessExecutor::new();
        let target = TestTarget::new(RunnerKind::Apm, "/tmp", "pkg");
        let spec = executor.command_for(&target);
        assert_eq!(spec.program, "apm");
        assert_eq!(spec.args, vec!["test".to_string()]);
    }
}
