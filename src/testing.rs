//! Scripted executor and log capture used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, ExecutionResult};
use crate::target::TestTarget;

/// What a scripted invocation should do.
#[derive(Debug, Clone)]
pub enum Outcome {
    Pass,
    Fail(i32),
    Output(i32, Vec<String>),
    LaunchError,
}

/// Output containing an IDE-host crash banner.
pub fn crash_output(banner: &str) -> Vec<String> {
    vec![
        "Running specs...".to_string(),
        format!("/Applications/Atom.app/atom: line 117: 31337 {}", banner),
    ]
}

type Script = dyn Fn(&TestTarget, usize) -> Outcome + Send + Sync;

/// Executor whose outcomes come from a closure over `(target, call index)`.
pub struct FakeExecutor {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl FakeExecutor {
    pub fn from_fn(script: impl Fn(&TestTarget, usize) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: Outcome) -> Self {
        Self::from_fn(move |_, _| outcome.clone())
    }

    /// Plays `outcomes` in order, repeating the last one once exhausted.
    pub fn sequence(outcomes: Vec<Outcome>) -> Self {
        Self::from_fn(move |_, index| {
            outcomes
                .get(index)
                .or_else(|| outcomes.last())
                .cloned()
                .unwrap_or(Outcome::Pass)
        })
    }

    /// Looks up the outcome by target name, passing unknown targets.
    pub fn by_name(outcomes: HashMap<String, Outcome>) -> Self {
        Self::from_fn(move |target, _| {
            outcomes
                .get(target.display_name())
                .cloned()
                .unwrap_or(Outcome::Pass)
        })
    }

    /// Makes every invocation take `delay` before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    /// Target names in invocation order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, i)| *i).collect()
    }

    /// Invocations that ran to the end of their delay.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of invocations that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, target: &TestTarget) -> Result<ExecutionResult> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((target.display_name().to_string(), Instant::now()));
            calls.len() - 1
        };
        let outcome = (self.script)(target, index);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        let (exit_code, output) = match outcome {
            Outcome::Pass => (0, vec!["ok".to_string()]),
            Outcome::Fail(code) => (code, vec!["1 failure".to_string()]),
            Outcome::Output(code, output) => (code, output),
            Outcome::LaunchError => {
                return Err(Error::Launch {
                    program: "fake".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
                })
            }
        };

        Ok(ExecutionResult {
            exit_code,
            output,
            duration: self.delay,
        })
    }
}

/// In-memory sink for formatted log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Installs a subscriber writing into this buffer as the thread default.
    ///
    /// Only events emitted on the current thread are captured, so callers use
    /// the current-thread test runtime.
    pub fn capture(&self) -> tracing::subscriber::DefaultGuard {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
