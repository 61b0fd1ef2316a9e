//! Bucketing and bounded-concurrency execution of test targets.
//!
//! Targets are partitioned into three buckets:
//! - `parallel`: lightweight targets, dispatched on the worker pool
//! - `serial`: heavier targets, pooled or sequential per [`HeavySchedule`]
//! - `serial_only`: targets that cannot share the machine, run last, one at a time

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{HeavySchedule, RunOptions, Settings};
use crate::error::{Error, Result};
use crate::runner::{TestRunner, Verdict};
use crate::target::{RunnerKind, TestTarget};

/// Disjoint buckets of targets that survived filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingPlan {
    pub parallel: Vec<TestTarget>,
    pub serial: Vec<TestTarget>,
    pub serial_only: Vec<TestTarget>,
}

impl SchedulingPlan {
    /// Total number of scheduled targets.
    pub fn len(&self) -> usize {
        self.parallel.len() + self.serial.len() + self.serial_only.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the plan into a pooled stage and a sequential stage.
    pub fn into_stages(
        self,
        run_in_band: bool,
        heavy_schedule: HeavySchedule,
    ) -> (Vec<TestTarget>, Vec<TestTarget>) {
        let SchedulingPlan {
            mut parallel,
            mut serial,
            serial_only,
        } = self;

        if run_in_band {
            parallel.append(&mut serial);
            parallel.extend(serial_only);
            return (Vec::new(), parallel);
        }

        match heavy_schedule {
            HeavySchedule::Parallel => {
                parallel.append(&mut serial);
                (parallel, serial_only)
            }
            HeavySchedule::Serial => {
                serial.extend(serial_only);
                (parallel, serial)
            }
        }
    }
}

/// Tally of verdicts from a scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub no_tests: usize,
    pub suppressed_failures: usize,
}

impl RunSummary {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::NoTests => self.no_tests += 1,
            Verdict::FailureSuppressed { .. } => self.suppressed_failures += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.no_tests + self.suppressed_failures
    }
}

/// Partitions targets and runs them with bounded concurrency.
pub struct Scheduler {
    runner: TestRunner,
    aggregate_suite: String,
    heavy_schedule: HeavySchedule,
    workers: usize,
}

impl Scheduler {
    pub fn new(runner: TestRunner, settings: &Settings) -> Self {
        Self {
            runner,
            aggregate_suite: settings.aggregate_suite.clone(),
            heavy_schedule: settings.heavy_schedule,
            workers: settings.worker_count(),
        }
    }

    /// Overrides the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Filters `targets` and assigns each survivor to exactly one bucket.
    ///
    /// Fails with [`Error::InvalidTargetName`] if `options.packages` names a
    /// package that is not among `targets`.
    pub fn plan(&self, targets: Vec<TestTarget>, options: &RunOptions) -> Result<SchedulingPlan> {
        let known: HashSet<&str> = targets.iter().map(|t| t.display_name()).collect();
        let unknown: Vec<String> = options
            .packages
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidTargetName(unknown));
        }

        let mut plan = SchedulingPlan::default();
        for target in targets {
            let name = target.display_name();

            // The aggregate package is covered by the integration harness.
            if name == self.aggregate_suite {
                continue;
            }
            if target.skip_in_ci() {
                tracing::debug!(target = %name, "excluded from CI");
                continue;
            }
            if target.runner_kind() == RunnerKind::Apm && !options.include_heavy {
                continue;
            }
            if !options.packages.is_empty() && !options.packages.iter().any(|p| p == name) {
                continue;
            }

            if !target.allow_parallel() {
                plan.serial_only.push(target);
            } else if target.runner_kind() == RunnerKind::Npm {
                plan.parallel.push(target);
            } else {
                plan.serial.push(target);
            }
        }

        Ok(plan)
    }

    /// Plans and runs `targets`.
    ///
    /// The pooled stage is joined before the sequential stage starts. Once a
    /// unit fails fatally no further units are dispatched; units already
    /// running are left to finish and the first failure is returned.
    #[tracing::instrument(skip_all, fields(run_id = %uuid::Uuid::new_v4()))]
    pub async fn run_all(&self, targets: Vec<TestTarget>, options: &RunOptions) -> Result<RunSummary> {
        let plan = self.plan(targets, options)?;
        tracing::info!(
            parallel = plan.parallel.len(),
            serial = plan.serial.len(),
            serial_only = plan.serial_only.len(),
            run_in_band = options.run_in_band,
            "scheduled test targets"
        );

        if plan.is_empty() {
            tracing::info!("no test targets to run");
            return Ok(RunSummary::default());
        }

        let (pooled, sequential) = plan.into_stages(options.run_in_band, self.heavy_schedule);
        let mut summary = RunSummary::default();

        if !pooled.is_empty() {
            self.run_pooled(pooled, options.continue_on_errors, &mut summary)
                .await?;
        }

        for target in &sequential {
            let verdict = self.runner.run_one(target, options.continue_on_errors).await?;
            summary.record(verdict);
        }

        tracing::info!(
            passed = summary.passed,
            no_tests = summary.no_tests,
            suppressed_failures = summary.suppressed_failures,
            "test run complete"
        );
        Ok(summary)
    }

    async fn run_pooled(
        &self,
        targets: Vec<TestTarget>,
        continue_on_errors: bool,
        summary: &mut RunSummary,
    ) -> Result<()> {
        tracing::debug!(workers = self.workers, units = targets.len(), "starting worker pool");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let failed = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();

        for target in targets {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::WorkerPanic(e.to_string()))?;

            if failed.load(Ordering::SeqCst) {
                tracing::warn!(target = %target.display_name(), "not dispatching after a fatal failure");
                break;
            }

            let runner = self.runner.clone();
            let failed = Arc::clone(&failed);
            join_set.spawn(
                async move {
                    let result = runner.run_one(&target, continue_on_errors).await;
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    drop(permit);
                    result
                }
                .instrument(tracing::Span::current()),
            );
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined.map_err(|e| Error::WorkerPanic(e.to_string())) {
                Ok(Ok(verdict)) => summary.record(verdict),
                Ok(Err(e)) | Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        tracing::error!(error = %e, "additional failure in worker pool");
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
