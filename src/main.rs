//! Suite Conductor CLI
//!
//! Runs package unit tests (`unit`) or the repository integration suite
//! (`integration`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use suite_conductor::{
    IntegrationHarness, PackageManifest, ProcessExecutor, Result, RunOptions, Scheduler, Settings,
    TestRunner,
};

#[derive(Parser)]
#[command(name = "suite-conductor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run package test suites in parallel with crash retry", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Orchestrator settings file (TOML)
    #[arg(long, global = true, env = "SUITE_CONFIG")]
    config: Option<PathBuf>,

    /// Log test failures and keep going instead of aborting
    #[arg(long, global = true)]
    continue_on_errors: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the unit tests of every package in the manifest
    Unit {
        /// Package manifest emitted by package discovery (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Only test these packages
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Skip packages tested with the IDE-hosted runner
        #[arg(long)]
        no_apm: bool,

        /// Run everything sequentially instead of on a worker pool
        #[arg(long, env = "SUITE_RUN_IN_BAND")]
        run_in_band: bool,
    },

    /// Replay the integration suite one test file at a time
    Integration {
        /// Repository root containing the `spec` directory
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Only run these test files
        #[arg(short, long = "test")]
        tests: Vec<String>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let executor = Arc::new(ProcessExecutor::with_commands(settings.commands.clone()));
    let runner = TestRunner::new(executor, settings.retry_delay());

    match cli.command {
        Command::Unit {
            manifest,
            packages,
            no_apm,
            run_in_band,
        } => {
            let manifest = PackageManifest::load(&manifest)?;
            let options = RunOptions::new()
                .with_packages(packages)
                .with_include_heavy(!no_apm)
                .with_run_in_band(run_in_band)
                .with_continue_on_errors(cli.continue_on_errors);

            let summary = Scheduler::new(runner, &settings)
                .run_all(manifest.targets(), &options)
                .await?;
            println!(
                "{} targets: {} passed, {} without tests, {} failed (continued)",
                summary.total(),
                summary.passed,
                summary.no_tests,
                summary.suppressed_failures
            );
        }
        Command::Integration { root, tests } => {
            let report = IntegrationHarness::new(runner)
                .run_integration_suite(&root, &tests, cli.continue_on_errors)
                .await?;
            println!("Ran {} integration tests", report.ran.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
