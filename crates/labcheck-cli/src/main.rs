//! labcheck CLI
//!
//! Runs live-environment regression checks for a course and scores the
//! result.
//!
//! ## Commands
//!
//! - `run`: test every exercise of a course descriptor
//! - `score`: recompute quality metrics from a saved result tree
//! - `cache clear`: drop every cached check result
//!
//! Exit status is 0 when no P0 bug was found, 1 when any was, and 2 when
//! the run could not be performed at all.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use labcheck_core::telemetry::init_tracing;
use labcheck_core::{
    compute_metrics, CancelFlag, CourseContext, CourseTestResults, FsResultCache, Orchestrator,
    ProcessExecutor, ResultCache, RunConfig,
};

const EXIT_CLEAN: u8 = 0;
const EXIT_P0: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "labcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live-environment regression testing for lab exercises", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every check against every exercise of a course
    Run(RunArgs),

    /// Recompute quality metrics from a saved result tree
    Score {
        /// Result tree written by `labcheck run`
        #[arg(short, long)]
        results: PathBuf,

        /// Run configuration (TOML) holding the scoring weights
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Manage the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Course descriptor (JSON)
    #[arg(long)]
    course: PathBuf,

    /// Run configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the result tree here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent exercise workers
    #[arg(long)]
    parallel: Option<usize>,

    /// Disable the result cache
    #[arg(long)]
    no_cache: bool,

    /// Result cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Lifecycle cycles for the idempotency check
    #[arg(long)]
    cycles: Option<u32>,

    /// Keep running checks after a blocking failure
    #[arg(long)]
    continue_on_blocker: bool,

    /// Only test these exercise ids
    #[arg(long, num_args = 1..)]
    only: Vec<String>,

    /// Extra option passed to `ssh`, e.g. `--ssh-option=-i --ssh-option=~/.ssh/lab_rsa`
    #[arg(long = "ssh-option", allow_hyphen_values = true)]
    ssh_options: Vec<String>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached result
    Clear {
        /// Result cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Run configuration (TOML) naming the cache directory
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match dispatch(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("labcheck: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn dispatch(command: Commands) -> Result<u8> {
    match command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Score { results, config } => cmd_score(&results, config.as_deref()),
        Commands::Cache { action } => match action {
            CacheAction::Clear { cache_dir, config } => {
                cmd_cache_clear(cache_dir.as_deref(), config.as_deref())
            }
        },
    }
}

// ----- run -----

async fn cmd_run(args: RunArgs) -> Result<u8> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid run configuration")?;

    let course = load_course(&args.course)?;

    let executor = ProcessExecutor::new().with_ssh_options(args.ssh_options.clone());
    let orchestrator = Orchestrator::from_config(Arc::new(executor), config)
        .context("failed to set up orchestrator")?;

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight checks");
                cancel.cancel();
            }
        })
    };

    let outcome = orchestrator.run_only(&course, &args.only, cancel).await;
    watcher.abort();
    let results = outcome.context("course run failed")?;

    write_results(&results, args.output.as_deref())?;
    info!(
        course_id = %results.course_id,
        quality_score = results.metrics.quality_score,
        readiness = results.metrics.readiness.as_str(),
        "run complete"
    );

    Ok(exit_code(&results))
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(parallel) = args.parallel {
        config.parallelism = parallel;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    if let Some(dir) = &args.cache_dir {
        config.cache.dir = dir.clone();
    }
    if let Some(cycles) = args.cycles {
        config.idempotency.cycles = cycles;
    }
    if args.continue_on_blocker {
        config.stop_on_blocker = false;
    }
}

fn load_course(path: &Path) -> Result<CourseContext> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read course descriptor {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse course descriptor {}", path.display()))
}

fn write_results(results: &CourseTestResults, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            info!(path = %path.display(), "results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ----- score -----

fn cmd_score(results_path: &Path, config: Option<&Path>) -> Result<u8> {
    let config = load_config(config)?;
    let text = std::fs::read_to_string(results_path)
        .with_context(|| format!("failed to read results {}", results_path.display()))?;
    let mut results: CourseTestResults = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse results {}", results_path.display()))?;

    results.metrics = compute_metrics(
        &results.exercise_results,
        results.metrics.total_exercises,
        &config.scoring,
    );
    println!("{}", serde_json::to_string_pretty(&results.metrics)?);

    Ok(exit_code(&results))
}

// ----- cache -----

fn cmd_cache_clear(cache_dir: Option<&Path>, config: Option<&Path>) -> Result<u8> {
    let config = load_config(config)?;
    let dir = cache_dir.unwrap_or(config.cache.dir.as_path());
    let cache = FsResultCache::new(dir)
        .with_context(|| format!("failed to open result cache {}", dir.display()))?;
    cache.clear().context("failed to clear result cache")?;
    info!(dir = %dir.display(), "result cache cleared");
    Ok(EXIT_CLEAN)
}

// ----- helpers -----

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

fn exit_code(results: &CourseTestResults) -> u8 {
    if results.has_p0() {
        EXIT_P0
    } else {
        EXIT_CLEAN
    }
}
