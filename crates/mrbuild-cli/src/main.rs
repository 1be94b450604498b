//! mrbuild - Mono-repo Build CLI
//!
//! The `mrbuild` command builds only the parts of a mono-repository that changed.
//!
//! ## Commands
//!
//! - `affected`: Detect the projects touched by the change set and build them
//! - `version`: Show the version of the tool

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use mrbuild_core::{init_tracing, AffectedRun, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "mrbuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provides tools when working with mono-repos", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Path to the configuration file (default: ./mrbuild.toml if present)
    #[arg(short, long, global = true, env = "MRBUILD_CONFIG")]
    config: Option<PathBuf>,

    /// Logging level
    #[arg(short = 'l', long, global = true, env = "MRBUILD_LOG_LEVEL")]
    loglevel: Option<String>,

    /// Logging format, text or json
    #[arg(short = 'f', long, global = true, env = "MRBUILD_LOG_FORMAT")]
    logformat: Option<String>,

    /// State if colours should be used in the text output
    #[arg(long, global = true, env = "MRBUILD_LOG_COLOUR", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    logcolour: Option<bool>,

    /// File to write logs to
    #[arg(long, global = true, env = "MRBUILD_LOG_FILE")]
    logfile: Option<PathBuf>,

    /// Specify if commands should be logged
    #[arg(long, global = true, env = "MRBUILD_OPTIONS_CMDLOG", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    cmdlog: Option<bool>,

    /// Perform a dryrun of the CLI. No changes will be made on disk
    #[arg(long, global = true, env = "MRBUILD_OPTIONS_DRYRUN", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    dryrun: Option<bool>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect the projects affected by the changed files and build them
    Affected(AffectedArgs),

    /// Show the version of the tool
    Version,
}

#[derive(Args, Debug, Default)]
struct AffectedArgs {
    /// List of projects that should not be processed (comma delimited)
    #[arg(long, env = "MRBUILD_OPTIONS_IGNORE")]
    ignore: Option<String>,

    /// Path to file containing git file data to work with
    #[arg(long, env = "MRBUILD_DATAFILE")]
    datafile: Option<PathBuf>,

    /// Number of workers to spawn jobs to
    #[arg(long, env = "MRBUILD_POOL_WORKERS")]
    workers: Option<usize>,

    /// Branch that changes are measured against
    #[arg(long, env = "MRBUILD_BRANCH")]
    branch: Option<String>,

    /// Exit with a non-zero code when any build fails
    #[arg(long, env = "MRBUILD_FAIL_ON_ERROR")]
    fail_on_error: bool,
}

fn overrides(global: GlobalArgs, affected: Option<&AffectedArgs>) -> Overrides {
    let mut overrides = Overrides {
        config: global.config,
        cmdlog: global.cmdlog,
        dryrun: global.dryrun,
        log_level: global.loglevel,
        log_format: global.logformat,
        log_colour: global.logcolour,
        log_file: global.logfile,
        ..Overrides::default()
    };

    if let Some(args) = affected {
        overrides.ignore = args.ignore.clone();
        overrides.datafile = args.datafile.clone();
        overrides.workers = args.workers;
        overrides.branch = args.branch.clone();
    }

    overrides
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("mrbuild {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Affected(args) => cmd_affected(overrides(cli.global, Some(&args)), &args).await,
    }
}

async fn cmd_affected(overrides: Overrides, args: &AffectedArgs) -> Result<ExitCode> {
    let settings = Settings::load(overrides).context("Unable to read configuration")?;

    // Setup logging; the guard flushes the log file on exit
    let _log_guard = init_tracing(&settings.log)
        .with_context(|| format!("Unable to open log file {:?}", settings.log.file))?;

    if let Some(path) = &settings.config_path {
        info!(config = %path.display(), "Using configuration file");
    }

    if let Err(e) = settings.check_datafile() {
        error!(error = %e, "Pre-run check failed");
        return Err(e.into());
    }

    if settings.projects.is_empty() {
        warn!("No projects are configured");
    }

    let report = match AffectedRun::from_settings(&settings).run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Error running command");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.fail_on_error && report.has_failures() {
        error!(failed = ?report.failed, "One or more builds failed");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
