//! Centralised tracing initialisation for the `mrbuild` binary.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter`, text or JSON formatting, and an optional
//! log file.
//!
//! Safe to call more than once; subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(other.to_string()),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Default verbosity when `RUST_LOG` is not set.
    pub level: Level,

    pub format: LogFormat,

    /// ANSI colours in text output. Ignored when logging to a file.
    pub colour: bool,

    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            colour: true,
            file: None,
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// Respects the `RUST_LOG` environment variable for fine-grained filtering.
/// If `RUST_LOG` is not set, falls back to `settings.level`.
///
/// When a log file is configured the returned guard must be held until the
/// process exits, otherwise buffered lines are lost.
pub fn init_tracing(settings: &LogSettings) -> std::io::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let Some(path) = &settings.file else {
        let layer = fmt::layer()
            .with_target(false)
            .with_ansi(settings.colour)
            .with_writer(std::io::stderr);
        match settings.format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.json())
                .try_init()
                .ok(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .ok(),
        };
        return Ok(None);
    };

    let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
    let layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer);
    match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok(),
    };

    Ok(Some(guard))
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Span covering one `affected` run, tagged with a fresh run id.
pub fn run_span() -> tracing::Span {
    let run_id = uuid::Uuid::new_v4();
    tracing::info_span!("mrbuild.run", run_id = %run_id)
}
