//! Project definitions and resolved run settings.
//!
//! Configuration is read once from an optional TOML file, layered under the
//! command-line [`Overrides`], and frozen into a [`Settings`] value. Every
//! component receives what it needs from that value at construction; nothing
//! re-reads configuration mid-run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::Level;

use crate::error::ConfigError;
use crate::telemetry::{LogFormat, LogSettings};

/// Config file looked up in the current directory when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "mrbuild.toml";

/// Branch compared against when none is configured.
pub const DEFAULT_BRANCH: &str = "main";

/// File name of the command audit log, relative to the working directory.
pub const DEFAULT_CMDLOG_FILE: &str = "cmdlog.txt";

/// Build folder value meaning "the directory holding the config file".
pub const REPO_ROOT_FOLDER: &str = ".";

/// A project inside the mono-repository.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Project {
    /// Unique project name.
    pub name: String,

    /// Root folder of the project, relative to the repository root.
    pub folder: String,

    /// Regular expressions, relative to `folder`, that mark the project as changed.
    pub patterns: Vec<String>,

    /// How to build the project.
    pub build: BuildDescriptor,

    /// Environment variables set for the build command.
    pub env: BTreeMap<String, String>,

    /// Submission priority. Lower builds first.
    pub order: i64,
}

/// Build command for a project.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildDescriptor {
    /// Full command line, e.g. `make build`.
    pub cmd: String,

    /// Folder to run the command in. Empty means the project folder,
    /// [`REPO_ROOT_FOLDER`] means the repository root.
    pub folder: String,
}

/// Projects excluded from a run.
///
/// Built from a comma separated list. An entry ignores a project when it is
/// equal to the project name, when the project name used as a regex finds a
/// match in the entry, or when the entry used as a regex matches the whole name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    entries: Vec<String>,
}

impl IgnoreList {
    /// Parse a comma separated list, dropping blank entries.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Whether the named project should be skipped.
    pub fn is_ignored(&self, project: &str) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        if self.entries.iter().any(|e| e == project) {
            return true;
        }

        if let Ok(name_re) = Regex::new(project) {
            if self.entries.iter().any(|e| name_re.is_match(e)) {
                return true;
            }
        }

        self.entries.iter().any(|e| {
            Regex::new(&format!("^(?:{e})$"))
                .map(|re| re.is_match(project))
                .unwrap_or(false)
        })
    }
}

impl From<&str> for IgnoreList {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// `[pool]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: Option<usize>,
}

/// `[options]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub cmdlog: bool,
    pub cmdlog_path: Option<PathBuf>,
    pub dryrun: bool,
    pub ignore: String,
}

/// `[log]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub colour: Option<bool>,
    pub file: Option<PathBuf>,
}

/// The configuration file as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub branch: String,
    pub datafile: Option<PathBuf>,
    pub pool: PoolConfig,
    pub options: OptionsConfig,
    pub log: LogConfig,
    pub env: BTreeMap<String, String>,
    pub projects: Vec<Project>,
}

impl FileConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values supplied on the command line or through `MRBUILD_*` variables.
///
/// Every field left as `None` falls back to the config file, then to the default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub branch: Option<String>,
    pub datafile: Option<PathBuf>,
    pub workers: Option<usize>,
    pub ignore: Option<String>,
    pub cmdlog: Option<bool>,
    pub dryrun: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_colour: Option<bool>,
    pub log_file: Option<PathBuf>,
}

/// Fully resolved, immutable settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Branch the change set is diffed against.
    pub branch: String,

    /// Pre-recorded change set, used instead of the diff.
    pub datafile: Option<PathBuf>,

    /// Projects in configured order.
    pub projects: Vec<Project>,

    /// Size of the build worker pool.
    pub workers: usize,

    /// Log commands instead of running them.
    pub dry_run: bool,

    /// Projects excluded from the run.
    pub ignore: IgnoreList,

    /// Command audit log, when enabled.
    pub cmdlog: Option<PathBuf>,

    /// Environment variables applied to every build; project values win.
    pub env: BTreeMap<String, String>,

    /// Directory the process was started in.
    pub working_dir: PathBuf,

    /// Directory containing the configuration file.
    pub repo_root: PathBuf,

    /// Configuration file that was read, if any.
    pub config_path: Option<PathBuf>,

    /// Logging setup.
    pub log: LogSettings,
}

impl Settings {
    /// Locate and read the configuration file, then resolve it against
    /// `overrides` and the current directory.
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;

        let config_path = match &overrides.config {
            Some(path) if !path.exists() => {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            Some(path) => Some(path.clone()),
            None => {
                let candidate = cwd.join(DEFAULT_CONFIG_FILE);
                candidate.exists().then_some(candidate)
            }
        };

        let file = match &config_path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Self::resolve(file, config_path, overrides, cwd)
    }

    /// Layer `overrides` over `file` and fill in defaults.
    pub fn resolve(
        file: FileConfig,
        config_path: Option<PathBuf>,
        overrides: Overrides,
        cwd: PathBuf,
    ) -> Result<Self, ConfigError> {
        let branch = overrides
            .branch
            .unwrap_or(file.branch)
            .trim()
            .to_string();
        let branch = if branch.is_empty() {
            DEFAULT_BRANCH.to_string()
        } else {
            branch
        };

        let workers = overrides.workers.or(file.pool.workers).unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if workers > Semaphore::MAX_PERMITS {
            return Err(ConfigError::TooManyWorkers {
                requested: workers,
                max: Semaphore::MAX_PERMITS,
            });
        }

        let datafile = overrides
            .datafile
            .or(file.datafile)
            .filter(|p| !p.as_os_str().is_empty());

        let ignore = IgnoreList::parse(&overrides.ignore.unwrap_or(file.options.ignore));

        let cmdlog = if overrides.cmdlog.unwrap_or(file.options.cmdlog) {
            let path = file
                .options
                .cmdlog_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CMDLOG_FILE));
            Some(absolutize(&cwd, &path))
        } else {
            None
        };

        let repo_root = match config_path.as_deref().and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => absolutize(&cwd, dir),
            _ => cwd.clone(),
        };

        let level_raw = overrides
            .log_level
            .or(file.log.level)
            .unwrap_or_else(|| "info".to_string());
        let level = level_raw
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(level_raw.clone()))?;

        let format_raw = overrides
            .log_format
            .or(file.log.format)
            .unwrap_or_else(|| "text".to_string());
        let format = format_raw
            .parse::<LogFormat>()
            .map_err(|_| ConfigError::InvalidLogFormat(format_raw.clone()))?;

        let log = LogSettings {
            level,
            format,
            colour: overrides.log_colour.or(file.log.colour).unwrap_or(true),
            file: overrides
                .log_file
                .or(file.log.file)
                .filter(|p| !p.as_os_str().is_empty()),
        };

        Ok(Self {
            branch,
            datafile,
            projects: file.projects,
            workers,
            dry_run: overrides.dryrun.unwrap_or(file.options.dryrun),
            ignore,
            cmdlog,
            env: file.env,
            working_dir: cwd,
            repo_root,
            config_path,
            log,
        })
    }

    /// Fail when a data file is configured but missing.
    pub fn check_datafile(&self) -> Result<(), ConfigError> {
        match &self.datafile {
            Some(path) if !path.exists() => Err(ConfigError::DatafileNotFound(path.clone())),
            _ => Ok(()),
        }
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
