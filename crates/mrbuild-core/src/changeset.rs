//! Change set acquisition.
//!
//! The list of changed files comes from exactly one source per run, picked by
//! fixed precedence: piped stdin, then a configured data file, then
//! `git diff --name-only <branch>` in the working directory.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::ChangeSetError;
use crate::executor::{CommandExecutor, Invocation};

/// Newline separated changed paths, kept as raw text for regex matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(String);

impl ChangeSet {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when there is nothing but whitespace.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Non-blank lines.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

impl From<String> for ChangeSet {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for ChangeSet {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// Where the change set is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// Everything piped into the process.
    Stdin,

    /// A pre-recorded list of changed files.
    Datafile(PathBuf),

    /// `git diff --name-only` against a branch.
    GitDiff { branch: String },
}

impl ChangeSource {
    /// Pick the source for this run.
    pub fn select(stdin_piped: bool, datafile: Option<&Path>, branch: &str) -> Self {
        if stdin_piped {
            return ChangeSource::Stdin;
        }
        match datafile {
            Some(path) => ChangeSource::Datafile(path.to_path_buf()),
            None => ChangeSource::GitDiff {
                branch: branch.to_string(),
            },
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSource::Stdin => write!(f, "stdin"),
            ChangeSource::Datafile(path) => write!(f, "datafile {}", path.display()),
            ChangeSource::GitDiff { branch } => write!(f, "git diff against {branch}"),
        }
    }
}

/// Whether stdin is a pipe or redirected file rather than a terminal or device.
#[cfg(unix)]
pub fn stdin_is_piped() -> bool {
    use std::os::fd::AsFd;
    use std::os::unix::fs::FileTypeExt;

    let Ok(fd) = std::io::stdin().as_fd().try_clone_to_owned() else {
        return false;
    };
    std::fs::File::from(fd)
        .metadata()
        .map(|meta| !meta.file_type().is_char_device())
        .unwrap_or(false)
}

/// Whether stdin is a pipe or redirected file rather than a terminal.
#[cfg(not(unix))]
pub fn stdin_is_piped() -> bool {
    use std::io::IsTerminal;
    !std::io::stdin().is_terminal()
}

/// Reads the change set from the selected source.
#[derive(Debug, Clone)]
pub struct ChangeSetProvider {
    source: ChangeSource,
    working_dir: PathBuf,
    executor: CommandExecutor,
}

impl ChangeSetProvider {
    pub fn new(
        source: ChangeSource,
        working_dir: impl Into<PathBuf>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            source,
            working_dir: working_dir.into(),
            executor,
        }
    }

    /// Provider for `settings`, checking stdin for a pipe.
    pub fn from_settings(settings: &Settings, executor: CommandExecutor) -> Self {
        let source = ChangeSource::select(
            stdin_is_piped(),
            settings.datafile.as_deref(),
            &settings.branch,
        );
        Self::new(source, &settings.working_dir, executor)
    }

    pub fn source(&self) -> &ChangeSource {
        &self.source
    }

    /// Read the change set. On error the caller may carry on with an empty one.
    pub async fn acquire(&self) -> Result<ChangeSet, ChangeSetError> {
        info!(source = %self.source, "Reading change set");

        let change_set = match &self.source {
            ChangeSource::Stdin => read_stdin().await?,
            ChangeSource::Datafile(path) => read_datafile(path).await?,
            ChangeSource::GitDiff { branch } => self.git_diff(branch).await?,
        };

        debug!(paths = change_set.paths().count(), "Change set read");
        Ok(change_set)
    }

    async fn git_diff(&self, branch: &str) -> Result<ChangeSet, ChangeSetError> {
        // diffing changes nothing, so it also runs in dry-run mode
        let invocation = Invocation::new("git", format!("--no-pager diff --name-only {branch}"))
            .in_dir(&self.working_dir)
            .force(true);

        let result = self.executor.execute(&invocation).await;
        match result.outcome {
            Ok(()) => Ok(ChangeSet::from(result.output)),
            Err(source) => Err(ChangeSetError::Diff {
                branch: branch.to_string(),
                source,
            }),
        }
    }
}

async fn read_stdin() -> Result<ChangeSet, ChangeSetError> {
    let mut data = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut data)
        .await
        .map_err(ChangeSetError::Stdin)?;
    Ok(ChangeSet::from(String::from_utf8_lossy(&data).into_owned()))
}

async fn read_datafile(path: &Path) -> Result<ChangeSet, ChangeSetError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| ChangeSetError::Datafile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(ChangeSet::from(String::from_utf8_lossy(&data).into_owned()))
}
