//! Error taxonomy for mrbuild.
//!
//! Errors are recovered at the narrowest scope that owns them: a bad pattern
//! skips one project, a failed build is isolated to its job, an audit write
//! failure is only a warning. Only [`ConfigError`] is allowed to stop a run
//! before it starts.

use std::path::PathBuf;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("unable to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("specified data file cannot be found: {0}")]
    DatafileNotFound(PathBuf),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0} (expected text or json)")]
    InvalidLogFormat(String),

    #[error("pool.workers must be at least 1")]
    NoWorkers,

    #[error("pool.workers must be at most {max}, got {requested}")]
    TooManyWorkers { requested: usize, max: usize },

    #[error("unable to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
}

/// Errors raised while acquiring the change set.
#[derive(Debug, thiserror::Error)]
pub enum ChangeSetError {
    #[error("unable to read content from pipe: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("unable to read data file {path}: {source}")]
    Datafile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to diff against branch {branch}: {source}")]
    Diff {
        branch: String,
        #[source]
        source: ExecutionError,
    },
}

/// Errors raised by a single command execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("{command} was terminated by a signal")]
    Terminated { command: String },

    #[error("failed waiting on {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build job for {project} did not complete: {reason}")]
    JobAborted { project: String, reason: String },
}

/// Failure to append to the command audit log. Never fatal.
#[derive(Debug, thiserror::Error)]
#[error("unable to write command to log {path}: {source}")]
pub struct AuditLogError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Top-level error for a whole `affected` run.
#[derive(Debug, thiserror::Error)]
pub enum MrbuildError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("change set acquisition failed: {0}")]
    ChangeSet(#[from] ChangeSetError),
}

/// Result type for mrbuild operations.
pub type Result<T> = std::result::Result<T, MrbuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DatafileNotFound(PathBuf::from("changes.txt"));
        assert_eq!(
            err.to_string(),
            "specified data file cannot be found: changes.txt"
        );

        let err = ConfigError::InvalidLogFormat("xml".to_string());
        assert!(err.to_string().contains("expected text or json"));
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::NonZeroExit {
            command: "make".to_string(),
            code: 2,
        };
        assert_eq!(err.to_string(), "make exited with code 2");
    }

    #[test]
    fn test_change_set_error_wraps_execution_error() {
        let err = ChangeSetError::Diff {
            branch: "main".to_string(),
            source: ExecutionError::NonZeroExit {
                command: "git".to_string(),
                code: 128,
            },
        };
        assert!(err.to_string().contains("branch main"));

        let top: MrbuildError = err.into();
        assert!(top.to_string().starts_with("change set acquisition failed"));
    }
}
