//! External command execution with output capture and audit logging.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn, Level};

use crate::config::Settings;
use crate::error::{AuditLogError, ExecutionError};

/// One command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Directory to run in. Ignored when it does not exist.
    pub workdir: PathBuf,

    /// Executable name or path.
    pub command: String,

    /// Arguments as a single string, split on whitespace.
    pub args: String,

    /// Echo output to stdout while the command runs.
    pub show: bool,

    /// Run even in dry-run mode. Only for commands that change nothing.
    pub force: bool,

    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(command: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: args.into(),
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn show(mut self, show: bool) -> Self {
        self.show = show;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// `command args` as written to logs.
    pub fn command_line(&self) -> String {
        format!("{} {}", self.command, self.args).trim_end().to_string()
    }
}

/// Outcome of one command.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Combined stdout and stderr, trimmed.
    pub output: String,

    pub outcome: Result<(), ExecutionError>,
}

impl ExecutionResult {
    fn ok(output: String) -> Self {
        Self {
            output,
            outcome: Ok(()),
        }
    }

    /// Whether the command succeeded (or was skipped by dry-run).
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.outcome.as_ref().err()
    }
}

/// Append-only log of every command run, one `[<workdir>] <command>` line each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one line. The file is opened and closed on every call.
    pub async fn append(&self, workdir: &Path, command_line: &str) -> Result<(), AuditLogError> {
        use tokio::io::AsyncWriteExt;

        let line = format!("[{}] {}\n", workdir.display(), command_line);
        let wrap = |source| AuditLogError {
            path: self.path.clone(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(wrap)?;
        file.write_all(line.as_bytes()).await.map_err(wrap)?;
        file.flush().await.map_err(wrap)
    }
}

/// Runs external commands, honouring dry-run and the audit log.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    dry_run: bool,
    audit: Option<AuditLog>,
}

impl CommandExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            audit: None,
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let executor = Self::new(settings.dry_run);
        match &settings.cmdlog {
            Some(path) => executor.with_audit_log(AuditLog::new(path)),
            None => executor,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `invocation` and capture its combined output.
    ///
    /// In dry-run mode nothing is spawned unless `force` is set, and the
    /// result is an empty, successful output.
    pub async fn execute(&self, invocation: &Invocation) -> ExecutionResult {
        let command_line = invocation.command_line();
        debug!(command = %command_line, "Command");

        if let Some(audit) = &self.audit {
            if !invocation.workdir.as_os_str().is_empty() {
                if let Err(e) = audit.append(&invocation.workdir, &command_line).await {
                    warn!(error = %e, "Unable to write command to log");
                }
            }
        }

        if self.dry_run && !invocation.force {
            return ExecutionResult::ok(String::new());
        }

        let mut sinks = OutputSinks {
            buffer: String::new(),
            console: invocation.show,
            log: tracing::enabled!(Level::DEBUG),
        };
        let outcome = spawn_and_capture(invocation, &mut sinks).await;

        ExecutionResult {
            output: sinks.buffer.trim().to_string(),
            outcome,
        }
    }
}

/// Where child output goes. The buffer always receives everything.
struct OutputSinks {
    buffer: String,
    console: bool,
    log: bool,
}

impl OutputSinks {
    fn write(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);

        if self.console {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }

        if self.log {
            debug!("{}", chunk.trim_end());
        }
    }
}

async fn spawn_and_capture(
    invocation: &Invocation,
    sinks: &mut OutputSinks,
) -> Result<(), ExecutionError> {
    let command = invocation.command.trim();
    if command.is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }

    let mut cmd = Command::new(command);
    cmd.args(invocation.args.split_whitespace())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if !invocation.env.is_empty() {
        cmd.envs(&invocation.env);
    }

    if !invocation.workdir.as_os_str().is_empty() && invocation.workdir.exists() {
        cmd.current_dir(&invocation.workdir);
    }

    let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    while let Some(chunk) = rx.recv().await {
        sinks.write(&chunk);
    }

    let status = child.wait().await.map_err(|source| ExecutionError::Wait {
        command: command.to_string(),
        source,
    })?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ExecutionError::NonZeroExit {
            command: command.to_string(),
            code,
        }),
        None => Err(ExecutionError::Terminated {
            command: command.to_string(),
        }),
    }
}

/// Send each line read from `reader` (newline included) until EOF.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}
