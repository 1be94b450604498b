//! Affected build definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::executor::Invocation;

/// A build to run for one affected project.
///
/// Created fresh by the matcher on every run and consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedBuild {
    /// Name of the originating project.
    pub name: String,

    /// Directory the command runs in.
    pub directory: PathBuf,

    /// Full command line, e.g. `make build`.
    pub command: String,

    /// Environment variables set for the command.
    pub env: BTreeMap<String, String>,

    /// Submission priority copied from the project.
    pub order: i64,
}

impl AffectedBuild {
    /// The full command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Split the command line at the first space into executable and arguments.
    pub fn command_parts(&self) -> (&str, &str) {
        let command = self.command.trim();
        match command.split_once(' ') {
            Some((exe, args)) => (exe, args.trim_start()),
            None => (command, ""),
        }
    }

    /// Invocation that runs this build with its output shown live.
    pub fn invocation(&self) -> Invocation {
        let (exe, args) = self.command_parts();
        Invocation::new(exe, args)
            .in_dir(&self.directory)
            .show(true)
            .with_env(self.env.clone())
    }
}
