//! mrbuild - Mono-repo Build
//!
//! Detects which projects of a mono-repository a change set touches and
//! builds them:
//! - Reads the change set from stdin, a data file, or `git diff`
//! - Matches each project's patterns against the raw change set text
//! - Orders affected builds by their configured priority
//! - Runs the builds on a bounded worker pool, honouring dry-run

pub mod build;
pub mod changeset;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod order;
pub mod pipeline;
pub mod telemetry;

#[cfg(test)]
mod test_support;

// Re-export key types
pub use build::AffectedBuild;
pub use changeset::{stdin_is_piped, ChangeSet, ChangeSetProvider, ChangeSource};
pub use config::{
    BuildDescriptor, FileConfig, IgnoreList, Overrides, Project, Settings, DEFAULT_BRANCH,
    DEFAULT_CONFIG_FILE, REPO_ROOT_FOLDER,
};
pub use dispatcher::{BuildRunner, DispatchReport, Dispatcher};
pub use error::{AuditLogError, ChangeSetError, ConfigError, ExecutionError, MrbuildError, Result};
pub use executor::{AuditLog, CommandExecutor, ExecutionResult, Invocation};
pub use matcher::ProjectMatcher;
pub use order::sort_by_order;
pub use pipeline::{AffectedRun, RunPhase};
pub use telemetry::{init_tracing, LogFormat, LogSettings};
