//! The `affected` run: acquire, match, order, dispatch, drain.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, Instrument};

use crate::build::AffectedBuild;
use crate::changeset::{ChangeSet, ChangeSetProvider};
use crate::config::{Project, Settings};
use crate::dispatcher::{BuildRunner, DispatchReport, Dispatcher};
use crate::error::{MrbuildError, Result};
use crate::executor::CommandExecutor;
use crate::matcher::ProjectMatcher;
use crate::order::sort_by_order;
use crate::telemetry::run_span;

/// Phases of one run, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Acquiring,
    Matching,
    Ordering,
    Dispatching,
    Draining,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Acquiring => "acquiring",
            RunPhase::Matching => "matching",
            RunPhase::Ordering => "ordering",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Draining => "draining",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Detects affected projects and builds them.
pub struct AffectedRun {
    provider: ChangeSetProvider,
    matcher: ProjectMatcher,
    dispatcher: Dispatcher,
    projects: Vec<Project>,
}

impl AffectedRun {
    pub fn new(
        provider: ChangeSetProvider,
        matcher: ProjectMatcher,
        dispatcher: Dispatcher,
        projects: Vec<Project>,
    ) -> Self {
        Self {
            provider,
            matcher,
            dispatcher,
            projects,
        }
    }

    /// Wire every component from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let executor = CommandExecutor::from_settings(settings);
        let provider = ChangeSetProvider::from_settings(settings, executor.clone());
        let runner: Arc<dyn BuildRunner> = Arc::new(executor);

        Self::new(
            provider,
            ProjectMatcher::from_settings(settings),
            Dispatcher::from_settings(settings, runner),
            settings.projects.clone(),
        )
    }

    /// Execute the run.
    ///
    /// A change set that cannot be read is logged and treated as empty; the
    /// error is returned once the run has finished. Build failures only show
    /// up in the report.
    pub async fn run(&self) -> Result<DispatchReport> {
        self.run_phases().instrument(run_span()).await
    }

    async fn run_phases(&self) -> Result<DispatchReport> {
        debug!(phase = %RunPhase::Idle, "Starting affected run");

        debug!(phase = %RunPhase::Acquiring);
        let (change_set, acquisition_error) = match self.provider.acquire().await {
            Ok(change_set) => (change_set, None),
            Err(e) => {
                error!(source = %self.provider.source(), error = %e, "Issue reading change set");
                // partial diff output is dropped along with the error
                (ChangeSet::default(), Some(e))
            }
        };

        if change_set.is_empty() {
            info!("No changed files found");
        }

        debug!(phase = %RunPhase::Matching);
        let mut builds = self.matcher.match_projects(&self.projects, &change_set);

        debug!(phase = %RunPhase::Ordering);
        sort_by_order(&mut builds);
        debug!("Analysing {} projects", builds.len());
        log_plan(&builds);

        debug!(phase = %RunPhase::Dispatching, workers = self.dispatcher.workers());
        let report = self.dispatcher.dispatch(builds).await;

        debug!(phase = %RunPhase::Done);
        info!(
            succeeded = report.passed_count(),
            failed = report.failed_count(),
            skipped = report.skipped.len(),
            "Affected run finished"
        );

        match acquisition_error {
            Some(e) => Err(MrbuildError::ChangeSet(e)),
            None => Ok(report),
        }
    }
}

fn log_plan(builds: &[AffectedBuild]) {
    for (position, build) in builds.iter().enumerate() {
        debug!(position, project = %build.name, order = build.order, "Build planned");
    }
}
