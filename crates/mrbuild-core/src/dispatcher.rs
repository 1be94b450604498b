//! Bounded concurrent dispatch of affected builds.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::build::AffectedBuild;
use crate::config::Settings;
use crate::error::ExecutionError;
use crate::executor::{CommandExecutor, ExecutionResult};
use crate::pipeline::RunPhase;

/// Runs the command for one build.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(&self, build: &AffectedBuild) -> ExecutionResult;
}

#[async_trait]
impl BuildRunner for CommandExecutor {
    async fn run(&self, build: &AffectedBuild) -> ExecutionResult {
        self.execute(&build.invocation()).await
    }
}

/// What happened to each build in a dispatch, by project name.
///
/// Build failures are reported here and in the logs; they never fail the
/// dispatch itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Builds whose command succeeded, in submission order.
    pub succeeded: Vec<String>,

    /// Builds whose command failed or whose job aborted, in submission order.
    pub failed: Vec<String>,

    /// Builds not submitted because of dry-run.
    pub skipped: Vec<String>,
}

impl DispatchReport {
    pub fn passed_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Number of builds handed to the worker pool.
    pub fn submitted_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Submits builds to a fixed-size worker pool and waits for all of them.
pub struct Dispatcher {
    runner: Arc<dyn BuildRunner>,
    workers: usize,
    dry_run: bool,
}

impl Dispatcher {
    /// Dry-run pins the pool to a single worker. Otherwise the pool size is
    /// clamped to what a semaphore can hold.
    pub fn new(runner: Arc<dyn BuildRunner>, workers: usize, dry_run: bool) -> Self {
        let workers = if dry_run {
            warn!(configured = workers, "Set workers to 1 as running in DryRun mode");
            1
        } else {
            workers.clamp(1, Semaphore::MAX_PERMITS)
        };

        Self {
            runner,
            workers,
            dry_run,
        }
    }

    pub fn from_settings(settings: &Settings, runner: Arc<dyn BuildRunner>) -> Self {
        Self::new(runner, settings.workers, settings.dry_run)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatch `builds` in the given order and wait until every job is done.
    ///
    /// Jobs start in submission order; with more than one worker they may
    /// finish in any order.
    pub async fn dispatch(&self, builds: Vec<AffectedBuild>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut jobs = Vec::with_capacity(builds.len());

        for build in builds {
            info!(
                working_dir = %build.directory.display(),
                project = %build.name,
                command = %build.command(),
                "Executing command"
            );

            if self.dry_run {
                warn!(project = %build.name, "Not running command as in DryRun mode");
                report.skipped.push(build.name);
                continue;
            }

            // a permit per job, taken in submission order
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(project = %build.name, error = %e, "Worker pool unavailable");
                    report.failed.push(build.name);
                    continue;
                }
            };

            let runner = Arc::clone(&self.runner);
            let name = build.name.clone();
            let job = tokio::spawn(
                async move {
                    let result = runner.run(&build).await;
                    drop(permit);
                    log_result(&build, &result);
                    result.passed()
                }
                .in_current_span(),
            );
            jobs.push((name, job));
        }

        debug!(phase = %RunPhase::Draining, jobs = jobs.len(), "Waiting for build jobs");
        let finished = join_all(
            jobs.into_iter()
                .map(|(name, job)| async move { (name, job.await) }),
        )
        .await;

        for (name, joined) in finished {
            match joined {
                Ok(true) => report.succeeded.push(name),
                Ok(false) => report.failed.push(name),
                Err(e) => {
                    let err = ExecutionError::JobAborted {
                        project: name.clone(),
                        reason: e.to_string(),
                    };
                    error!(project = %name, error = %err, "Build job aborted");
                    report.failed.push(name);
                }
            }
        }

        report
    }
}

fn log_result(build: &AffectedBuild, result: &ExecutionResult) {
    match &result.outcome {
        Ok(()) => info!(project = %build.name, output = %result.output, "Build succeeded"),
        Err(e) => error!(
            project = %build.name,
            command = %build.command(),
            working_dir = %build.directory.display(),
            error = %e,
            output = %result.output,
            "Build failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CapturedLogs;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records starts and tracks how many builds run at once.
    #[derive(Default)]
    struct RecordingRunner {
        started: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        fail: Vec<String>,
        delay_ms: u64,
    }

    impl RecordingRunner {
        fn with_delay(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::default()
            }
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildRunner for RecordingRunner {
        async fn run(&self, build: &AffectedBuild) -> ExecutionResult {
            self.started.lock().unwrap().push(build.name.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            let outcome = if self.fail.contains(&build.name) {
                Err(ExecutionError::NonZeroExit {
                    command: build.command.clone(),
                    code: 1,
                })
            } else {
                Ok(())
            };
            ExecutionResult {
                output: format!("built {}", build.name),
                outcome,
            }
        }
    }

    fn build(name: &str) -> AffectedBuild {
        AffectedBuild {
            name: name.to_string(),
            directory: PathBuf::from(format!("src/{name}")),
            command: format!("make {name}"),
            env: BTreeMap::new(),
            order: 0,
        }
    }

    fn builds(names: &[&str]) -> Vec<AffectedBuild> {
        names.iter().map(|n| build(n)).collect()
    }

    #[tokio::test]
    async fn test_all_builds_run() {
        let runner = Arc::new(RecordingRunner::with_delay(5));
        let dispatcher = Dispatcher::new(runner.clone(), 3, false);

        let report = dispatcher.dispatch(builds(&["a", "b", "c", "d"])).await;

        assert_eq!(report.succeeded, ["a", "b", "c", "d"]);
        assert_eq!(report.failed_count(), 0);
        assert!(report.skipped.is_empty());
        assert_eq!(runner.started().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let runner = Arc::new(RecordingRunner::with_delay(40));
        let dispatcher = Dispatcher::new(runner.clone(), 2, false);

        let report = dispatcher
            .dispatch(builds(&["a", "b", "c", "d", "e", "f"]))
            .await;

        assert_eq!(report.submitted_count(), 6);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_preserves_order() {
        let runner = Arc::new(RecordingRunner::with_delay(5));
        let dispatcher = Dispatcher::new(runner.clone(), 1, false);

        dispatcher
            .dispatch(builds(&["first", "second", "third", "fourth"]))
            .await;

        assert_eq!(runner.started(), ["first", "second", "third", "fourth"]);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let runner = Arc::new(RecordingRunner {
            fail: vec!["b".to_string()],
            ..RecordingRunner::default()
        });
        let dispatcher = Dispatcher::new(runner.clone(), 2, false);

        let report = dispatcher.dispatch(builds(&["a", "b", "c"])).await;

        assert_eq!(report.succeeded, ["a", "c"]);
        assert_eq!(report.failed, ["b"]);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_dry_run_submits_nothing() {
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = Dispatcher::new(runner.clone(), 8, true);

        assert_eq!(dispatcher.workers(), 1);

        let report = dispatcher.dispatch(builds(&["a", "b"])).await;

        assert!(runner.started().is_empty());
        assert_eq!(report.skipped, ["a", "b"]);
        assert_eq!(report.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_dispatch() {
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = Dispatcher::new(runner, 4, false);

        let report = dispatcher.dispatch(Vec::new()).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_dry_run_logs_every_build() {
        let (logs, _guard) = CapturedLogs::install("info");
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = Dispatcher::new(runner.clone(), 1, true);

        dispatcher.dispatch(builds(&["a", "b", "c"])).await;

        assert_eq!(logs.count("Set workers to 1 as running in DryRun mode"), 1);
        assert_eq!(logs.count("Executing command"), 3);
        assert_eq!(logs.count("Not running command as in DryRun mode"), 3);
        assert!(runner.started().is_empty());
    }

    #[test]
    fn test_zero_workers_clamped() {
        let runner = Arc::new(RecordingRunner::default());
        assert_eq!(Dispatcher::new(runner, 0, false).workers(), 1);
    }

    #[tokio::test]
    async fn test_oversized_pool_clamped() {
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = Dispatcher::new(runner.clone(), usize::MAX, false);
        assert_eq!(dispatcher.workers(), Semaphore::MAX_PERMITS);

        let report = dispatcher.dispatch(builds(&["a"])).await;
        assert_eq!(report.succeeded, ["a"]);
    }
}
