//! Integration tests for the affected run, end to end with real commands.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mrbuild_core::{
    AffectedRun, AuditLog, BuildDescriptor, ChangeSetProvider, ChangeSource, CommandExecutor,
    Dispatcher, FileConfig, IgnoreList, MrbuildError, Overrides, Project, ProjectMatcher,
    Settings,
};

/// A project whose build runs `cmd` in `<root>/<folder>`.
fn project(root: &Path, name: &str, folder: &str, cmd: &str, order: i64) -> Project {
    let build_dir = root.join(folder);
    std::fs::create_dir_all(&build_dir).unwrap();

    Project {
        name: name.to_string(),
        folder: folder.to_string(),
        patterns: vec![".*\\.go".to_string()],
        build: BuildDescriptor {
            cmd: cmd.to_string(),
            folder: build_dir.display().to_string(),
        },
        env: BTreeMap::new(),
        order,
    }
}

fn write_datafile(root: &Path, content: &str) -> PathBuf {
    let path = root.join("changes.txt");
    std::fs::write(&path, content).unwrap();
    path
}

fn affected_run(
    root: &Path,
    datafile: PathBuf,
    executor: CommandExecutor,
    workers: usize,
    ignore: &str,
    projects: Vec<Project>,
) -> AffectedRun {
    let dry_run = executor.is_dry_run();
    let provider = ChangeSetProvider::new(ChangeSource::Datafile(datafile), root, executor.clone());
    let matcher = ProjectMatcher::new(root).with_ignore(IgnoreList::parse(ignore));
    let dispatcher = Dispatcher::new(Arc::new(executor), workers, dry_run);
    AffectedRun::new(provider, matcher, dispatcher, projects)
}

/// Test: affected projects are built in priority order
#[tokio::test]
async fn test_affected_projects_are_built_in_order() {
    let root = tempfile::tempdir().unwrap();
    let cmdlog = root.path().join("cmdlog.txt");
    let datafile = write_datafile(root.path(), "src/a/main.go\nsrc/b/main.go\n");

    let projects = vec![
        project(root.path(), "A", "src/a", "touch built", 5),
        project(root.path(), "B", "src/b", "touch built", 1),
        project(root.path(), "C", "src/c", "touch built", 0),
    ];
    let executor = CommandExecutor::new(false).with_audit_log(AuditLog::new(&cmdlog));
    let run = affected_run(root.path(), datafile, executor, 1, "", projects);

    let report = run.run().await.expect("run failed");

    assert_eq!(report.succeeded, ["B", "A"]);
    assert!(report.failed.is_empty());
    assert!(root.path().join("src/a/built").exists());
    assert!(root.path().join("src/b/built").exists());
    assert!(!root.path().join("src/c/built").exists(), "C is not affected");

    let log = std::fs::read_to_string(&cmdlog).unwrap();
    let expected = format!(
        "[{b}] touch built\n[{a}] touch built\n",
        a = root.path().join("src/a").display(),
        b = root.path().join("src/b").display(),
    );
    assert_eq!(log, expected);
}

/// Test: dry-run logs every build but runs none
#[tokio::test]
async fn test_dry_run_spawns_nothing() {
    let root = tempfile::tempdir().unwrap();
    let cmdlog = root.path().join("cmdlog.txt");
    let datafile = write_datafile(root.path(), "src/a/main.go\nsrc/b/main.go\n");

    let projects = vec![
        project(root.path(), "A", "src/a", "touch built", 5),
        project(root.path(), "B", "src/b", "touch built", 1),
    ];
    let executor = CommandExecutor::new(true).with_audit_log(AuditLog::new(&cmdlog));
    let run = affected_run(root.path(), datafile, executor, 4, "", projects);

    let report = run.run().await.expect("run failed");

    assert_eq!(report.skipped, ["B", "A"]);
    assert_eq!(report.submitted_count(), 0);
    assert!(!root.path().join("src/a/built").exists());
    assert!(!root.path().join("src/b/built").exists());
    assert!(!cmdlog.exists(), "no command reaches the executor");
}

/// Test: a failing build does not stop its siblings or the run
#[tokio::test]
async fn test_failed_build_is_isolated() {
    let root = tempfile::tempdir().unwrap();
    let datafile = write_datafile(root.path(), "src/a/main.go\nsrc/b/main.go\nsrc/c/main.go\n");

    let projects = vec![
        project(root.path(), "A", "src/a", "touch built", 0),
        project(root.path(), "B", "src/b", "false", 0),
        project(root.path(), "C", "src/c", "touch built", 0),
    ];
    let run = affected_run(root.path(), datafile, CommandExecutor::new(false), 3, "", projects);

    let report = run.run().await.expect("run failed");

    assert_eq!(report.succeeded, ["A", "C"]);
    assert_eq!(report.failed, ["B"]);
    assert!(root.path().join("src/a/built").exists());
    assert!(root.path().join("src/c/built").exists());
}

/// Test: ignored projects are never built
#[tokio::test]
async fn test_ignored_project_is_not_built() {
    let root = tempfile::tempdir().unwrap();
    let datafile = write_datafile(root.path(), "src/a/main.go\nsrc/b/main.go\n");

    let projects = vec![
        project(root.path(), "A", "src/a", "touch built", 5),
        project(root.path(), "B", "src/b", "touch built", 1),
    ];
    let run = affected_run(root.path(), datafile, CommandExecutor::new(false), 2, "A", projects);

    let report = run.run().await.expect("run failed");

    assert_eq!(report.succeeded, ["B"]);
    assert!(!root.path().join("src/a/built").exists());
}

/// Test: an unreadable change set runs nothing and fails the run
#[tokio::test]
async fn test_unreadable_change_set_fails_run() {
    let root = tempfile::tempdir().unwrap();
    let projects = vec![project(root.path(), "A", "src/a", "touch built", 0)];
    let run = affected_run(
        root.path(),
        root.path().join("missing.txt"),
        CommandExecutor::new(false),
        1,
        "",
        projects,
    );

    let err = run.run().await.unwrap_err();

    assert!(matches!(err, MrbuildError::ChangeSet(_)));
    assert!(!root.path().join("src/a/built").exists());
}

/// Test: a config file drives the whole run, including repo-root builds
#[tokio::test]
async fn test_run_from_config_file() {
    let root = tempfile::tempdir().unwrap();
    let datafile = write_datafile(root.path(), "services/api/handler.go\n");
    let config_path = root.path().join("mrbuild.toml");
    std::fs::write(
        &config_path,
        r#"
[pool]
workers = 2

[[projects]]
name = "api"
folder = "services/api"
patterns = [".*\\.go"]

[projects.build]
cmd = "touch api-built"
folder = "."

[[projects]]
name = "web"
folder = "services/web"
patterns = [".*\\.ts"]

[projects.build]
cmd = "touch web-built"
folder = "."
"#,
    )
    .unwrap();

    let file = FileConfig::load(&config_path).unwrap();
    let overrides = Overrides {
        datafile: Some(datafile.clone()),
        ..Overrides::default()
    };
    let settings = Settings::resolve(
        file,
        Some(config_path),
        overrides,
        root.path().to_path_buf(),
    )
    .unwrap();
    assert_eq!(settings.repo_root, root.path());
    settings.check_datafile().unwrap();

    let executor = CommandExecutor::from_settings(&settings);
    let provider = ChangeSetProvider::new(
        ChangeSource::Datafile(datafile),
        &settings.working_dir,
        executor.clone(),
    );
    let run = AffectedRun::new(
        provider,
        ProjectMatcher::from_settings(&settings),
        Dispatcher::from_settings(&settings, Arc::new(executor)),
        settings.projects.clone(),
    );

    let report = run.run().await.expect("run failed");

    assert_eq!(report.succeeded, ["api"]);
    assert!(root.path().join("api-built").exists());
    assert!(!root.path().join("web-built").exists());
}
