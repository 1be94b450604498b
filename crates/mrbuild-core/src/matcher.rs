//! Project matching against a change set.
//!
//! Matching runs regular expressions over the raw change set text rather than
//! over a parsed list of paths, so a pattern may match part of a path or span
//! what a path splitter would treat as separate entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::build::AffectedBuild;
use crate::changeset::ChangeSet;
use crate::config::{IgnoreList, Project, Settings, REPO_ROOT_FOLDER};

/// Decides which configured projects a change set affects.
#[derive(Debug, Clone, Default)]
pub struct ProjectMatcher {
    ignore: IgnoreList,
    repo_root: PathBuf,
    env: BTreeMap<String, String>,
}

impl ProjectMatcher {
    /// `repo_root` is where builds with a `"."` folder override run.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ..Self::default()
        }
    }

    pub fn with_ignore(mut self, ignore: IgnoreList) -> Self {
        self.ignore = ignore;
        self
    }

    /// Variables applied to every build underneath each project's own.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.repo_root)
            .with_ignore(settings.ignore.clone())
            .with_env(settings.env.clone())
    }

    /// Builds for every affected project, in configured order.
    ///
    /// Ignored projects are skipped with a warning. A project with a malformed
    /// pattern is skipped without affecting the others.
    pub fn match_projects(&self, projects: &[Project], change_set: &ChangeSet) -> Vec<AffectedBuild> {
        projects
            .iter()
            .filter(|project| {
                let ignored = self.ignore.is_ignored(&project.name);
                if ignored {
                    warn!(project = %project.name, "Ignoring project");
                }
                !ignored
            })
            .filter(|project| is_affected(project, change_set.as_str()))
            .map(|project| self.affected_build(project))
            .collect()
    }

    fn affected_build(&self, project: &Project) -> AffectedBuild {
        let mut env = self.env.clone();
        env.extend(project.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        AffectedBuild {
            name: project.name.clone(),
            directory: self.working_dir(project),
            command: project.build.cmd.clone(),
            env,
            order: project.order,
        }
    }

    fn working_dir(&self, project: &Project) -> PathBuf {
        match project.build.folder.as_str() {
            "" => PathBuf::from(&project.folder),
            REPO_ROOT_FOLDER => self.repo_root.clone(),
            folder => Path::new(folder).to_path_buf(),
        }
    }
}

/// Whether any of the project's patterns matches somewhere in `text`.
///
/// Stops at the first matching pattern. A pattern that fails to compile
/// before a match is found rules the project out.
fn is_affected(project: &Project, text: &str) -> bool {
    for pattern in &project.patterns {
        let composite = format!("(?m){}/{}", project.folder, pattern);
        let re = match Regex::new(&composite) {
            Ok(re) => re,
            Err(e) => {
                warn!(
                    project = %project.name,
                    pattern = %composite,
                    error = %e,
                    "Invalid project pattern, skipping project"
                );
                return false;
            }
        };

        if re.is_match(text) {
            debug!(project = %project.name, pattern = %composite, "Project affected");
            return true;
        }
    }

    false
}
