//! Reverse dependency index: given a file path that just changed on disk,
//! which tasks need to be re-run?
//!
//! Built incrementally as each task finishes Stage B: every path-shaped
//! input it recorded (`SourceFile`/`IntermediateFile`/`OutputFile`) is
//! indexed directly, and every `Directory` input is kept as a
//! glob-or-regex pattern so a new or renamed file under a watched
//! directory is caught too.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use regex::Regex;

use crate::dependency::Dependency;
use crate::dependency_list::DependencyList;
use crate::task::TaskId;

struct DirectoryWatch {
    dir: PathBuf,
    pattern: String,
    is_regex: bool,
    recursive: bool,
    task: TaskId,
}

/// Maps resolved input paths and directory patterns back to the tasks
/// that depend on them, so the watcher can translate a single file-system
/// event into the set of tasks to re-queue.
#[derive(Default)]
pub struct ReverseDependencyMap {
    by_path: RwLock<HashMap<PathBuf, HashSet<TaskId>>>,
    directories: RwLock<Vec<DirectoryWatch>>,
    /// The paths/directories each task last registered, so re-recording
    /// after a rebuild first removes the stale edges rather than
    /// accumulating them forever.
    forward: RwLock<HashMap<TaskId, Vec<PathBuf>>>,
}

impl ReverseDependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `task`'s edges with those implied by its freshly-recorded
    /// dependency list. Safe to call repeatedly; each call first removes
    /// the task's previous edges.
    pub fn record(&self, task: TaskId, deps: &DependencyList) {
        self.forget(task);

        let mut by_path = self.by_path.write();
        let mut directories = self.directories.write();
        let mut forward = self.forward.write();
        let mut forward_paths = Vec::new();

        for (dep, _hash) in deps.primary_inputs.iter().chain(deps.secondary_inputs.iter()) {
            match dep {
                Dependency::SourceFile { path, .. }
                | Dependency::IntermediateFile { path, .. }
                | Dependency::OutputFile { path, .. } => {
                    by_path.entry(path.clone()).or_default().insert(task);
                    forward_paths.push(path.clone());
                }
                Dependency::Directory { path, pattern, is_regex, recursive, .. } => {
                    directories.push(DirectoryWatch {
                        dir: path.clone(),
                        pattern: pattern.clone(),
                        is_regex: *is_regex,
                        recursive: *recursive,
                        task,
                    });
                    forward_paths.push(path.clone());
                }
                Dependency::Converter { .. } | Dependency::ConverterParams { .. } | Dependency::Invalid => {}
            }
        }

        forward.insert(task, forward_paths);
    }

    /// Removes every edge previously recorded for `task`.
    pub fn forget(&self, task: TaskId) {
        let Some(paths) = self.forward.write().remove(&task) else { return };
        let mut by_path = self.by_path.write();
        for path in &paths {
            if let Some(set) = by_path.get_mut(path) {
                set.remove(&task);
                if set.is_empty() {
                    by_path.remove(path);
                }
            }
        }
        self.directories.write().retain(|watch| watch.task != task);
    }

    /// Every task that depends on `path`, directly or through a matching
    /// directory watch.
    pub fn affected_by(&self, path: &Path) -> Vec<TaskId> {
        let mut found: HashSet<TaskId> = self.by_path.read().get(path).cloned().unwrap_or_default();

        let Some(parent) = path.parent() else { return found.into_iter().collect() };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return found.into_iter().collect();
        };

        for watch in self.directories.read().iter() {
            let under = if watch.recursive {
                parent.starts_with(&watch.dir)
            } else {
                parent == watch.dir
            };
            if !under {
                continue;
            }
            let matches = if watch.is_regex {
                Regex::new(&watch.pattern).map(|re| re.is_match(name)).unwrap_or(false)
            } else {
                crate::hash::glob_match(&watch.pattern, name)
            };
            if matches {
                found.insert(watch.task);
            }
        }

        found.into_iter().collect()
    }
}
