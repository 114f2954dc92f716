//! File-system watcher driving the JIT daemon's re-build-on-change loop.
//!
//! A modification under any registered resource root invalidates that
//! path's cached hash, looks up every task the reverse dependency map
//! says depends on it, and resets each back to `New` so the scheduler
//! picks it up again. New files are additionally run through discovery
//! so a freshly-dropped source file gets its own task.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::compiler::CompilerHost;
use crate::error::{AssetPipelineError, Result};
use crate::task::TaskStatus;

use super::reverse_deps::ReverseDependencyMap;

/// Owns the reverse dependency index and the live `notify` watcher handle.
pub struct ResourceWatcher {
    reverse_deps: Arc<ReverseDependencyMap>,
}

impl ResourceWatcher {
    pub fn new() -> Self {
        Self { reverse_deps: Arc::new(ReverseDependencyMap::new()) }
    }

    pub fn reverse_deps(&self) -> Arc<ReverseDependencyMap> {
        self.reverse_deps.clone()
    }

    /// Records the dependency edges a task just captured in Stage B, so a
    /// later change to one of those inputs maps back to this task. Called
    /// by the daemon's completion hook, not by the batch builder.
    pub fn record_task(&self, host: &CompilerHost, task_id: crate::task::TaskId) {
        let deps = host.tasks.get(task_id).deps.lock().clone();
        self.reverse_deps.record(task_id, &deps);
    }

    /// Starts watching every resource root in `host.paths`, debouncing
    /// bursts of events (editors often emit several writes per save) by
    /// `debounce`. Returns the live watcher handle; dropping it stops
    /// watching.
    pub fn watch(&self, host: Arc<CompilerHost>, debounce: Duration) -> Result<RecommendedWatcher> {
        let reverse_deps = self.reverse_deps.clone();
        let mut pending: Vec<std::path::PathBuf> = Vec::new();
        let mut last_event = std::time::Instant::now();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else { return };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                for path in event.paths {
                    pending.push(path);
                }
                if last_event.elapsed() < debounce && !pending.is_empty() {
                    return;
                }
                last_event = std::time::Instant::now();
                for path in pending.drain(..) {
                    handle_path_change(&host, &reverse_deps, &path);
                }
            },
            Config::default(),
        )
        .map_err(|source| AssetPipelineError::Watch(source.to_string()))?;

        for root in &host.paths.resource_roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|source| AssetPipelineError::Watch(source.to_string()))?;
        }

        Ok(watcher)
    }
}

impl Default for ResourceWatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_path_change(host: &CompilerHost, reverse_deps: &ReverseDependencyMap, path: &Path) {
    host.file_hash_cache.invalidate(path);

    let affected = reverse_deps.affected_by(path);
    if affected.is_empty() {
        if let Some(task_id) = host.get_task(path, true) {
            host.queue.queue_task_front(task_id, &host.tasks);
        }
        return;
    }

    for task_id in affected {
        let task = host.tasks.get(task_id);
        task.sub_tasks.lock().clear();
        task.clear_owning_thread();
        task.set_status(TaskStatus::New);
        drop(task);
        host.queue.queue_task_front(task_id, &host.tasks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{CompilerConfig, ProjectPaths};
    use crate::dependency::Dependency;
    use crate::dependency_list::DependencyList;
    use crate::task::{ConversionTask, TaskId};
    use std::path::PathBuf;

    #[test]
    fn changed_path_resets_and_requeues_its_task() {
        let paths = ProjectPaths::new(vec![PathBuf::from("/res")], PathBuf::from("/int"), PathBuf::from("/out"));
        let host = CompilerHost::new(paths, CompilerConfig::default(), Cache::disabled());

        let task = ConversionTask::new(PathBuf::from("/res/model.obj"), 1, "1.0".into(), String::new());
        task.set_status(TaskStatus::Done);
        let task_id = host.tasks.insert_or_get(PathBuf::from("/res/model.obj"), task);

        let watcher = ResourceWatcher::new();
        let mut deps = DependencyList::new();
        deps.primary_inputs.push((
            Dependency::SourceFile { path: PathBuf::from("/res/model.obj"), critical: true },
            0,
        ));
        watcher.reverse_deps().record(task_id, &deps);

        handle_path_change(&host, &watcher.reverse_deps(), Path::new("/res/model.obj"));

        assert_eq!(host.tasks.get(task_id).status(), TaskStatus::New);
        assert_eq!(host.queue.len(), 1);
    }

    #[test]
    fn unrelated_change_under_a_root_is_discovered_as_a_new_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("new.obj"), "x").unwrap();

        let paths = ProjectPaths::new(
            vec![dir.path().to_path_buf()],
            dir.path().join("_intermediate"),
            dir.path().join("_output"),
        );
        let host = CompilerHost::new(paths, CompilerConfig::default(), Cache::disabled());

        struct AcceptsObj;
        impl crate::rule::ConversionRule for AcceptsObj {
            fn matches(&self, path: &Path) -> Option<crate::rule::ConversionDecision> {
                path.extension().map(|e| e == "obj").unwrap_or(false).then(|| crate::rule::ConversionDecision {
                    converter_id: 1,
                    converter_version: "1.0".into(),
                    converter_params: String::new(),
                })
            }
        }
        host.register_conversion_rule(Box::new(AcceptsObj));

        let watcher = ResourceWatcher::new();
        handle_path_change(&host, &watcher.reverse_deps(), &dir.path().join("new.obj"));

        assert_eq!(host.tasks.len(), 1);
        assert_eq!(host.queue.len(), 1);
    }
}
