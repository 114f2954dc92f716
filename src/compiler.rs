//! Compiler host: the service locator every converter talks to, and the
//! owner of every shared resource the scheduler touches.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::{CompilerConfig, ProjectPaths};
use crate::converter::{ConverterFactory, ConverterInfo};
use crate::converter_guard::ConverterGuard;
use crate::dependency::Dependency;
use crate::error::{AssetPipelineError, Result};
use crate::hash::FileHashCache;
use crate::rule::ConversionRule;
use crate::task::{ConversionTask, TaskId, TaskStatus, UNKNOWN_CONVERTER_ID};
use crate::task_queue::{TaskQueue, TaskTable};

thread_local! {
    static ERROR_FLAG: Cell<bool> = const { Cell::new(false) };
    static WARNING_FLAG: Cell<bool> = const { Cell::new(false) };
    /// The only other legitimate thread-local: the task currently being
    /// processed by this worker, so nested compiler calls (from inside a
    /// converter) know which task's sub-task set and owning-thread id to
    /// touch. Cleared on every yield, per the suspension invariant.
    static CURRENT_TASK: RefCell<Option<TaskId>> = const { RefCell::new(None) };
}

/// Reads and clears this thread's error/warning flags, honored by the
/// processor immediately after each converter call returns.
pub fn take_error_flags() -> (bool, bool) {
    let error = ERROR_FLAG.with(|f| f.replace(false));
    let warning = WARNING_FLAG.with(|f| f.replace(false));
    (error, warning)
}

pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(|c| *c.borrow())
}

pub fn set_current_task(task: Option<TaskId>) {
    CURRENT_TASK.with(|c| *c.borrow_mut() = task);
}

/// The converter-facing subset of the compiler's surface: dependency
/// resolution, hashing, error flags, and path resolution. Registration,
/// task-queue access, and lifecycle hooks are not exposed here because
/// converters never call them directly.
pub trait Compiler: Send + Sync {
    fn ensure_up_to_date(&self, dep: &Dependency) -> (bool, Option<TaskId>);
    fn get_source_file(&self, path: &Path) -> Option<PathBuf>;
    fn get_hash(&self, dep: &Dependency) -> u64;
    fn get_file_hash(&self, path: &Path, force: bool) -> u64;
    fn get_directory_hash(&self, dir: &Path, pattern: &str, is_regex: bool, recursive: bool) -> u64;

    fn set_error(&self, message: &str);
    fn set_warning(&self, message: &str);

    fn should_iterate_file(&self, path: &Path) -> bool;
    fn should_iterate_directory(&self, path: &Path) -> bool;

    fn resolve_source_path(&self, path: &Path) -> PathBuf;
    fn resolve_intermediate_path(&self, path: &Path) -> PathBuf;
    fn resolve_output_path(&self, path: &Path) -> PathBuf;

    fn on_output_generated(&self, path: &Path);
}

/// Lifecycle hooks observers (UI, JIT daemon, tests) attach to. Every
/// method has a no-op default so an observer only needs to implement the
/// hooks it cares about.
#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    fn on_task_started(&self, source: &Path) {}
    fn on_task_resumed(&self, source: &Path) {}
    fn on_task_suspended(&self, source: &Path) {}
    fn on_task_completed(&self, source: &Path, status: TaskStatus, log: &[String]) {}
    fn on_pre_create_dependencies(&self, source: &Path) {}
    fn on_post_create_dependencies(&self, source: &Path) {}
    fn on_pre_convert(&self, source: &Path) {}
    fn on_post_convert(&self, source: &Path) {}
    fn on_output_generated(&self, path: &Path) {}
    fn on_cache_read(&self, hash: u64) {}
    fn on_cache_read_miss(&self, hash: u64) {}
    fn on_cache_write(&self, hash: u64) {}
    fn on_cache_write_miss(&self, hash: u64) {}
    fn on_asset_requested(&self, logical_path: &str) {}
}

#[derive(Default)]
pub struct NullObserver;
impl Observer for NullObserver {}

pub(crate) struct ConverterEntry {
    pub info: ConverterInfo,
    pub factory: Box<dyn ConverterFactory>,
    pub guard: Arc<ConverterGuard>,
}

/// A simple counting semaphore: every `on_task_started`/`on_task_resumed`
/// acquires one permit, every `_suspended`/`_completed` releases one. Pause
/// acquires every permit, blocking until all in-flight slots are idle.
pub struct Semaphore {
    available: Mutex<usize>,
    capacity: usize,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self { available: Mutex::new(capacity), capacity, cond: Condvar::new() }
    }

    pub fn acquire(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.cond.wait(&mut available);
        }
        *available -= 1;
    }

    pub fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.cond.notify_one();
    }

    /// Blocks until every permit is free, then holds them all until the
    /// returned guard is dropped.
    pub fn pause(&self) -> SemaphorePauseGuard<'_> {
        let mut available = self.available.lock();
        while *available != self.capacity {
            self.cond.wait(&mut available);
        }
        *available = 0;
        SemaphorePauseGuard { semaphore: self }
    }
}

pub struct SemaphorePauseGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePauseGuard<'_> {
    fn drop(&mut self) {
        let mut available = self.semaphore.available.lock();
        *available = self.semaphore.capacity;
        self.semaphore.cond.notify_all();
    }
}

/// Owns every shared resource the scheduler, discovery worker and
/// converters touch: the task intern table and queue, the registered
/// rules/converters, the hash and content caches, and the
/// pause/terminate controls.
pub struct CompilerHost {
    pub paths: ProjectPaths,
    pub config: CompilerConfig,
    pub cache: Cache,
    pub file_hash_cache: FileHashCache,
    pub tasks: TaskTable,
    pub queue: TaskQueue,
    pub semaphore: Semaphore,
    rules: RwLock<Vec<Box<dyn ConversionRule>>>,
    converters: RwLock<HashMap<u64, ConverterEntry>>,
    observer: RwLock<Arc<dyn Observer>>,
    terminated: std::sync::atomic::AtomicBool,
}

impl CompilerHost {
    pub fn new(paths: ProjectPaths, config: CompilerConfig, cache: Cache) -> Self {
        let num_threads = config.num_threads;
        Self {
            paths,
            config,
            cache,
            file_hash_cache: FileHashCache::new(),
            tasks: TaskTable::new(),
            queue: TaskQueue::new(),
            semaphore: Semaphore::new(num_threads.max(1)),
            rules: RwLock::new(Vec::new()),
            converters: RwLock::new(HashMap::new()),
            observer: RwLock::new(Arc::new(NullObserver)),
            terminated: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn Observer>) {
        *self.observer.write() = observer;
    }

    pub fn observer(&self) -> Arc<dyn Observer> {
        self.observer.read().clone()
    }

    pub fn register_conversion_rule(&self, rule: Box<dyn ConversionRule>) {
        self.rules.write().push(rule);
    }

    pub fn register_converter(
        &self,
        info: ConverterInfo,
        factory: Box<dyn ConverterFactory>,
    ) -> Result<()> {
        let mut converters = self.converters.write();
        if converters.contains_key(&info.type_id) {
            return Err(AssetPipelineError::DuplicateConverter(info.type_id));
        }
        let guard = Arc::new(ConverterGuard::new());
        converters.insert(info.type_id, ConverterEntry { info, factory, guard });
        Ok(())
    }

    pub fn converter_version(&self, converter_id: u64) -> Option<String> {
        self.converters.read().get(&converter_id).map(|e| e.info.version.clone())
    }

    pub fn converter_guard(&self, converter_id: u64) -> Option<Arc<ConverterGuard>> {
        self.converters.read().get(&converter_id).map(|e| e.guard.clone())
    }

    pub fn is_thread_safe(&self, converter_id: u64) -> bool {
        self.converters
            .read()
            .get(&converter_id)
            .map(|e| e.info.flags.contains(crate::converter::ConverterFlags::THREAD_SAFE))
            .unwrap_or(false)
    }

    pub fn converter_flags(&self, converter_id: u64) -> Option<crate::converter::ConverterFlags> {
        self.converters.read().get(&converter_id).map(|e| e.info.flags)
    }

    pub fn create_converter(&self, converter_id: u64, params: &str) -> Option<Box<dyn crate::converter::Converter>> {
        self.converters.read().get(&converter_id).map(|e| e.factory.create(params))
    }

    pub fn terminate(&self) {
        self.terminated.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Returns the existing interned task for `path`, or tries each
    /// registered rule in LIFO (most-recently-registered-first) order to
    /// create one. A non-root path whose rule cannot be matched is still
    /// interned, with `converter_id = UNKNOWN` and status pre-`FAILED`, so
    /// upstream callers see a deterministic sentinel instead of `None`.
    pub fn get_task(&self, path: &Path, root_only: bool) -> Option<TaskId> {
        let canonical = self.paths.resolve_source_path(path);
        if let Some(id) = self.tasks.lookup(&canonical) {
            return Some(id);
        }

        let decision = self.rules.read().iter().rev().find_map(|rule| rule.matches(&canonical));

        match decision {
            Some(decision) => {
                let version = self
                    .converter_version(decision.converter_id)
                    .unwrap_or_default();
                let task = ConversionTask::new(
                    canonical.clone(),
                    decision.converter_id,
                    version,
                    decision.converter_params,
                );
                Some(self.tasks.insert_or_get(canonical, task))
            }
            None if root_only => None,
            None => {
                let task = ConversionTask::unknown(canonical.clone());
                Some(self.tasks.insert_or_get(canonical, task))
            }
        }
    }
}

impl Compiler for CompilerHost {
    /// Requests that `dep` be up to date, returning whether it currently
    /// is and, for dependency kinds that resolve to another task, that
    /// task's id so Stage B can record the sub-task edge.
    fn ensure_up_to_date(&self, dep: &Dependency) -> (bool, Option<TaskId>) {
        match dep {
            Dependency::SourceFile { path, .. } => {
                (path.exists(), None)
            }
            Dependency::IntermediateFile { path, .. } => {
                let absolute = self.paths.resolve_intermediate_path(path);
                if absolute.exists() {
                    return (true, None);
                }
                let source_candidates = self.reverse_lookup_candidates(&absolute);
                match source_candidates.into_iter().find_map(|src| self.get_task(&src, false)) {
                    Some(task_id) => {
                        let ready = self.tasks.get(task_id).status() == TaskStatus::Done;
                        (ready, Some(task_id))
                    }
                    None => (false, None),
                }
            }
            Dependency::OutputFile { path, .. } => {
                let absolute = self.paths.resolve_output_path(path);
                if absolute.exists() {
                    return (true, None);
                }
                let source_candidates = self.reverse_lookup_candidates(&absolute);
                match source_candidates.into_iter().find_map(|src| self.get_task(&src, false)) {
                    Some(task_id) => {
                        let ready = self.tasks.get(task_id).status() == TaskStatus::Done;
                        (ready, Some(task_id))
                    }
                    None => (false, None),
                }
            }
            Dependency::Converter { id, version, .. } => {
                (self.converter_version(*id).as_deref() == Some(version.as_str()), None)
            }
            Dependency::ConverterParams { .. } => (true, None),
            Dependency::Directory { .. } => (true, None),
            Dependency::Invalid => (false, None),
        }
    }

    fn get_source_file(&self, path: &Path) -> Option<PathBuf> {
        let absolute = self.paths.resolve_source_path(path);
        absolute.exists().then_some(absolute)
    }

    fn get_hash(&self, dep: &Dependency) -> u64 {
        match dep {
            Dependency::SourceFile { path, .. }
            | Dependency::IntermediateFile { path, .. }
            | Dependency::OutputFile { path, .. } => self.get_file_hash(path, false),
            Dependency::Converter { id, version, .. } => {
                crate::hash::combine_all([*id, crate::hash::hash_str(version)])
            }
            Dependency::ConverterParams { params, .. } => crate::hash::hash_str(params),
            Dependency::Directory { path, pattern, is_regex, recursive, .. } => {
                self.get_directory_hash(path, pattern, *is_regex, *recursive)
            }
            Dependency::Invalid => 0,
        }
    }

    fn get_file_hash(&self, path: &Path, force: bool) -> u64 {
        self.file_hash_cache.file_hash(path, force)
    }

    fn get_directory_hash(&self, dir: &Path, pattern: &str, is_regex: bool, recursive: bool) -> u64 {
        crate::hash::directory_hash(&self.file_hash_cache, dir, pattern, is_regex, recursive)
    }

    fn set_error(&self, message: &str) {
        ERROR_FLAG.with(|f| f.set(true));
        warn!(target: "asset_pipeline", "{message}");
    }

    fn set_warning(&self, message: &str) {
        WARNING_FLAG.with(|f| f.set(true));
        info!(target: "asset_pipeline", "{message}");
    }

    fn should_iterate_file(&self, path: &Path) -> bool {
        !self.is_under_excluded_tree(path)
    }

    fn should_iterate_directory(&self, path: &Path) -> bool {
        if path.file_name().map(|n| n == ".git").unwrap_or(false) {
            return false;
        }
        !self.is_under_excluded_tree(path)
    }

    fn resolve_source_path(&self, path: &Path) -> PathBuf {
        self.paths.resolve_source_path(path)
    }

    fn resolve_intermediate_path(&self, path: &Path) -> PathBuf {
        self.paths.resolve_intermediate_path(path)
    }

    fn resolve_output_path(&self, path: &Path) -> PathBuf {
        self.paths.resolve_output_path(path)
    }

    fn on_output_generated(&self, path: &Path) {
        self.observer().on_output_generated(path);
    }
}

impl CompilerHost {
    fn is_under_excluded_tree(&self, path: &Path) -> bool {
        path.starts_with(&self.paths.intermediate_path) || path.starts_with(&self.paths.output_path)
    }

    fn reverse_lookup_candidates(&self, absolute_output: &Path) -> Vec<PathBuf> {
        self.rules.read().iter().flat_map(|rule| rule.reverse_lookup(absolute_output)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_pause_blocks_until_all_permits_free() {
        let sem = Semaphore::new(2);
        sem.acquire();
        assert_eq!(*sem.available.lock(), 1);
        sem.release();
        let _guard = sem.pause();
        assert_eq!(*sem.available.lock(), 0);
    }

    #[test]
    fn error_flags_reset_between_reads() {
        take_error_flags();
        ERROR_FLAG.with(|f| f.set(true));
        let (error, warning) = take_error_flags();
        assert!(error);
        assert!(!warning);
        assert_eq!(take_error_flags(), (false, false));
    }
}
