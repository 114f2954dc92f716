//! Conversion task: one source file's build state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::dependency_list::DependencyList;

/// Sentinel converter id recorded on a task whose rule could not be
/// matched. Queries against it are deterministic: always `FAILED`, no
/// build is ever attempted.
pub const UNKNOWN_CONVERTER_ID: u64 = 0;

/// Forward-only state machine, except the explicit reset back to `New` a
/// JIT re-queue performs.
///
/// `New -> Queued -> Processing -> NeedsPrimaryDeps -> NeedsSecondaryDeps
/// -> NeedsConversion -> Done`, and any non-terminal state can move to
/// `Failed`. `NeedsSecondaryDeps` is the only suspendable state: the
/// processor may return from it without reaching `NeedsConversion`, leaving
/// status exactly there until the task is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskStatus {
    New,
    Queued,
    Processing,
    NeedsPrimaryDeps,
    NeedsSecondaryDeps,
    NeedsConversion,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// Identifies a task within the intern table's arena. Cheap to copy; the
/// authoritative state lives behind the `TaskTable`'s lock, indexed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

/// One source file's build state: status, owning worker thread (0 = none),
/// the converter chosen for it, and its current dependency list.
///
/// `sub_tasks` is rebuilt before every convert attempt; edges never
/// survive across attempts, per the invariant that a task's sub-task set
/// reflects only its most recent Stage B pass.
pub struct ConversionTask {
    pub source_path: PathBuf,
    pub converter_id: u64,
    pub converter_version: String,
    pub converter_params: String,
    status: Mutex<TaskStatus>,
    /// OS thread id of the worker currently owning this task, or `0`. Used
    /// only for the cycle-detection rule in Stage B - never for mutual
    /// exclusion, that is the converter guard's job.
    owning_thread: AtomicU64,
    pub deps: Mutex<DependencyList>,
    pub sub_tasks: Mutex<Vec<TaskId>>,
    pub log: Mutex<Vec<String>>,
}

impl ConversionTask {
    pub fn new(source_path: PathBuf, converter_id: u64, converter_version: String, converter_params: String) -> Self {
        Self {
            source_path,
            converter_id,
            converter_version,
            converter_params,
            status: Mutex::new(TaskStatus::New),
            owning_thread: AtomicU64::new(0),
            deps: Mutex::new(DependencyList::new()),
            sub_tasks: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Creates the deterministic `FAILED` sentinel task for a path no
    /// registered rule could match in non-root discovery.
    pub fn unknown(source_path: PathBuf) -> Self {
        let task = Self::new(source_path, UNKNOWN_CONVERTER_ID, String::new(), String::new());
        *task.status.lock() = TaskStatus::Failed;
        task
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: TaskStatus) {
        *self.status.lock() = status;
    }

    pub fn owning_thread(&self) -> u64 {
        self.owning_thread.load(Ordering::Acquire)
    }

    pub fn set_owning_thread(&self, thread_id: u64) {
        self.owning_thread.store(thread_id, Ordering::Release);
    }

    pub fn clear_owning_thread(&self) {
        self.owning_thread.store(0, Ordering::Release);
    }

    pub fn push_log(&self, message: impl Into<String>) {
        self.log.lock().push(message.into());
    }

    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut self.log.lock())
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }
}

impl std::fmt::Debug for ConversionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionTask")
            .field("source_path", &self.source_path)
            .field("status", &self.status())
            .field("converter_id", &self.converter_id)
            .finish()
    }
}
