//! Task interning and the pending-work queue.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::task::{ConversionTask, TaskId, TaskStatus};

/// Tasks interned by absolute source path. Lookup takes the shared lock;
/// insertion takes the exclusive lock under a second pass so a concurrent
/// lookup never races a first insert into a duplicate entry.
#[derive(Default)]
pub struct TaskTable {
    arena: RwLock<Vec<ConversionTask>>,
    by_path: RwLock<HashMap<PathBuf, TaskId>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, path: &Path) -> Option<TaskId> {
        self.by_path.read().get(path).copied()
    }

    pub fn get(&self, id: TaskId) -> parking_lot::MappedRwLockReadGuard<'_, ConversionTask> {
        parking_lot::RwLockReadGuard::map(self.arena.read(), |arena| &arena[id.0])
    }

    /// Inserts `task` under `path` unless another thread already won the
    /// race; returns the winning id either way.
    pub fn insert_or_get(&self, path: PathBuf, task: ConversionTask) -> TaskId {
        if let Some(existing) = self.lookup(&path) {
            return existing;
        }

        let mut by_path = self.by_path.write();
        if let Some(existing) = by_path.get(&path) {
            return *existing;
        }

        let mut arena = self.arena.write();
        let id = TaskId(arena.len());
        arena.push(task);
        by_path.insert(path, id);
        id
    }

    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-protected deque of queued task ids. `queue_task` pushes to the
/// back; `queue_task_front` (used for explicit client requests and
/// resumed sub-tasks) removes any existing back-entry for the same task
/// first, then pushes to the front. `get_next_task` pops the front and
/// flips status `Queued -> Processing`.
#[derive(Default)]
pub struct TaskQueue {
    deque: parking_lot::Mutex<VecDeque<TaskId>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_task(&self, id: TaskId, table: &TaskTable) {
        table.get(id).set_status(TaskStatus::Queued);
        self.deque.lock().push_back(id);
    }

    pub fn queue_task_front(&self, id: TaskId, table: &TaskTable) {
        let mut deque = self.deque.lock();
        if let Some(pos) = deque.iter().rposition(|existing| *existing == id) {
            deque.remove(pos);
        }
        table.get(id).set_status(TaskStatus::Queued);
        deque.push_front(id);
    }

    pub fn get_next_task(&self, table: &TaskTable) -> Option<TaskId> {
        let id = self.deque.lock().pop_front()?;
        table.get(id).set_status(TaskStatus::Processing);
        Some(id)
    }

    pub fn has_tasks(&self) -> bool {
        !self.deque.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.deque.lock().len()
    }
}
