//! Discovery worker: walks a resource root and queues a root task for
//! every file the compiler is willing to convert.

use std::path::Path;

use walkdir::WalkDir;

use crate::compiler::{Compiler, CompilerHost};

/// Fixed test-fixture path skipped regardless of rule registration,
/// mirroring the original discovery worker's hard-coded exclusion.
const TEST_FIXTURES_DIR: &str = "testing";

/// Recursively lists `root`; for each file the compiler allows, asks the
/// registered rules for a root task and queues it. Skips the
/// intermediate/output trees, `.git` directories, and the fixed
/// test-fixtures path.
pub fn discover(host: &CompilerHost, root: &Path) -> usize {
    let mut queued = 0;

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() {
                if entry.file_name() == TEST_FIXTURES_DIR {
                    return false;
                }
                return host.should_iterate_directory(entry.path());
            }
            true
        })
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if !host.should_iterate_file(entry.path()) {
            continue;
        }

        if let Some(task_id) = host.get_task(entry.path(), true) {
            host.queue.queue_task(task_id, &host.tasks);
            queued += 1;
        }
    }

    queued
}
