//! Task processor: the stage A/B/C conversion state machine, and the
//! scheduler driver that runs it across one or many worker threads.
//!
//! The processor is pure orchestration; it never reads file contents
//! itself, only through `Compiler::get_file_hash`/`Cache`/the converter.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::compiler::{set_current_task, take_error_flags, Compiler, CompilerHost};
use crate::converter::ConverterFlags;
use crate::dependency_list::DependencyList;
use crate::report;
use crate::task::{TaskId, TaskStatus, UNKNOWN_CONVERTER_ID};

/// Maximum number of retries for a locked-source I/O error under an
/// `UPGRADE_CONVERSION` converter, spread over roughly five seconds.
const UPGRADE_RETRY_ATTEMPTS: u32 = 5;
const UPGRADE_RETRY_DELAY: Duration = Duration::from_millis(1000);

fn deps_file_for(host: &CompilerHost, source: &Path) -> PathBuf {
    let relative = host.paths.relative_to_any_root(source);
    let mut deps_name = relative.into_os_string();
    deps_name.push(".deps");
    host.resolve_intermediate_path(Path::new(&deps_name))
}

fn load_dependency_list(path: &Path) -> Option<DependencyList> {
    let contents = std::fs::read_to_string(path).ok()?;
    DependencyList::from_xml(&contents).ok()
}

fn save_dependency_list(path: &Path, list: &DependencyList) -> bool {
    let Ok(xml) = list.to_xml() else { return false };
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    std::fs::write(path, xml).is_ok()
}

/// Runs one task through however many stages it can make progress on
/// before either finishing (`Done`/`Failed`) or suspending
/// (`NeedsConversion`, waiting on unfinished sub-tasks).
pub fn process_task(host: &CompilerHost, task_id: TaskId, worker_id: u64) {
    set_current_task(Some(task_id));
    host.tasks.get(task_id).set_owning_thread(worker_id);

    let source_path = host.tasks.get(task_id).source_path.clone();
    let entry_status = host.tasks.get(task_id).status();
    if entry_status == TaskStatus::Processing {
        host.observer().on_task_started(&source_path);
        report::task_started(&source_path);
    } else {
        host.observer().on_task_resumed(&source_path);
        report::task_resumed(&source_path);
    }

    host.semaphore.acquire();
    let outcome = run_stages(host, task_id, worker_id, &source_path);
    host.semaphore.release();

    match outcome {
        StageOutcome::Suspended => {
            host.observer().on_task_suspended(&source_path);
            report::task_suspended(&source_path, host.tasks.get(task_id).sub_tasks.lock().len());
        }
        StageOutcome::Finished => {
            let status = host.tasks.get(task_id).status();
            let log = host.tasks.get(task_id).take_log();
            host.observer().on_task_completed(&source_path, status, &log);
            report::task_completed(&source_path, status);
        }
    }

    host.tasks.get(task_id).clear_owning_thread();
    set_current_task(None);
}

enum StageOutcome {
    Finished,
    Suspended,
}

fn run_stages(host: &CompilerHost, task_id: TaskId, worker_id: u64, source_path: &Path) -> StageOutcome {
    if host.tasks.get(task_id).converter_id == UNKNOWN_CONVERTER_ID {
        host.tasks.get(task_id).set_status(TaskStatus::Failed);
        return StageOutcome::Finished;
    }

    if host.tasks.get(task_id).status() == TaskStatus::Processing {
        host.tasks.get(task_id).set_status(TaskStatus::NeedsPrimaryDeps);
        if !stage_a(host, task_id, source_path) {
            host.tasks.get(task_id).set_status(TaskStatus::Failed);
            return StageOutcome::Finished;
        }
        host.tasks.get(task_id).set_status(TaskStatus::NeedsSecondaryDeps);
    }

    if host.tasks.get(task_id).status() == TaskStatus::NeedsSecondaryDeps {
        match stage_b(host, task_id, worker_id, source_path) {
            StageBResult::Failed => {
                host.tasks.get(task_id).set_status(TaskStatus::Failed);
                return StageOutcome::Finished;
            }
            StageBResult::Ready => {
                host.tasks.get(task_id).set_status(TaskStatus::NeedsConversion);
            }
            StageBResult::NotReady => {
                host.tasks.get(task_id).set_status(TaskStatus::NeedsConversion);
                requeue_behind_sub_tasks(host, task_id);
                return StageOutcome::Suspended;
            }
        }
    }

    // `NeedsConversion` is re-entered unchanged on resume: re-check the
    // same sub-task gate rather than re-running Stage B.
    if !sub_tasks_are_terminal(host, task_id) {
        requeue_behind_sub_tasks(host, task_id);
        return StageOutcome::Suspended;
    }

    if stage_c(host, task_id, source_path) {
        host.tasks.get(task_id).set_status(TaskStatus::Done);
    } else {
        host.tasks.get(task_id).set_status(TaskStatus::Failed);
    }
    StageOutcome::Finished
}

/// Walks the `sub_tasks` edges each task's most recent Stage B pass
/// recorded, starting from `start`, to check whether `target` is
/// reachable - i.e. whether `start` is, at any depth, already waiting on
/// `target`. This is the multi-hop generalization of the single-worker
/// self-reference the `owning_thread` comparison above catches: it
/// detects a genuine A-waits-on-B-waits-on-A cycle regardless of which
/// worker thread ends up processing which task.
fn transitively_waits_on(host: &CompilerHost, start: TaskId, target: TaskId) -> bool {
    let mut stack = vec![start];
    let mut seen = std::collections::HashSet::new();
    while let Some(current) = stack.pop() {
        if current == target {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        stack.extend(host.tasks.get(current).sub_tasks.lock().iter().copied());
    }
    false
}

/// True once every recorded sub-task either reached a terminal state or
/// is now itself, transitively, waiting on this task - in which case
/// waiting on it further would never resolve, so it counts as ready.
/// Re-evaluated on every resume (not just the Stage B pass that first
/// recorded the edge), since two sub-tasks racing to suspend on each
/// other concurrently may not have recorded the cycle yet the first time
/// either is checked.
fn sub_tasks_are_terminal(host: &CompilerHost, task_id: TaskId) -> bool {
    host.tasks.get(task_id).sub_tasks.lock().iter().all(|sub_id| {
        let sub = host.tasks.get(*sub_id);
        matches!(sub.status(), TaskStatus::Done | TaskStatus::Failed)
            || transitively_waits_on(host, *sub_id, task_id)
    })
}

fn requeue_behind_sub_tasks(host: &CompilerHost, task_id: TaskId) {
    for sub_id in host.tasks.get(task_id).sub_tasks.lock().iter() {
        let sub = host.tasks.get(*sub_id);
        if !matches!(sub.status(), TaskStatus::Queued | TaskStatus::Processing | TaskStatus::Done | TaskStatus::Failed) {
            host.queue.queue_task_front(*sub_id, &host.tasks);
        }
    }
    host.queue.queue_task(task_id, &host.tasks);
}

/// Stage A: primary dependencies (source identity, converter, params).
fn stage_a(host: &CompilerHost, task_id: TaskId, source_path: &Path) -> bool {
    let (converter_id, converter_version, converter_params) = {
        let task = host.tasks.get(task_id);
        (task.converter_id, task.converter_version.clone(), task.converter_params.clone())
    };

    let up_to_date = {
        let deps = host.tasks.get(task_id).deps.lock();
        deps.has_valid_primary_header(source_path, converter_id, &converter_version, &converter_params)
            && deps.primary_inputs.len() >= 3
            && deps.primary_inputs.iter().all(|(dep, hash)| host.get_hash(dep) == *hash)
    };
    if up_to_date {
        return true;
    }

    host.observer().on_pre_create_dependencies(source_path);

    let mut deps = DependencyList::new();
    deps.initialise(source_path, converter_id, &converter_version, &converter_params);
    let primary_hash = deps.input_hash(false);
    let deps_path = deps_file_for(host, source_path);

    // A `.deps` file from a previous process invocation is read straight
    // off disk before consulting the cache: the cache is only configured
    // when `--cachePath` is set, but the file this process itself wrote
    // last run is always there regardless, and a fresh process starts
    // every task's in-memory `deps` empty, so without this the up-to-date
    // check above could never fire on a second real run.
    let mut accepted_from_disk = false;
    if let Some(restored) = load_dependency_list(&deps_path) {
        let primary_ok = restored.has_valid_primary_header(source_path, converter_id, &converter_version, &converter_params)
            && restored.primary_inputs.iter().all(|(dep, hash)| host.get_hash(dep) == *hash);
        let secondary_all_zero = restored.secondary_inputs.iter().all(|(_, hash)| *hash == 0);
        if primary_ok && secondary_all_zero {
            deps = restored;
            accepted_from_disk = true;
        }
    }

    let mut accepted_from_cache = false;
    if !accepted_from_disk && host.cache.is_enabled() {
        if host.cache.read(&deps_path, primary_hash) {
            host.observer().on_cache_read(primary_hash);
            if let Some(restored) = load_dependency_list(&deps_path) {
                let primary_ok = restored.has_valid_primary_header(source_path, converter_id, &converter_version, &converter_params)
                    && restored.primary_inputs.iter().all(|(dep, hash)| host.get_hash(dep) == *hash);
                let secondary_all_zero = restored.secondary_inputs.iter().all(|(_, hash)| *hash == 0);
                if primary_ok && secondary_all_zero {
                    deps = restored;
                    accepted_from_cache = true;
                    report::cache_hit(primary_hash);
                }
            }
        } else {
            host.observer().on_cache_read_miss(primary_hash);
            report::cache_miss(primary_hash);
        }
    }

    if !accepted_from_disk && !accepted_from_cache {
        let flags = host.converter_flags(converter_id).unwrap_or(ConverterFlags::empty());
        let guard = match host.converter_guard(converter_id) {
            Some(g) => g,
            None => return false,
        };
        let _handle = guard.enter(flags.contains(ConverterFlags::THREAD_SAFE));
        let Some(mut converter) = host.create_converter(converter_id, &converter_params) else {
            return false;
        };

        let (_, _) = take_error_flags();
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| {
            converter.create_dependencies(source_path, host, &mut deps)
        }));
        let (errored, _warned) = take_error_flags();

        match call {
            Ok(true) if !errored => {}
            Ok(_) => {
                host.tasks.get(task_id).push_log(format!("create_dependencies failed for {}", source_path.display()));
                report::converter_failed(source_path);
                return false;
            }
            Err(_) => {
                host.tasks.get(task_id).push_log(format!("create_dependencies panicked for {}", source_path.display()));
                report::converter_panicked(source_path);
                return false;
            }
        }

        for i in 0..deps.primary_inputs.len() {
            let hash = host.get_hash(&deps.primary_inputs[i].0);
            deps.set_primary_hash(i, hash);
        }

        save_dependency_list(&deps_path, &deps);
        if flags.contains(ConverterFlags::CACHE_DEPENDENCIES) {
            if host.cache.write(&deps_path, primary_hash) {
                host.observer().on_cache_write(primary_hash);
            } else {
                host.observer().on_cache_write_miss(primary_hash);
            }
        }
    }

    host.observer().on_post_create_dependencies(source_path);
    *host.tasks.get(task_id).deps.lock() = deps;
    true
}

enum StageBResult {
    Ready,
    NotReady,
    Failed,
}

/// Stage B: secondary dependencies. Records a `subTasks` edge for every
/// dependency that resolves to another task; the cycle rule treats a
/// sub-task that is, directly or transitively, already waiting on this
/// task (at any depth) as already up-to-date, since walking further would
/// never terminate.
fn stage_b(host: &CompilerHost, task_id: TaskId, worker_id: u64, source_path: &Path) -> StageBResult {
    let secondary: Vec<_> = host.tasks.get(task_id).deps.lock().secondary_inputs.clone();
    let mut sub_tasks = Vec::new();
    let mut not_ready = false;

    for (dep, _old_hash) in &secondary {
        let (mut is_ready, sub_task) = host.ensure_up_to_date(dep);

        if let Some(sub_id) = sub_task {
            let is_cycle = host.tasks.get(sub_id).owning_thread() == worker_id
                || transitively_waits_on(host, sub_id, task_id);
            if is_cycle {
                // The cycle edge: resolving it further would never reach
                // a terminal state, since `sub_id` is itself (directly or
                // through its own recorded sub-tasks) waiting on us.
                // Treat it as satisfied so both tasks make progress
                // toward a terminal state; the outer task's own checks
                // may still fail it.
                report::cyclic_dependency(source_path);
                is_ready = true;
            } else {
                sub_tasks.push(sub_id);
                if host.tasks.get(sub_id).status() == TaskStatus::New {
                    host.queue.queue_task(sub_id, &host.tasks);
                }
                let sub_status = host.tasks.get(sub_id).status();
                match sub_status {
                    TaskStatus::Done => is_ready = true,
                    TaskStatus::Failed => {
                        if dep.is_critical() {
                            return StageBResult::Failed;
                        }
                        // Non-critical sub-task failure: record and move on.
                        is_ready = true;
                    }
                    _ => not_ready = true,
                }
            }
        } else if !is_ready && dep.is_critical() {
            // Unsatisfiable and no sub-task can ever resolve it.
            return StageBResult::Failed;
        }

        let _ = is_ready;
    }

    *host.tasks.get(task_id).sub_tasks.lock() = sub_tasks;

    if not_ready && !host.config.recursive {
        StageBResult::NotReady
    } else if not_ready {
        // Recursive/eager mode: block the calling worker until every
        // recorded sub-task reaches a terminal state instead of
        // suspending into the shared queue.
        while !sub_tasks_are_terminal(host, task_id) {
            std::thread::sleep(Duration::from_millis(10));
        }
        StageBResult::Ready
    } else {
        StageBResult::Ready
    }
}

/// Stage C: conversion. Only reached once every sub-task is `Done` (or
/// non-critically `Failed`).
fn stage_c(host: &CompilerHost, task_id: TaskId, source_path: &Path) -> bool {
    host.observer().on_pre_convert(source_path);

    let (converter_id, converter_params) = {
        let task = host.tasks.get(task_id);
        (task.converter_id, task.converter_params.clone())
    };
    let flags = host.converter_flags(converter_id).unwrap_or(ConverterFlags::empty());

    let mut deps = host.tasks.get(task_id).deps.lock().clone();
    for i in 0..deps.secondary_inputs.len() {
        let hash = host.get_hash(&deps.secondary_inputs[i].0);
        deps.set_secondary_hash(i, hash);
    }

    let force = host.config.force_rebuild;
    if !force && outputs_up_to_date(host, &deps) {
        *host.tasks.get(task_id).deps.lock() = deps;
        host.observer().on_post_convert(source_path);
        return true;
    }

    let combined_hash = deps.input_hash(true);
    let deps_path = deps_file_for(host, source_path);
    let mut rebuilt_from_cache = false;

    if host.cache.is_enabled() {
        if host.cache.read(&deps_path, combined_hash) {
            host.observer().on_cache_read(combined_hash);
            if let Some(restored) = load_dependency_list(&deps_path) {
                if fetch_outputs_from_cache(host, &restored) {
                    deps = restored;
                    rebuilt_from_cache = true;
                    report::cache_hit(combined_hash);
                }
            }
        } else {
            host.observer().on_cache_read_miss(combined_hash);
            report::cache_miss(combined_hash);
        }
    }

    if !rebuilt_from_cache {
        match run_convert(host, task_id, source_path, converter_id, &converter_params, flags) {
            Some((intermediate, finals)) => {
                deps.intermediate_outputs.clear();
                deps.final_outputs.clear();
                for path in intermediate {
                    let hash = host.get_file_hash(&path, true);
                    let relative = host.paths.relative_to_any_root(&path);
                    deps.add_intermediate_output(relative, hash);
                }
                for path in finals {
                    let hash = host.get_file_hash(&path, true);
                    let relative = host.paths.relative_to_any_root(&path);
                    deps.add_final_output(relative.clone(), hash);
                    host.on_output_generated(&relative);
                }

                if flags.contains(ConverterFlags::CACHE_CONVERSION) {
                    for (path, hash) in deps.intermediate_outputs.iter().chain(deps.final_outputs.iter()) {
                        let absolute = host.resolve_intermediate_path(path);
                        let absolute = if absolute.exists() { absolute } else { host.resolve_output_path(path) };
                        if host.cache.write(&absolute, *hash) {
                            host.observer().on_cache_write(*hash);
                        } else {
                            host.observer().on_cache_write_miss(*hash);
                        }
                    }
                    save_dependency_list(&deps_path, &deps);
                    if host.cache.write(&deps_path, combined_hash) {
                        host.observer().on_cache_write(combined_hash);
                    } else {
                        host.observer().on_cache_write_miss(combined_hash);
                    }
                } else {
                    save_dependency_list(&deps_path, &deps);
                }
            }
            None => return false,
        }
    }

    *host.tasks.get(task_id).deps.lock() = deps;
    host.observer().on_post_convert(source_path);
    true
}

fn outputs_up_to_date(host: &CompilerHost, deps: &DependencyList) -> bool {
    if deps.final_outputs.is_empty() {
        return false;
    }
    let final_ok = deps.final_outputs.iter().all(|(path, hash)| {
        let absolute = host.resolve_output_path(path);
        absolute.exists() && host.get_file_hash(&absolute, true) == *hash
    });
    let intermediate_ok = deps.intermediate_outputs.iter().all(|(path, hash)| {
        let absolute = host.resolve_intermediate_path(path);
        if absolute.exists() && host.get_file_hash(&absolute, true) == *hash {
            return true;
        }
        if host.cache.read(&absolute, *hash) {
            host.observer().on_cache_read(*hash);
            true
        } else {
            host.observer().on_cache_read_miss(*hash);
            false
        }
    });
    final_ok && intermediate_ok
}

fn fetch_outputs_from_cache(host: &CompilerHost, deps: &DependencyList) -> bool {
    deps.final_outputs.iter().chain(deps.intermediate_outputs.iter()).all(|(path, hash)| {
        let absolute = host.resolve_output_path(path);
        if !host.cache.read(&absolute, *hash) {
            host.observer().on_cache_read_miss(*hash);
            return false;
        }
        if host.get_file_hash(&absolute, true) != *hash {
            host.observer().on_cache_read_miss(*hash);
            report::cache_miss(*hash);
            return false;
        }
        host.observer().on_cache_read(*hash);
        true
    })
}

/// Runs the converter's `convert`, releasing any assumptions about an
/// open read handle on the source before calling it when
/// `UPGRADE_CONVERSION` is set (the converter rewrites the source in
/// place), retrying a failed attempt up to
/// [`UPGRADE_RETRY_ATTEMPTS`] times.
fn run_convert(
    host: &CompilerHost,
    task_id: TaskId,
    source_path: &Path,
    converter_id: u64,
    converter_params: &str,
    flags: ConverterFlags,
) -> Option<(Vec<PathBuf>, Vec<PathBuf>)> {
    let guard = host.converter_guard(converter_id)?;
    let upgrade = flags.contains(ConverterFlags::UPGRADE_CONVERSION);
    let max_attempts = if upgrade { UPGRADE_RETRY_ATTEMPTS } else { 1 };

    for attempt in 0..max_attempts {
        let _handle = guard.enter(flags.contains(ConverterFlags::THREAD_SAFE));
        let mut converter = host.create_converter(converter_id, converter_params)?;
        let mut intermediate_out = Vec::new();
        let mut final_out = Vec::new();

        let (_, _) = take_error_flags();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            converter.convert(source_path, host, &mut intermediate_out, &mut final_out)
        }));
        let (errored, _) = take_error_flags();

        match result {
            Ok(true) if !errored => return Some((intermediate_out, final_out)),
            Err(_) => {
                host.tasks.get(task_id).push_log(format!("convert panicked for {}", source_path.display()));
                report::converter_panicked(source_path);
                return None;
            }
            Ok(_) if upgrade && attempt + 1 < max_attempts => {
                drop(_handle);
                std::thread::sleep(UPGRADE_RETRY_DELAY);
                continue;
            }
            Ok(_) => {
                host.tasks.get(task_id).push_log(format!("convert failed for {}", source_path.display()));
                report::converter_failed(source_path);
                return None;
            }
        }
    }
    None
}

/// Single-thread scheduler body: pop-and-run until the queue is empty or
/// `kill_token` (a shared countdown, used to drain excess workers) is
/// positive.
pub fn run_worker(host: &Arc<CompilerHost>, worker_id: u64, kill_token: &AtomicIsize) {
    loop {
        if kill_token.fetch_sub(0, Ordering::Relaxed) > 0 {
            kill_token.fetch_sub(1, Ordering::AcqRel);
            break;
        }
        match host.queue.get_next_task(&host.tasks) {
            Some(id) => process_task(host, id, worker_id),
            None => break,
        }
    }
}

/// Multi-thread driver: an outer loop polls queued-task count against
/// idle-worker count roughly every 100ms, growing or shrinking the pool
/// to match, until both are empty.
pub fn run_pool(host: Arc<CompilerHost>) {
    let max_workers = host.config.num_threads.max(1);
    let kill_token = Arc::new(AtomicIsize::new(0));
    let active_workers = Arc::new(AtomicUsize::new(0));
    let next_worker_id = Arc::new(AtomicU64::new(1));
    let mut handles = Vec::new();

    loop {
        let queued = host.queue.len();
        let active = active_workers.load(Ordering::Acquire);

        if active == 0 && queued == 0 {
            break;
        }

        if queued > 0 && active < max_workers {
            let to_spawn = (max_workers - active).min(queued.max(1));
            for _ in 0..to_spawn {
                let host = host.clone();
                let active_workers = active_workers.clone();
                let kill_token = kill_token.clone();
                let worker_id = next_worker_id.fetch_add(1, Ordering::AcqRel);
                active_workers.fetch_add(1, Ordering::AcqRel);
                handles.push(std::thread::spawn(move || {
                    run_worker(&host, worker_id, &kill_token);
                    active_workers.fetch_sub(1, Ordering::AcqRel);
                }));
            }
        } else if queued == 0 && active > 0 {
            kill_token.fetch_add(active as isize, Ordering::AcqRel);
        }

        if host.is_terminated() {
            kill_token.fetch_add(max_workers as isize, Ordering::AcqRel);
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    for handle in handles {
        let _ = handle.join();
    }
}

