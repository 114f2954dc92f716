//! End-to-end scenarios driving discovery and the scheduler together
//! against a real temp-directory tree, with a small in-memory converter
//! pair standing in for a real plug-in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use std::sync::atomic::{AtomicUsize, Ordering};

use asset_pipeline_core::cache::Cache;
use asset_pipeline_core::compiler::{Compiler, CompilerHost, Observer};
use asset_pipeline_core::config::{CompilerConfig, ProjectPaths};
use asset_pipeline_core::converter::{Converter, ConverterFactory, ConverterFlags, ConverterInfo};
use asset_pipeline_core::dependency_list::DependencyList;
use asset_pipeline_core::rule::{ConversionDecision, ConversionRule};
use asset_pipeline_core::task::{TaskId, TaskStatus};
use asset_pipeline_core::{discovery, processor};

/// Counts cache-hook firings so a test can assert they actually happen
/// rather than only that the expected bytes land on disk.
#[derive(Default)]
struct CacheHookCounter {
    reads: AtomicUsize,
    read_misses: AtomicUsize,
    writes: AtomicUsize,
}

impl Observer for CacheHookCounter {
    fn on_cache_read(&self, _hash: u64) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
    fn on_cache_read_miss(&self, _hash: u64) {
        self.read_misses.fetch_add(1, Ordering::SeqCst);
    }
    fn on_cache_write(&self, _hash: u64) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Claims every `.obj` file, recording its sibling `.mtl` (same stem) as a
/// critical secondary source dependency when present, and writes an
/// uppercased copy of the source bytes as its one final output.
struct ObjRule;

impl ConversionRule for ObjRule {
    fn matches(&self, path: &Path) -> Option<ConversionDecision> {
        if path.extension().map(|e| e == "obj").unwrap_or(false) {
            Some(ConversionDecision { converter_id: OBJ_CONVERTER_ID, converter_version: "1.0".into(), converter_params: String::new() })
        } else {
            None
        }
    }
}

const OBJ_CONVERTER_ID: u64 = 0x4F424A; // "OBJ"

struct ObjConverter;

impl Converter for ObjConverter {
    fn create_dependencies(&mut self, source_path: &Path, compiler: &dyn Compiler, dep_list: &mut DependencyList) -> bool {
        let mtl = source_path.with_extension("mtl");
        if compiler.get_source_file(&mtl).is_some() {
            dep_list.add_secondary_source(mtl, true);
        }
        true
    }

    fn convert(&mut self, source_path: &Path, compiler: &dyn Compiler, _intermediate_out: &mut Vec<PathBuf>, final_out: &mut Vec<PathBuf>) -> bool {
        let Ok(bytes) = std::fs::read(source_path) else {
            compiler.set_error("could not read source");
            return false;
        };
        let upper = bytes.to_ascii_uppercase();
        let output = compiler.resolve_output_path(Path::new(&format!(
            "{}.compiled",
            source_path.file_stem().unwrap().to_string_lossy()
        )));
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&output, upper).unwrap();
        final_out.push(output);
        true
    }
}

struct ObjFactory;
impl ConverterFactory for ObjFactory {
    fn create(&self, _params: &str) -> Box<dyn Converter> {
        Box::new(ObjConverter)
    }
}

/// Claims `.selfref` files and records a secondary `OutputFile` dependency
/// on its *own* compiled output, resolved back to itself through
/// `reverse_lookup` - the shape that exercises the owning-thread cycle
/// check in Stage B, since a worker always owns the task it is currently
/// running.
struct SelfRefRule;
impl ConversionRule for SelfRefRule {
    fn matches(&self, path: &Path) -> Option<ConversionDecision> {
        if path.extension().map(|e| e == "selfref").unwrap_or(false) {
            Some(ConversionDecision { converter_id: SELF_REF_CONVERTER_ID, converter_version: "1.0".into(), converter_params: String::new() })
        } else {
            None
        }
    }

    fn reverse_lookup(&self, output_path: &Path) -> Vec<PathBuf> {
        let stem = output_path.file_stem().unwrap().to_string_lossy().into_owned();
        vec![PathBuf::from(format!("{stem}.selfref"))]
    }
}

const SELF_REF_CONVERTER_ID: u64 = 0x53454C46; // "SELF"

struct SelfRefConverter;
impl Converter for SelfRefConverter {
    fn create_dependencies(&mut self, source_path: &Path, _compiler: &dyn Compiler, dep_list: &mut DependencyList) -> bool {
        let stem = source_path.file_stem().unwrap().to_string_lossy().into_owned();
        dep_list.add_secondary_output(format!("{stem}.compiled"), true);
        true
    }

    fn convert(&mut self, source_path: &Path, compiler: &dyn Compiler, _intermediate_out: &mut Vec<PathBuf>, final_out: &mut Vec<PathBuf>) -> bool {
        let stem = source_path.file_stem().unwrap().to_string_lossy().into_owned();
        let output = compiler.resolve_output_path(Path::new(&format!("{stem}.compiled")));
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&output, b"done").unwrap();
        final_out.push(output);
        true
    }
}

struct SelfRefFactory;
impl ConverterFactory for SelfRefFactory {
    fn create(&self, _params: &str) -> Box<dyn Converter> {
        Box::new(SelfRefConverter)
    }
}

fn build_host(root: &Path) -> Arc<CompilerHost> {
    let intermediate = root.join("_intermediate");
    let output = root.join("_output");
    let paths = ProjectPaths::new(vec![root.to_path_buf()], intermediate, output);
    let mut config = CompilerConfig::default();
    config.num_threads = 2;
    let host = Arc::new(CompilerHost::new(paths, config, Cache::disabled()));

    host.register_conversion_rule(Box::new(ObjRule));
    host.register_converter(
        ConverterInfo::new("ObjConverter", "1.0", ConverterFlags::THREAD_SAFE | ConverterFlags::CACHE_CONVERSION),
        Box::new(ObjFactory),
    )
    .unwrap();

    host.register_conversion_rule(Box::new(SelfRefRule));
    host.register_converter(ConverterInfo::new("SelfRefConverter", "1.0", ConverterFlags::THREAD_SAFE), Box::new(SelfRefFactory)).unwrap();

    host
}

fn task_statuses(host: &CompilerHost) -> Vec<TaskStatus> {
    (0..host.tasks.len()).map(|i| host.tasks.get(TaskId(i)).status()).collect()
}

#[test]
fn fresh_build_converts_every_discovered_asset() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    assert!(task_statuses(&host).iter().all(|s| *s == TaskStatus::Done));
    let compiled = std::fs::read(root.path().join("_output").join("mesh.compiled")).unwrap();
    assert_eq!(compiled, b"V 0 0 0");
}

#[test]
fn secondary_dependency_is_recorded_and_up_to_date_check_considers_it() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();
    std::fs::write(root.path().join("mesh.mtl"), b"newmtl x").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    let task_id = host.tasks.lookup(&root.path().join("mesh.obj")).unwrap();
    assert_eq!(host.tasks.get(task_id).status(), TaskStatus::Done);
    let deps = host.tasks.get(task_id).deps.lock().clone();
    assert_eq!(deps.secondary_inputs.len(), 1);
}

#[test]
fn unchanged_rebuild_reuses_existing_output_without_reconverting() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    let compiled_path = root.path().join("_output").join("mesh.compiled");
    let first_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();

    // Re-discovering and re-running against the same host models a second
    // batch invocation over an unchanged tree: the task's in-memory deps
    // already carry a valid primary header, so Stage A's up-to-date check
    // short-circuits and Stage C never touches the output file.
    std::thread::sleep(std::time::Duration::from_millis(10));
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    let second_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();
    assert_eq!(first_write_time, second_write_time);
}

#[test]
fn second_real_process_run_reuses_the_on_disk_deps_file_without_a_cache_path() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    let compiled_path = root.path().join("_output").join("mesh.compiled");
    let first_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();

    // A brand new `CompilerHost`/`TaskTable` models a real second process
    // invocation over the same on-disk tree, with no `--cachePath`
    // configured: every task starts with an empty in-memory `deps`, so
    // the only thing that can make Stage A's up-to-date check pass is the
    // `.deps` file the first run wrote to the intermediate tree.
    std::thread::sleep(std::time::Duration::from_millis(10));
    let second_host = build_host(root.path());
    discovery::discover(&second_host, root.path());
    processor::run_pool(second_host.clone());

    let second_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();
    assert_eq!(first_write_time, second_write_time, "a second process run must not reconvert an unchanged asset");

    let task_id = second_host.tasks.lookup(&root.path().join("mesh.obj")).unwrap();
    assert_eq!(second_host.tasks.get(task_id).status(), TaskStatus::Done);
}

#[test]
fn force_rebuild_reconverts_even_when_the_output_still_matches() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    let compiled_path = root.path().join("_output").join("mesh.compiled");
    let first_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    let mut forced_config = CompilerConfig::default();
    forced_config.force_rebuild = true;
    let paths = ProjectPaths::new(
        vec![root.path().to_path_buf()],
        root.path().join("_intermediate"),
        root.path().join("_output"),
    );
    let forced_host = Arc::new(CompilerHost::new(paths, forced_config, Cache::disabled()));
    forced_host.register_conversion_rule(Box::new(ObjRule));
    forced_host
        .register_converter(
            ConverterInfo::new("ObjConverter", "1.0", ConverterFlags::THREAD_SAFE | ConverterFlags::CACHE_CONVERSION),
            Box::new(ObjFactory),
        )
        .unwrap();

    discovery::discover(&forced_host, root.path());
    processor::run_pool(forced_host.clone());

    let second_write_time = std::fs::metadata(&compiled_path).unwrap().modified().unwrap();
    assert!(second_write_time > first_write_time);
}

#[test]
fn cache_hit_restores_output_without_rerunning_the_converter() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mesh.obj"), b"v 0 0 0").unwrap();
    let shared_cache_dir = tempfile::tempdir().unwrap();

    let intermediate = root.path().join("_intermediate");
    let output = root.path().join("_output");
    let paths = ProjectPaths::new(vec![root.path().to_path_buf()], intermediate, output.clone())
        .with_cache_path(Some(shared_cache_dir.path().to_path_buf()));
    let host = Arc::new(CompilerHost::new(paths, CompilerConfig::default(), Cache::new(Some(shared_cache_dir.path().to_path_buf()), true, true)));
    host.register_conversion_rule(Box::new(ObjRule));
    host.register_converter(
        ConverterInfo::new("ObjConverter", "1.0", ConverterFlags::THREAD_SAFE | ConverterFlags::CACHE_CONVERSION),
        Box::new(ObjFactory),
    )
    .unwrap();

    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());
    assert!(output.join("mesh.compiled").exists());

    // Delete the local output; a second build over a fresh intermediate
    // tree should restore it from the shared cache rather than fail.
    std::fs::remove_file(output.join("mesh.compiled")).unwrap();
    std::fs::remove_dir_all(root.path().join("_intermediate")).unwrap();

    let intermediate2 = root.path().join("_intermediate");
    let paths2 = ProjectPaths::new(vec![root.path().to_path_buf()], intermediate2, output.clone())
        .with_cache_path(Some(shared_cache_dir.path().to_path_buf()));
    let host2 = Arc::new(CompilerHost::new(paths2, CompilerConfig::default(), Cache::new(Some(shared_cache_dir.path().to_path_buf()), true, true)));
    host2.register_conversion_rule(Box::new(ObjRule));
    host2
        .register_converter(
            ConverterInfo::new("ObjConverter", "1.0", ConverterFlags::THREAD_SAFE | ConverterFlags::CACHE_CONVERSION),
            Box::new(ObjFactory),
        )
        .unwrap();
    let hooks = Arc::new(CacheHookCounter::default());
    host2.set_observer(hooks.clone());

    discovery::discover(&host2, root.path());
    processor::run_pool(host2.clone());

    assert!(output.join("mesh.compiled").exists());
    let task_id = host2.tasks.lookup(&root.path().join("mesh.obj")).unwrap();
    assert_eq!(host2.tasks.get(task_id).status(), TaskStatus::Done);
    assert!(hooks.reads.load(Ordering::SeqCst) >= 1, "on_cache_read must fire on the cache-hit rebuild");
}

#[test]
fn self_referential_dependency_does_not_deadlock_the_worker() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("loop.selfref"), b"x").unwrap();

    let host = build_host(root.path());
    discovery::discover(&host, root.path());
    processor::run_pool(host.clone());

    assert!(task_statuses(&host).iter().all(|s| s.is_terminal()));
    let task_id = host.tasks.lookup(&root.path().join("loop.selfref")).unwrap();
    assert_eq!(host.tasks.get(task_id).status(), TaskStatus::Done);
    assert!(host.tasks.get(task_id).sub_tasks.lock().is_empty());
}
