//! Batch builder: discovers every asset under the configured resource
//! roots, converts whatever is out of date, and exits with a non-zero
//! status if anything failed.
//!
//! Converters are opaque plug-ins; wiring a concrete set of them in is the
//! embedding application's job, not this crate's. `register_plugins` below
//! is the integration point a real deployment fills in before calling
//! `main`'s logic - left empty here since no converter ships with this
//! crate.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use asset_pipeline_core::cli::BatchCliArgs;
use asset_pipeline_core::{Cache, CompilerHost, TaskStatus};

fn register_plugins(_host: &CompilerHost) {
    // Intentionally empty: this crate defines the converter contract, not
    // any concrete converter. A real build links its converter crates and
    // calls `host.register_converter`/`register_conversion_rule` here.
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args = BatchCliArgs::parse();
    let paths = args.common.project_paths();
    let config = args.common.compiler_config();
    let cache = Cache::new(paths.cache_path.clone(), config.cache_read_enabled, config.cache_write_enabled);

    let resource_roots = paths.resource_roots.clone();
    let host = Arc::new(CompilerHost::new(paths, config, cache));
    register_plugins(&host);

    let mut queued = 0;
    for root in &resource_roots {
        queued += asset_pipeline_core::discovery::discover(&host, root);
    }
    info!(target: "asset_pipeline", queued, "discovery complete");

    asset_pipeline_core::processor::run_pool(host.clone());

    let failed = (0..host.tasks.len())
        .filter(|&i| host.tasks.get(asset_pipeline_core::TaskId(i)).status() == TaskStatus::Failed)
        .count();

    if failed > 0 {
        warn!(target: "asset_pipeline", failed, "build finished with failures");
        ExitCode::FAILURE
    } else {
        info!(target: "asset_pipeline", "build finished");
        ExitCode::SUCCESS
    }
}
