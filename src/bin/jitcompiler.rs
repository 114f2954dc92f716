//! JIT daemon: stays resident, watches the resource tree for changes, and
//! serves `AssetClient` requests over a named pipe.
//!
//! See `bcompiler`'s module doc for why converter registration
//! (`register_plugins`) is left as an integration point rather than
//! implemented here.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use asset_pipeline_core::cli::JitCliArgs;
use asset_pipeline_core::jit::asset_server::AssetServer;
use asset_pipeline_core::jit::watcher::ResourceWatcher;
use asset_pipeline_core::{Cache, CompilerHost};

fn register_plugins(_host: &CompilerHost) {}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args = JitCliArgs::parse();
    let paths = args.common.project_paths();
    let mut config = args.common.compiler_config();
    config.recursive = false;

    let resource_roots = paths.resource_roots.clone();
    let cache = Cache::new(paths.cache_path.clone(), config.cache_read_enabled, config.cache_write_enabled);
    let host = Arc::new(CompilerHost::new(paths, config, cache));
    register_plugins(&host);

    for root in &resource_roots {
        asset_pipeline_core::discovery::discover(&host, root);
    }

    let watcher = ResourceWatcher::new();
    let _fs_watcher = match watcher.watch(host.clone(), Duration::from_millis(args.watch_debounce_ms)) {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(target: "asset_pipeline", error = %err, "failed to start file watcher");
            None
        }
    };

    {
        let host = host.clone();
        std::thread::spawn(move || {
            while !host.is_terminated() {
                asset_pipeline_core::processor::run_pool(host.clone());
                std::thread::sleep(Duration::from_millis(100));
            }
        });
    }

    let server = Arc::new(AssetServer::new(host.clone()));
    info!(target: "asset_pipeline", "jit daemon ready");

    let result = match &args.pipe_name_override {
        Some(identity) => server.serve_with_identity(identity).await,
        None => server.serve(&resource_roots).await,
    };
    if let Err(err) = result {
        tracing::warn!(target: "asset_pipeline", error = %err, "asset server exited with error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
