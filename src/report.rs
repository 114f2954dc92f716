//! Structured logging. Free functions emit `tracing` events under the
//! `asset_pipeline` target; each `ConversionTask` additionally collects its
//! own log lines through the task's `log` buffer so the JIT daemon can
//! surface a per-task transcript through `on_task_completed`.

use std::path::Path;

use tracing::{debug, info, warn};

pub fn init_test_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn task_started(source: &Path) {
    info!(target: "asset_pipeline", source = %source.display(), "task started");
}

pub fn task_resumed(source: &Path) {
    debug!(target: "asset_pipeline", source = %source.display(), "task resumed");
}

pub fn task_suspended(source: &Path, waiting_on: usize) {
    debug!(target: "asset_pipeline", source = %source.display(), waiting_on, "task suspended");
}

pub fn task_completed(source: &Path, status: crate::task::TaskStatus) {
    info!(target: "asset_pipeline", source = %source.display(), status = ?status, "task completed");
}

pub fn cyclic_dependency(source: &Path) {
    warn!(target: "asset_pipeline", source = %source.display(), "Cyclic dependency detected");
}

pub fn cache_hit(hash: u64) {
    debug!(target: "asset_pipeline", hash = format!("{hash:016x}"), "cache hit");
}

pub fn cache_miss(hash: u64) {
    debug!(target: "asset_pipeline", hash = format!("{hash:016x}"), "cache miss");
}

pub fn converter_failed(source: &Path) {
    warn!(target: "asset_pipeline", source = %source.display(), "converter reported failure");
}

pub fn converter_panicked(source: &Path) {
    warn!(target: "asset_pipeline", source = %source.display(), "converter panicked");
}
