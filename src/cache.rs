//! Content-addressable cache: a shared directory keyed by the 64-bit hash
//! of its contents. Read and write access are independently toggleable;
//! a miss on either side is non-fatal and just means "proceed locally".

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Static façade over a shared cache directory. Constructed once by the
/// compiler and shared (behind an `Arc`) by every worker thread.
pub struct Cache {
    cache_path: Option<PathBuf>,
    read_enabled: bool,
    write_enabled: bool,
}

impl Cache {
    /// An empty `cache_path` disables the cache entirely regardless of the
    /// enable flags.
    pub fn new(cache_path: Option<PathBuf>, read_enabled: bool, write_enabled: bool) -> Self {
        Self { cache_path, read_enabled, write_enabled }
    }

    pub fn disabled() -> Self {
        Self { cache_path: None, read_enabled: false, write_enabled: false }
    }

    fn entry_path(&self, hash: u64) -> Option<PathBuf> {
        let root = self.cache_path.as_ref()?;
        let hex = format!("{hash:016x}");
        let (dir, rest) = hex.split_at(2);
        Some(root.join(dir).join(rest))
    }

    /// Copies the cached bytes for `hash` into `local_path`. Returns
    /// `false` on any miss or I/O failure - never an error, the caller
    /// always has a local-rebuild fallback.
    pub fn read(&self, local_path: &Path, hash: u64) -> bool {
        if !self.read_enabled {
            return false;
        }
        let Some(entry) = self.entry_path(hash) else { return false };
        match fs::copy(&entry, local_path) {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "asset_pipeline", hash = format!("{hash:016x}"), error = %err, "cache read miss");
                false
            }
        }
    }

    /// Uploads `local_path`'s bytes under `hash`. The cache never mutates
    /// an existing entry in place: same hash is assumed to mean identical
    /// bytes, so an existing entry is left untouched rather than
    /// overwritten.
    pub fn write(&self, local_path: &Path, hash: u64) -> bool {
        if !self.write_enabled {
            return false;
        }
        let Some(entry) = self.entry_path(hash) else { return false };

        if entry.exists() {
            return true;
        }

        let parent = match entry.parent() {
            Some(p) => p,
            None => return false,
        };
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(target: "asset_pipeline", hash = format!("{hash:016x}"), error = %err, "cache write miss");
            return false;
        }

        let tmp = entry.with_extension("tmp");
        match fs::copy(local_path, &tmp).and_then(|_| fs::rename(&tmp, &entry)) {
            Ok(_) => true,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                warn!(target: "asset_pipeline", hash = format!("{hash:016x}"), error = %err, "cache write miss");
                false
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache_path.is_some()
    }
}
