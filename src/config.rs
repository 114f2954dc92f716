//! Project layout and compiler settings.

use std::path::{Path, PathBuf};

/// The four root directories the compiler resolves paths under: the
/// resource search roots, the intermediate-file tree, the final-output
/// tree, and the shared cache directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub resource_roots: Vec<PathBuf>,
    pub intermediate_path: PathBuf,
    pub output_path: PathBuf,
    pub cache_path: Option<PathBuf>,
}

impl ProjectPaths {
    pub fn new(resource_roots: Vec<PathBuf>, intermediate_path: PathBuf, output_path: PathBuf) -> Self {
        Self { resource_roots, intermediate_path, output_path, cache_path: None }
    }

    pub fn with_cache_path(mut self, cache_path: Option<PathBuf>) -> Self {
        self.cache_path = cache_path;
        self
    }

    /// Maps a (possibly relative, possibly already absolute under one of
    /// the trees) path to its canonical absolute form under the resource
    /// roots. The three `resolve_*` helpers are commutative across trees:
    /// converting a relative path to intermediate and then re-deriving the
    /// relative path yields what `resolve_output_path` would produce for
    /// that same relative path.
    pub fn resolve_source_path(&self, path: &Path) -> PathBuf {
        resolve_under(&self.resource_roots_as_dirs(), path)
    }

    pub fn resolve_intermediate_path(&self, path: &Path) -> PathBuf {
        resolve_under(std::slice::from_ref(&self.intermediate_path), path)
    }

    pub fn resolve_output_path(&self, path: &Path) -> PathBuf {
        resolve_under(std::slice::from_ref(&self.output_path), path)
    }

    fn resource_roots_as_dirs(&self) -> Vec<PathBuf> {
        self.resource_roots.clone()
    }

    /// Returns `path` relative to whichever known root it falls under, or
    /// `path` itself if it matches none - the common case for a path that
    /// was already relative.
    pub fn relative_to_any_root(&self, path: &Path) -> PathBuf {
        for root in self
            .resource_roots
            .iter()
            .chain(std::iter::once(&self.intermediate_path))
            .chain(std::iter::once(&self.output_path))
        {
            if let Ok(rel) = path.strip_prefix(root) {
                return rel.to_path_buf();
            }
        }
        path.to_path_buf()
    }
}

fn resolve_under(roots: &[PathBuf], path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    roots.first().cloned().unwrap_or_default().join(path)
}

/// Settings that affect whether a task is considered up to date: worker
/// count, force rebuild, recursive sub-build mode, and the cache's
/// independent read/write enables.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub num_threads: usize,
    pub force_rebuild: bool,
    pub recursive: bool,
    pub cache_read_enabled: bool,
    pub cache_write_enabled: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get().max(1),
            force_rebuild: false,
            recursive: false,
            cache_read_enabled: true,
            cache_write_enabled: true,
        }
    }
}
