//! FNV-1a based hash service.
//!
//! The combine constant below is contractual: persisted `.deps` files and
//! cache keys depend on byte-for-byte reproducible hashes across runs, so the
//! avalanche constant must never change independently of a cache format bump.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use regex::Regex;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Computes the 64-bit FNV-1a hash of a byte buffer.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut result = FNV_OFFSET_BASIS;
    for &byte in data {
        result = (result ^ byte as u64).wrapping_mul(FNV_PRIME);
    }
    result
}

/// Computes the 64-bit FNV-1a hash of a string.
pub fn hash_str(value: &str) -> u64 {
    hash_bytes(value.as_bytes())
}

/// Computes the 64-bit FNV-1a hash of an integer value's native representation.
pub fn hash_u64(value: u64) -> u64 {
    hash_bytes(&value.to_le_bytes())
}

/// Combines `seed` with the hash of `value`, in place.
///
/// `seed ^= hash(value) + 0x9E3779B97F4A7C15 + (seed << 5) + (seed >> 3)`
///
/// The constant is `2^64 / phi`; the shift pair spreads bits even when the
/// input hashes all fall in a narrow range.
pub fn combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9E3779B97F4A7C15)
        .wrapping_add(seed.wrapping_shl(5))
        .wrapping_add(seed.wrapping_shr(3));
}

/// Combines a sequence of hashes into one, starting from an FNV offset basis seed.
pub fn combine_all(values: impl IntoIterator<Item = u64>) -> u64 {
    let mut seed = FNV_OFFSET_BASIS;
    for v in values {
        combine(&mut seed, v);
    }
    seed
}

/// Process-wide cache mapping absolute path -> content hash.
///
/// Reads take a shared lock; a miss is resolved by reading the file and then
/// upgrading to an exclusive lock to insert - mirrors the teacher's
/// read-then-insert pattern used for `ArtifactsCacheInner::content_hashes`,
/// generalized to be concurrent since this cache is touched from worker
/// threads, not just the main thread.
#[derive(Debug, Default)]
pub struct FileHashCache {
    entries: RwLock<HashMap<PathBuf, u64>>,
}

impl FileHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the content hash of `path`, reading from the cache unless `force`
    /// is set or there is no cached entry yet. Missing files hash to `0`.
    pub fn file_hash(&self, path: &Path, force: bool) -> u64 {
        if !force {
            if let Some(hash) = self.entries.read().get(path) {
                return *hash;
            }
        }

        let hash = match fs::read(path) {
            Ok(bytes) => hash_bytes(&bytes),
            Err(_) => 0,
        };

        self.entries.write().insert(path.to_path_buf(), hash);
        hash
    }

    /// Drops the cached hash for `path`, if any, forcing the next lookup to
    /// re-read the file. Used by the JIT file-system watcher on modification.
    pub fn invalidate(&self, path: &Path) {
        self.entries.write().remove(path);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Computes the combined hash of a directory's matching entries.
///
/// Lists `dir` in sorted order; for each matching file, combines
/// `(hash(filename), file_hash(file))`; for each sub-directory, if
/// `recursive`, combines the recursive result but only when it is non-zero
/// (an empty/unreadable sub-tree must not perturb the hash). Unmatched files
/// are ignored entirely.
pub fn directory_hash(
    cache: &FileHashCache,
    dir: &Path,
    pattern: &str,
    is_regex: bool,
    recursive: bool,
) -> u64 {
    let matcher: Box<dyn Fn(&str) -> bool> = if is_regex {
        match Regex::new(pattern) {
            Ok(re) => Box::new(move |name: &str| re.is_match(name)),
            Err(_) => Box::new(|_: &str| false),
        }
    } else {
        let pattern = pattern.to_string();
        Box::new(move |name: &str| glob_match(&pattern, name))
    };

    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(_) => return 0,
    };
    entries.sort_by_key(|e| e.file_name());

    let mut seed = FNV_OFFSET_BASIS;
    for entry in entries {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            if recursive {
                let sub = directory_hash(cache, &path, pattern, is_regex, recursive);
                if sub != 0 {
                    combine(&mut seed, sub);
                }
            }
            continue;
        }

        if !matcher(&name) {
            continue;
        }

        combine(&mut seed, hash_str(&name));
        combine(&mut seed, cache.file_hash(&path, false));
    }
    seed
}

/// Minimal glob matcher supporting `*` and `?`, sufficient for directory
/// dependency patterns (`*.tga`, `level_??.space`, ...).
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    fn match_here(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                match_here(&p[1..], n) || (!n.is_empty() && match_here(p, &n[1..]))
            }
            (Some('?'), Some(_)) => match_here(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => match_here(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    match_here(&p, &n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_vector() {
        // FNV-1a test vector for the empty string and "a" from the public
        // FNV test suite.
        assert_eq!(hash_bytes(b""), 0xcbf29ce484222325);
        assert_eq!(hash_bytes(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn combine_is_order_sensitive() {
        let mut a = FNV_OFFSET_BASIS;
        combine(&mut a, 1);
        combine(&mut a, 2);

        let mut b = FNV_OFFSET_BASIS;
        combine(&mut b, 2);
        combine(&mut b, 1);

        assert_ne!(a, b);
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("*.tga", "foo.tga"));
        assert!(!glob_match("*.tga", "foo.png"));
        assert!(glob_match("level_??.space", "level_01.space"));
        assert!(!glob_match("level_??.space", "level_001.space"));
    }

    #[test]
    fn file_hash_cache_returns_zero_for_missing_file() {
        let cache = FileHashCache::new();
        assert_eq!(cache.file_hash(Path::new("/nonexistent/path/really"), false), 0);
    }

    #[test]
    fn file_hash_cache_hits_after_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let cache = FileHashCache::new();
        let h1 = cache.file_hash(&file, false);
        std::fs::write(&file, b"changed").unwrap();
        let h2 = cache.file_hash(&file, false);
        assert_eq!(h1, h2, "cached value must not change without force");

        let h3 = cache.file_hash(&file, true);
        assert_ne!(h3, h1);
    }
}
