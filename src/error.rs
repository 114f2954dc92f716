//! Crate-wide error type.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = AssetPipelineError> = std::result::Result<T, E>;

/// Errors produced by the asset pipeline core.
///
/// This mirrors the distinction a build system needs between "this is an I/O
/// problem with a specific file" and "this is a pipeline-logic problem" -
/// most variants carry enough context to log without the caller needing to
/// thread a path through separately.
#[derive(Debug, Error)]
pub enum AssetPipelineError {
    #[error("{0}")]
    Io(#[from] AssetPipelineIoError),

    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("no conversion rule matched {0}")]
    UnknownConverter(PathBuf),

    #[error("converter {0:#x} is already registered")]
    DuplicateConverter(u64),

    #[error("converter {0:#x} not registered")]
    ConverterNotRegistered(u64),

    #[error("converter for {0} reported failure")]
    ConverterFailed(PathBuf),

    #[error("converter for {0} panicked")]
    ConverterPanicked(PathBuf),

    #[error("cyclic dependency detected involving {0}")]
    CyclicDependency(PathBuf),

    #[error("dependency list at {0} is stale and must be regenerated")]
    StaleDependencyList(PathBuf),

    #[error("cache entry for {0:016x} is corrupt")]
    CacheCorrupt(u64),

    #[error("{0} is locked by another process")]
    SourceLocked(PathBuf),

    #[error("malformed dependency document: {0}")]
    Serialization(String),

    #[error("asset pipe protocol error: {0}")]
    PipeProtocol(String),

    #[error("file system watch error: {0}")]
    Watch(String),

    #[error("timed out waiting for asset server to start")]
    ServerLaunchTimeout,

    #[error("{0}")]
    Other(String),
}

impl AssetPipelineError {
    pub fn io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io(AssetPipelineIoError { io: err, path: path.into() })
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// An I/O error annotated with the path that caused it.
#[derive(Debug, Error)]
#[error("{io}: {path}", path = path.display())]
pub struct AssetPipelineIoError {
    #[source]
    pub io: std::io::Error,
    pub path: PathBuf,
}

impl AssetPipelineIoError {
    pub fn new(io: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self { io, path: path.as_ref().to_path_buf() }
    }
}

/// Extension trait to attach a path to a raw [`std::io::Error`].
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| AssetPipelineError::io(e, path.as_ref()))
    }
}
