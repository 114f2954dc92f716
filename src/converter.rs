//! Converter plug-in contract.

use std::path::{Path, PathBuf};

use crate::compiler::Compiler;
use crate::dependency_list::DependencyList;

bitflags::bitflags! {
    /// Behavior flags a converter kind advertises through its
    /// [`ConverterInfo`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConverterFlags: u8 {
        /// Safe to run concurrently with other `THREAD_SAFE` converters of
        /// any kind; otherwise this converter kind runs under an exclusive
        /// lock (see [`crate::converter_guard`]).
        const THREAD_SAFE = 1 << 0;
        /// Upload the dependency list after `create_dependencies` under
        /// the primary-only input hash.
        const CACHE_DEPENDENCIES = 1 << 1;
        /// Upload each output, and the full dependency list, after
        /// `convert` under the combined input hash.
        const CACHE_CONVERSION = 1 << 2;
        /// The converter rewrites the source file in place; the processor
        /// must release any read handle on it before calling `convert`,
        /// and retries a locked-source I/O error rather than failing
        /// immediately.
        const UPGRADE_CONVERSION = 1 << 3;
    }
}

/// Registration record for one converter kind: identity, version (which
/// participates in the primary input hash), and behavior flags.
#[derive(Debug, Clone)]
pub struct ConverterInfo {
    pub name: String,
    pub type_id: u64,
    pub version: String,
    pub flags: ConverterFlags,
}

impl ConverterInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, flags: ConverterFlags) -> Self {
        let name = name.into();
        let type_id = crate::hash::hash_str(&name);
        Self { name, type_id, version: version.into(), flags }
    }
}

/// A stateful instance created fresh for one conversion attempt and
/// destroyed once it returns.
pub trait Converter: Send {
    /// Discovers this source's secondary inputs and records them into
    /// `dep_list`; may call back into `compiler` to resolve or create
    /// sub-tasks, but must not read the source's converted bytes yet.
    fn create_dependencies(
        &mut self,
        source_path: &Path,
        compiler: &dyn Compiler,
        dep_list: &mut DependencyList,
    ) -> bool;

    /// Performs the conversion, writing bytes through `compiler` and
    /// appending the absolute paths of every file it produced.
    fn convert(
        &mut self,
        source_path: &Path,
        compiler: &dyn Compiler,
        intermediate_out: &mut Vec<PathBuf>,
        final_out: &mut Vec<PathBuf>,
    ) -> bool;
}

/// Constructs a fresh [`Converter`] instance for one conversion attempt.
pub trait ConverterFactory: Send + Sync {
    fn create(&self, params: &str) -> Box<dyn Converter>;
}

/// The two symbols a converter plug-in exports, expressed as a trait
/// instead of raw `dlopen` symbols: `init` registers rules, converters
/// and resource callbacks against the loader; `fini` tears them down.
pub trait ConverterPlugin {
    fn init(&self, loader: &mut dyn PluginLoader) -> bool;
    fn fini(&self, loader: &mut dyn PluginLoader) -> bool;
}

/// What a plug-in's `init`/`fini` is allowed to touch.
pub trait PluginLoader {
    fn register_conversion_rule(&mut self, rule: Box<dyn crate::rule::ConversionRule>);
    fn register_converter(&mut self, info: ConverterInfo, factory: Box<dyn ConverterFactory>);
}
