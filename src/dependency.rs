//! Dependency model: a tagged record of one atomic input a conversion task
//! depends on.
//!
//! Variant order is fixed and must never change except by appending: it
//! mirrors the on-disk `Type` integer from the original `DEPENDENCY_TYPES`
//! list, and persisted `.deps` files from old runs must keep resolving to
//! the same kind.

use std::path::PathBuf;

use crate::error::{AssetPipelineError, Result};
use crate::section::Section;

const TAG_CRITICAL: &str = "Critical";
const TAG_TYPE: &str = "Type";
const TAG_PATH: &str = "Path";
const TAG_CONVERTER_ID: &str = "ConverterId";
const TAG_VERSION: &str = "Version";
const TAG_PARAMS: &str = "Params";
const TAG_PATTERN: &str = "Pattern";
const TAG_IS_REGEX: &str = "IsRegex";
const TAG_RECURSIVE: &str = "Recursive";

/// The on-disk discriminant. Order is contractual; add new kinds only at
/// the end, before `InvalidType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DependencyType {
    SourceFile = 0,
    IntermediateFile = 1,
    OutputFile = 2,
    Converter = 3,
    ConverterParams = 4,
    Directory = 5,
    /// Sentinel for tags this build doesn't recognize. Never written out;
    /// only produced when reading an unknown `Type` value.
    Invalid = 6,
}

impl DependencyType {
    fn from_u32(value: u32) -> DependencyType {
        match value {
            0 => DependencyType::SourceFile,
            1 => DependencyType::IntermediateFile,
            2 => DependencyType::OutputFile,
            3 => DependencyType::Converter,
            4 => DependencyType::ConverterParams,
            5 => DependencyType::Directory,
            _ => DependencyType::Invalid,
        }
    }
}

/// A single atomic input another record depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    SourceFile { path: PathBuf, critical: bool },
    IntermediateFile { path: PathBuf, critical: bool },
    OutputFile { path: PathBuf, critical: bool },
    Converter { id: u64, version: String, critical: bool },
    ConverterParams { params: String, critical: bool },
    Directory { path: PathBuf, pattern: String, is_regex: bool, recursive: bool, critical: bool },
    /// Round-trip placeholder for a tag this build doesn't understand; a
    /// dependency list containing one is always judged stale.
    Invalid,
}

impl Dependency {
    pub fn kind(&self) -> DependencyType {
        match self {
            Dependency::SourceFile { .. } => DependencyType::SourceFile,
            Dependency::IntermediateFile { .. } => DependencyType::IntermediateFile,
            Dependency::OutputFile { .. } => DependencyType::OutputFile,
            Dependency::Converter { .. } => DependencyType::Converter,
            Dependency::ConverterParams { .. } => DependencyType::ConverterParams,
            Dependency::Directory { .. } => DependencyType::Directory,
            Dependency::Invalid => DependencyType::Invalid,
        }
    }

    pub fn is_critical(&self) -> bool {
        match self {
            Dependency::SourceFile { critical, .. }
            | Dependency::IntermediateFile { critical, .. }
            | Dependency::OutputFile { critical, .. }
            | Dependency::Converter { critical, .. }
            | Dependency::ConverterParams { critical, .. }
            | Dependency::Directory { critical, .. } => *critical,
            Dependency::Invalid => false,
        }
    }

    pub fn set_critical(&mut self, value: bool) {
        match self {
            Dependency::SourceFile { critical, .. }
            | Dependency::IntermediateFile { critical, .. }
            | Dependency::OutputFile { critical, .. }
            | Dependency::Converter { critical, .. }
            | Dependency::ConverterParams { critical, .. }
            | Dependency::Directory { critical, .. } => *critical = value,
            Dependency::Invalid => {}
        }
    }

    /// Writes this dependency into a fresh child of `parent`, named
    /// `child_name` (`PrimaryInputs`/`SecondaryInputs`'s per-record slot).
    pub fn serialize_out(&self, parent: &mut Section, child_name: &str) {
        let section = parent.new_section(child_name);
        section.set_u64(TAG_TYPE, self.kind() as u32 as u64);
        section.set_bool(TAG_CRITICAL, self.is_critical());

        match self {
            Dependency::SourceFile { path, .. }
            | Dependency::IntermediateFile { path, .. }
            | Dependency::OutputFile { path, .. } => {
                section.set_str(TAG_PATH, path.to_string_lossy());
            }
            Dependency::Converter { id, version, .. } => {
                section.set_u64(TAG_CONVERTER_ID, *id);
                section.set_str(TAG_VERSION, version.clone());
            }
            Dependency::ConverterParams { params, .. } => {
                section.set_str(TAG_PARAMS, params.clone());
            }
            Dependency::Directory { path, pattern, is_regex, recursive, .. } => {
                section.set_str(TAG_PATH, path.to_string_lossy());
                section.set_str(TAG_PATTERN, pattern.clone());
                section.set_bool(TAG_IS_REGEX, *is_regex);
                section.set_bool(TAG_RECURSIVE, *recursive);
            }
            Dependency::Invalid => {}
        }
    }

    /// Reads a dependency back from a `section` produced by
    /// [`Dependency::serialize_out`]. An unrecognized `Type` attribute or a
    /// missing mandatory field produces `Dependency::Invalid` rather than an
    /// error - the owning list is then judged stale and regenerated.
    pub fn serialize_in(section: &Section) -> Result<Dependency> {
        let raw_type = section
            .get_u64(TAG_TYPE)
            .ok_or_else(|| AssetPipelineError::Serialization("dependency missing Type".into()))?;
        let critical = section.get_bool(TAG_CRITICAL).unwrap_or(false);

        let dep = match DependencyType::from_u32(raw_type as u32) {
            DependencyType::SourceFile => match section.get_str(TAG_PATH) {
                Some(p) => Dependency::SourceFile { path: PathBuf::from(p), critical },
                None => Dependency::Invalid,
            },
            DependencyType::IntermediateFile => match section.get_str(TAG_PATH) {
                Some(p) => Dependency::IntermediateFile { path: PathBuf::from(p), critical },
                None => Dependency::Invalid,
            },
            DependencyType::OutputFile => match section.get_str(TAG_PATH) {
                Some(p) => Dependency::OutputFile { path: PathBuf::from(p), critical },
                None => Dependency::Invalid,
            },
            DependencyType::Converter => {
                match (section.get_u64(TAG_CONVERTER_ID), section.get_str(TAG_VERSION)) {
                    (Some(id), Some(version)) => {
                        Dependency::Converter { id, version: version.to_string(), critical }
                    }
                    _ => Dependency::Invalid,
                }
            }
            DependencyType::ConverterParams => match section.get_str(TAG_PARAMS) {
                Some(p) => Dependency::ConverterParams { params: p.to_string(), critical },
                None => Dependency::Invalid,
            },
            DependencyType::Directory => {
                match (section.get_str(TAG_PATH), section.get_str(TAG_PATTERN)) {
                    (Some(path), Some(pattern)) => Dependency::Directory {
                        path: PathBuf::from(path),
                        pattern: pattern.to_string(),
                        is_regex: section.get_bool(TAG_IS_REGEX).unwrap_or(false),
                        recursive: section.get_bool(TAG_RECURSIVE).unwrap_or(false),
                        critical,
                    },
                    _ => Dependency::Invalid,
                }
            }
            DependencyType::Invalid => Dependency::Invalid,
        };

        Ok(dep)
    }
}
