//! Dependency list: the full set of recorded inputs/outputs for one
//! conversion task, and its on-disk serialization.

use std::path::{Path, PathBuf};

use crate::dependency::Dependency;
use crate::error::{AssetPipelineError, Result};
use crate::hash::combine;
use crate::section::Section;

const SEC_PRIMARY_INPUTS: &str = "PrimaryInputs";
const SEC_SECONDARY_INPUTS: &str = "SecondaryInputs";
const SEC_INTERMEDIATE_OUTPUTS: &str = "IntermediateOutputs";
const SEC_OUTPUTS: &str = "Outputs";
const CHILD_DEPENDENCY: &str = "Dependency";
const CHILD_OUTPUT: &str = "Output";
const TAG_FILE: &str = "File";
const TAG_HASH: &str = "Hash";

/// All inputs/outputs captured for one task's conversion attempt.
///
/// Each input is `(Dependency, hash-at-record-time)`; each output is
/// `(relative_path, hash)`.
#[derive(Debug, Clone, Default)]
pub struct DependencyList {
    pub primary_inputs: Vec<(Dependency, u64)>,
    pub secondary_inputs: Vec<(Dependency, u64)>,
    pub intermediate_outputs: Vec<(PathBuf, u64)>,
    pub final_outputs: Vec<(PathBuf, u64)>,
}

impl DependencyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all four sequences and seeds the three mandatory primary
    /// inputs: `SourceFile`, `Converter{id,version}`, `ConverterParams`, in
    /// that order. Always performs a full reset, even when only
    /// `converter_version` changed - matching the original's behavior.
    pub fn initialise(&mut self, source: &Path, converter_id: u64, converter_version: &str, params: &str) {
        self.primary_inputs.clear();
        self.secondary_inputs.clear();
        self.intermediate_outputs.clear();
        self.final_outputs.clear();

        self.primary_inputs.push((
            Dependency::SourceFile { path: source.to_path_buf(), critical: true },
            0,
        ));
        self.primary_inputs.push((
            Dependency::Converter { id: converter_id, version: converter_version.to_string(), critical: true },
            0,
        ));
        self.primary_inputs.push((
            Dependency::ConverterParams { params: params.to_string(), critical: true },
            0,
        ));
    }

    /// True when the primary sequence still carries the mandatory
    /// `SourceFile`/`Converter`/`ConverterParams` header in that order and
    /// matches the given identity. Any deviation means the persisted list
    /// is stale.
    pub fn has_valid_primary_header(&self, source: &Path, converter_id: u64, converter_version: &str, params: &str) -> bool {
        if self.primary_inputs.len() < 3 {
            return false;
        }
        let matches_source = matches!(
            &self.primary_inputs[0].0,
            Dependency::SourceFile { path, .. } if path == source
        );
        let matches_converter = matches!(
            &self.primary_inputs[1].0,
            Dependency::Converter { id, version, .. } if *id == converter_id && version == converter_version
        );
        let matches_params = matches!(
            &self.primary_inputs[2].0,
            Dependency::ConverterParams { params: p, .. } if p == params
        );
        matches_source && matches_converter && matches_params
    }

    pub fn set_primary_hash(&mut self, index: usize, hash: u64) {
        if let Some(entry) = self.primary_inputs.get_mut(index) {
            entry.1 = hash;
        }
    }

    fn add_secondary(&mut self, dep: Dependency) {
        self.secondary_inputs.push((dep, 0));
    }

    pub fn add_secondary_source(&mut self, path: impl Into<PathBuf>, critical: bool) {
        self.add_secondary(Dependency::SourceFile { path: path.into(), critical });
    }

    pub fn add_secondary_intermediate(&mut self, path: impl Into<PathBuf>, critical: bool) {
        self.add_secondary(Dependency::IntermediateFile { path: path.into(), critical });
    }

    pub fn add_secondary_output(&mut self, path: impl Into<PathBuf>, critical: bool) {
        self.add_secondary(Dependency::OutputFile { path: path.into(), critical });
    }

    pub fn add_secondary_converter(&mut self, id: u64, version: impl Into<String>, critical: bool) {
        self.add_secondary(Dependency::Converter { id, version: version.into(), critical });
    }

    pub fn add_secondary_converter_params(&mut self, params: impl Into<String>, critical: bool) {
        self.add_secondary(Dependency::ConverterParams { params: params.into(), critical });
    }

    pub fn add_secondary_directory(
        &mut self,
        path: impl Into<PathBuf>,
        pattern: impl Into<String>,
        is_regex: bool,
        recursive: bool,
        critical: bool,
    ) {
        self.add_secondary(Dependency::Directory {
            path: path.into(),
            pattern: pattern.into(),
            is_regex,
            recursive,
            critical,
        });
    }

    pub fn set_secondary_hash(&mut self, index: usize, hash: u64) {
        if let Some(entry) = self.secondary_inputs.get_mut(index) {
            entry.1 = hash;
        }
    }

    pub fn add_intermediate_output(&mut self, path: impl Into<PathBuf>, hash: u64) {
        self.intermediate_outputs.push((path.into(), hash));
    }

    pub fn add_final_output(&mut self, path: impl Into<PathBuf>, hash: u64) {
        self.final_outputs.push((path.into(), hash));
    }

    /// `combine` of the sequence length then each stored hash, in order.
    /// Secondary hashes start at `0`, so this varies predictably between
    /// the primary-only and secondary-inclusive evaluation stages - the
    /// cache uses both as distinct keys.
    pub fn input_hash(&self, include_secondary: bool) -> u64 {
        let mut seed = crate::hash::hash_str("DependencyList::input_hash");
        combine(&mut seed, self.primary_inputs.len() as u64);
        for (_, hash) in &self.primary_inputs {
            combine(&mut seed, *hash);
        }
        if include_secondary {
            combine(&mut seed, self.secondary_inputs.len() as u64);
            for (_, hash) in &self.secondary_inputs {
                combine(&mut seed, *hash);
            }
        }
        seed
    }

    pub fn to_section(&self) -> Section {
        let mut root = Section::new("DependencyList");
        write_inputs(root.new_section(SEC_PRIMARY_INPUTS), &self.primary_inputs);
        write_inputs(root.new_section(SEC_SECONDARY_INPUTS), &self.secondary_inputs);
        write_outputs(root.new_section(SEC_INTERMEDIATE_OUTPUTS), &self.intermediate_outputs);
        write_outputs(root.new_section(SEC_OUTPUTS), &self.final_outputs);
        root
    }

    pub fn from_section(section: &Section) -> Result<DependencyList> {
        let mut list = DependencyList::new();
        if let Some(s) = section.find_child(SEC_PRIMARY_INPUTS) {
            list.primary_inputs = read_inputs(s)?;
        }
        if let Some(s) = section.find_child(SEC_SECONDARY_INPUTS) {
            list.secondary_inputs = read_inputs(s)?;
        }
        if let Some(s) = section.find_child(SEC_INTERMEDIATE_OUTPUTS) {
            list.intermediate_outputs = read_outputs(s);
        }
        if let Some(s) = section.find_child(SEC_OUTPUTS) {
            list.final_outputs = read_outputs(s);
        }
        Ok(list)
    }

    pub fn to_xml(&self) -> Result<String> {
        self.to_section().to_xml()
    }

    pub fn from_xml(xml: &str) -> Result<DependencyList> {
        DependencyList::from_section(&Section::from_xml(xml)?)
    }
}

fn write_inputs(section: &mut Section, inputs: &[(Dependency, u64)]) {
    for (dep, hash) in inputs {
        dep.serialize_out(section, CHILD_DEPENDENCY);
        let child = section.children.last_mut().expect("just pushed");
        child.set_u64(TAG_HASH, *hash);
    }
}

fn read_inputs(section: &Section) -> Result<Vec<(Dependency, u64)>> {
    section
        .children_named(CHILD_DEPENDENCY)
        .map(|child| {
            let dep = Dependency::serialize_in(child)?;
            let hash = child.get_u64(TAG_HASH).ok_or_else(|| {
                AssetPipelineError::Serialization("dependency missing Hash".into())
            })?;
            Ok((dep, hash))
        })
        .collect()
}

fn write_outputs(section: &mut Section, outputs: &[(PathBuf, u64)]) {
    for (path, hash) in outputs {
        let child = section.new_section(CHILD_OUTPUT);
        child.set_str(TAG_FILE, path.to_string_lossy());
        child.set_u64(TAG_HASH, *hash);
    }
}

fn read_outputs(section: &Section) -> Vec<(PathBuf, u64)> {
    section
        .children_named(CHILD_OUTPUT)
        .filter_map(|child| {
            let file = child.get_str(TAG_FILE)?;
            let hash = child.get_u64(TAG_HASH)?;
            Some((PathBuf::from(file), hash))
        })
        .collect()
}
