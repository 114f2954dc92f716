//! Conversion rules: map a source path to the converter that should build
//! it, and (for `GenericConversionRule`) support reverse lookup from an
//! output filename back to a candidate source.

use std::path::{Path, PathBuf};

use regex::Regex;

/// What a rule decided for one source path.
#[derive(Debug, Clone)]
pub struct ConversionDecision {
    pub converter_id: u64,
    pub converter_version: String,
    pub converter_params: String,
}

/// Knows how to create tasks for a file pattern. Registration order is
/// significant: rules are tried LIFO, so a more specific rule registered
/// later overrides an earlier, broader one.
pub trait ConversionRule: Send + Sync {
    /// Returns a decision if this rule claims `path`, consulted for both
    /// root (explicitly requested) and non-root (discovered-as-dependency)
    /// lookups.
    fn matches(&self, path: &Path) -> Option<ConversionDecision>;

    /// Given an *output* filename, returns the candidate source paths this
    /// rule would produce it from, most-likely-first. Used to resolve an
    /// `OutputFile` dependency back to the task that must run to produce
    /// it.
    fn reverse_lookup(&self, _output_path: &Path) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// One layer of a hierarchical config: an optional override attached to
/// a directory. A path's effective config is the nearest-wins merge of
/// every layer from its own directory up to the resource root.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    pub directory: PathBuf,
    pub no_conversion: Option<bool>,
    pub converter_name: Option<String>,
    pub converter_params: Option<String>,
    pub source_pattern: Option<String>,
    pub source_format: Option<String>,
}

/// Data-driven rule loaded from a hierarchical rules file: one source
/// pattern (glob or regex) maps to a converter name, resolved to an id
/// through the supplied `converters` table, with nearest-directory
/// overrides for params and source pattern.
pub struct GenericConversionRule {
    source_pattern: Regex,
    layers: Vec<ConfigLayer>,
    converters: std::collections::HashMap<String, u64>,
}

impl GenericConversionRule {
    pub fn new(source_pattern: Regex, layers: Vec<ConfigLayer>, converters: std::collections::HashMap<String, u64>) -> Self {
        Self { source_pattern, layers, converters }
    }

    /// Merges every layer whose directory is an ancestor of `path`,
    /// nearest-first so a closer override wins over outer-layer defaults.
    fn merged_config(&self, path: &Path) -> ConfigLayer {
        let mut applicable: Vec<&ConfigLayer> = self
            .layers
            .iter()
            .filter(|layer| path.starts_with(&layer.directory))
            .collect();
        applicable.sort_by_key(|layer| std::cmp::Reverse(layer.directory.components().count()));

        let mut merged = ConfigLayer::default();
        for layer in applicable {
            merged.no_conversion = merged.no_conversion.or(layer.no_conversion);
            merged.converter_name = merged.converter_name.clone().or_else(|| layer.converter_name.clone());
            merged.converter_params = merged.converter_params.clone().or_else(|| layer.converter_params.clone());
            merged.source_pattern = merged.source_pattern.clone().or_else(|| layer.source_pattern.clone());
            merged.source_format = merged.source_format.clone().or_else(|| layer.source_format.clone());
        }
        merged
    }
}

impl ConversionRule for GenericConversionRule {
    fn matches(&self, path: &Path) -> Option<ConversionDecision> {
        let name = path.file_name()?.to_string_lossy();
        if !self.source_pattern.is_match(&name) {
            return None;
        }

        let config = self.merged_config(path);
        if config.no_conversion == Some(true) {
            return None;
        }

        let converter_name = config.converter_name?;
        let converter_id = *self.converters.get(&converter_name)?;

        Some(ConversionDecision {
            converter_id,
            converter_version: String::new(),
            converter_params: config.converter_params.unwrap_or_default(),
        })
    }

    /// Applies the nearest layer's `sourcePattern`/`sourceFormat` regex
    /// substitution to `output_path`'s filename to produce candidate
    /// source filenames; the first existing one should win at the call
    /// site, else the last matching name is used as a best guess.
    fn reverse_lookup(&self, output_path: &Path) -> Vec<PathBuf> {
        let config = self.merged_config(output_path);
        let (Some(pattern), Some(format)) = (config.source_pattern, config.source_format) else {
            return Vec::new();
        };
        let Ok(re) = Regex::new(&pattern) else { return Vec::new() };
        let Some(name) = output_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Vec::new();
        };
        if !re.is_match(&name) {
            return Vec::new();
        }

        let candidate_name = re.replace(&name, format.as_str()).into_owned();
        let candidate = output_path.with_file_name(candidate_name);
        vec![candidate]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converters() -> std::collections::HashMap<String, u64> {
        let mut map = std::collections::HashMap::new();
        map.insert("UppercaseConverter".to_string(), 0xABCD);
        map
    }

    #[test]
    fn matches_applies_nearest_layer_override() {
        let layers = vec![
            ConfigLayer {
                directory: PathBuf::from("/res"),
                converter_name: Some("UppercaseConverter".into()),
                converter_params: Some("outer".into()),
                ..Default::default()
            },
            ConfigLayer {
                directory: PathBuf::from("/res/nested"),
                converter_params: Some("inner".into()),
                ..Default::default()
            },
        ];
        let rule = GenericConversionRule::new(Regex::new(r"\.txt$").unwrap(), layers, converters());

        let decision = rule.matches(Path::new("/res/nested/a.txt")).unwrap();
        assert_eq!(decision.converter_params, "inner");
        assert_eq!(decision.converter_id, 0xABCD);
    }

    #[test]
    fn no_conversion_layer_suppresses_match() {
        let layers = vec![ConfigLayer {
            directory: PathBuf::from("/res"),
            converter_name: Some("UppercaseConverter".into()),
            no_conversion: Some(true),
            ..Default::default()
        }];
        let rule = GenericConversionRule::new(Regex::new(r"\.txt$").unwrap(), layers, converters());
        assert!(rule.matches(Path::new("/res/a.txt")).is_none());
    }

    #[test]
    fn reverse_lookup_substitutes_source_format() {
        let layers = vec![ConfigLayer {
            directory: PathBuf::from("/out"),
            converter_name: Some("UppercaseConverter".into()),
            source_pattern: Some(r"^(.*)\.TXT$".into()),
            source_format: Some("$1.txt".into()),
            ..Default::default()
        }];
        let rule = GenericConversionRule::new(Regex::new(r"\.txt$").unwrap(), layers, converters());

        let candidates = rule.reverse_lookup(Path::new("/out/a.TXT"));
        assert_eq!(candidates, vec![PathBuf::from("/out/a.txt")]);
    }
}
