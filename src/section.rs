//! Minimal XML-like document tree used to (de)serialize dependency lists.
//!
//! This is a deliberately small stand-in for the resource-file abstraction's
//! `DataSection` tree: a named node with string/bool/u64 attributes and
//! ordered named children. It is read/written through `quick-xml` rather
//! than modeled as full-blown serde structs because each `Dependency`
//! variant contributes a different attribute set to the same child slot.

use std::io::Cursor;

use quick_xml::{
    events::{BytesEnd, BytesStart, Event},
    Reader, Writer,
};

use crate::error::{AssetPipelineError, Result};

/// A single node: a name, an ordered list of `(key, value)` attributes, and
/// an ordered list of named children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Section>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attrs: Vec::new(), children: Vec::new() }
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.attrs.push((key.to_string(), value));
        }
    }

    pub fn set_u64(&mut self, key: &str, value: u64) {
        self.set_str(key, value.to_string());
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set_str(key, if value { "true" } else { "false" }.to_string());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_str(key)? {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn new_section(&mut self, name: impl Into<String>) -> &mut Section {
        self.children.push(Section::new(name));
        self.children.last_mut().expect("just pushed")
    }

    pub fn find_child(&self, name: &str) -> Option<&Section> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Serializes this section and its descendants to an XML document string.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        write_node(&mut writer, self)
            .map_err(|e| AssetPipelineError::Serialization(e.to_string()))?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| AssetPipelineError::Serialization(e.to_string()))
    }

    /// Parses an XML document into a `Section` tree rooted at its single
    /// top-level element.
    pub fn from_xml(xml: &str) -> Result<Section> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut stack: Vec<Section> = Vec::new();
        let mut root: Option<Section> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => stack.push(start_to_section(e)?),
                Ok(Event::Empty(ref e)) => {
                    let section = start_to_section(e)?;
                    push_finished(&mut stack, &mut root, section);
                }
                Ok(Event::End(_)) => {
                    let section = stack
                        .pop()
                        .ok_or_else(|| AssetPipelineError::Serialization("unbalanced tags".into()))?;
                    push_finished(&mut stack, &mut root, section);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(AssetPipelineError::Serialization(e.to_string())),
            }
        }

        root.ok_or_else(|| AssetPipelineError::Serialization("empty document".into()))
    }
}

fn push_finished(stack: &mut Vec<Section>, root: &mut Option<Section>, section: Section) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(section);
    } else {
        *root = Some(section);
    }
}

fn start_to_section(e: &BytesStart) -> Result<Section> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut section = Section::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| AssetPipelineError::Serialization(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| AssetPipelineError::Serialization(e.to_string()))?
            .into_owned();
        section.attrs.push((key, value));
    }
    Ok(section)
}

fn write_node<W: std::io::Write>(
    writer: &mut Writer<W>,
    section: &Section,
) -> std::io::Result<()> {
    let mut start = BytesStart::new(section.name.clone());
    for (k, v) in &section.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if section.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
    } else {
        writer.write_event(Event::Start(start))?;
        for child in &section.children {
            write_node(writer, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new(section.name.clone())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_attributes() {
        let mut root = Section::new("DependencyList");
        let inputs = root.new_section("PrimaryInputs");
        let dep = inputs.new_section("Dependency");
        dep.set_u64("Type", 0);
        dep.set_u64("Hash", 12345);
        dep.set_bool("Critical", true);

        let xml = root.to_xml().unwrap();
        let parsed = Section::from_xml(&xml).unwrap();

        assert_eq!(parsed.name, "DependencyList");
        let parsed_inputs = parsed.find_child("PrimaryInputs").unwrap();
        let parsed_dep = parsed_inputs.find_child("Dependency").unwrap();
        assert_eq!(parsed_dep.get_u64("Type"), Some(0));
        assert_eq!(parsed_dep.get_u64("Hash"), Some(12345));
        assert_eq!(parsed_dep.get_bool("Critical"), Some(true));
    }

    #[test]
    fn unknown_attribute_reads_as_none() {
        let section = Section::new("Dependency");
        assert_eq!(section.get_u64("Missing"), None);
    }
}
