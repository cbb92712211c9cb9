//! Node introspection dump: the JSON artifact describing the host's built-in
//! node types, and the socket-type summary derived from it.
//!
//! The dump is produced inside the host application by a separate script;
//! this module only reads it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Node categories present in a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Geometry,
    Shader,
    Compositor,
}

impl Category {
    /// All categories, in dump order.
    pub const ALL: [Category; 3] = [Category::Geometry, Category::Shader, Category::Compositor];

    /// Top-level key used in the JSON document.
    pub fn key(self) -> &'static str {
        match self {
            Category::Geometry => "GeometryNodes",
            Category::Shader => "ShaderNodes",
            Category::Compositor => "CompositorNodes",
        }
    }
}

/// The whole dump document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDump {
    #[serde(rename = "GeometryNodes", default)]
    pub geometry: BTreeMap<String, NodeDef>,
    #[serde(rename = "ShaderNodes", default)]
    pub shader: BTreeMap<String, NodeDef>,
    #[serde(rename = "CompositorNodes", default)]
    pub compositor: BTreeMap<String, NodeDef>,
}

/// One node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    #[serde(rename = "bl_idname")]
    pub identifier: String,
    #[serde(rename = "bl_label")]
    pub label: String,
    #[serde(default)]
    pub inputs: Vec<SocketDef>,
    #[serde(default)]
    pub outputs: Vec<SocketDef>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

/// An input or output socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketDef {
    pub name: String,
    pub identifier: String,
    #[serde(rename = "type")]
    pub socket_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_multi_input: bool,
    /// `None` when the socket has no default at all, `Some(None)` when the
    /// dumper found one but could not convert it (written as `null`).
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Option<serde_json::Value>>,
}

impl SocketDef {
    /// The converted default value, if the socket has a readable one.
    pub fn default_value(&self) -> Option<&serde_json::Value> {
        self.default.as_ref().and_then(Option::as_ref)
    }
}

/// Marks a key that is present in the document, even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// An editable node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub identifier: String,
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_items: Option<Vec<EnumItem>>,
}

/// One choice of an `ENUM` property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumItem {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NodeDump {
    /// Parse a dump from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a dump file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Nodes of one category.
    pub fn category(&self, category: Category) -> &BTreeMap<String, NodeDef> {
        match category {
            Category::Geometry => &self.geometry,
            Category::Shader => &self.shader,
            Category::Compositor => &self.compositor,
        }
    }

    /// Iterate over every node with its category.
    pub fn nodes(&self) -> impl Iterator<Item = (Category, &NodeDef)> {
        Category::ALL
            .into_iter()
            .flat_map(move |category| self.category(category).values().map(move |node| (category, node)))
    }

    /// Look a node type up by identifier in any category.
    pub fn find(&self, identifier: &str) -> Option<(Category, &NodeDef)> {
        Category::ALL
            .into_iter()
            .find_map(|category| self.category(category).get(identifier).map(|node| (category, node)))
    }

    /// Total number of node types.
    pub fn node_count(&self) -> usize {
        self.geometry.len() + self.shader.len() + self.compositor.len()
    }
}

/// Unique socket type names, split by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketTypeSummary {
    pub input_types: BTreeSet<String>,
    pub output_types: BTreeSet<String>,
}

impl SocketTypeSummary {
    /// Collect socket types across every category of `dump`.
    pub fn from_dump(dump: &NodeDump) -> Self {
        let mut summary = Self::default();
        for (_, node) in dump.nodes() {
            summary
                .input_types
                .extend(node.inputs.iter().map(|s| s.socket_type.clone()));
            summary
                .output_types
                .extend(node.outputs.iter().map(|s| s.socket_type.clone()));
        }
        summary
    }

    /// Text report, sorted, one type per line.
    pub fn render(&self) -> String {
        let mut out = String::from("=== Input Socket Types ===\n");
        for name in &self.input_types {
            let _ = writeln!(out, "  {name}");
        }
        out.push_str("\n=== Output Socket Types ===\n");
        for name in &self.output_types {
            let _ = writeln!(out, "  {name}");
        }
        out
    }
}
