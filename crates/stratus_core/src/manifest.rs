//! Manifest rendering for hand-off to a provisioning engine.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Map};

use crate::error::{DeclarationError, DeclarationResult};
use crate::graph::ResourceGraph;
use crate::value::Value;

/// Output encoding for a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestFormat {
    #[default]
    Json,
    Yaml,
}

impl ManifestFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestFormat::Json => "json",
            ManifestFormat::Yaml => "yaml",
        }
    }
}

impl FromStr for ManifestFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ManifestFormat::Json),
            "yaml" | "yml" => Ok(ManifestFormat::Yaml),
            other => Err(format!("unknown manifest format: {}", other)),
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rendered resource graph.
///
/// References become `{"Ref": id}`, attribute references
/// `{"Fn::GetAtt": [id, attr]}`, joins `{"Fn::Join": [sep, parts]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest(serde_json::Value);

impl Manifest {
    /// Render a graph. The graph is validated first so a manifest never
    /// carries a dangling reference.
    pub fn from_graph(graph: &ResourceGraph) -> DeclarationResult<Self> {
        graph.validate()?;

        let mut resources = Map::new();
        for resource in graph.iter() {
            let properties: Map<String, serde_json::Value> = graph
                .effective_properties(resource)
                .iter()
                .map(|(k, v)| (k.clone(), render_value(v)))
                .collect();

            let mut entry = Map::new();
            entry.insert("Type".to_string(), json!(resource.kind.type_name()));
            entry.insert("Properties".to_string(), serde_json::Value::Object(properties));
            if !resource.depends_on.is_empty() {
                let depends_on: Vec<&str> = resource.depends_on.iter().map(|id| id.as_str()).collect();
                entry.insert("DependsOn".to_string(), json!(depends_on));
            }
            resources.insert(resource.id.to_string(), serde_json::Value::Object(entry));
        }

        let mut root = Map::new();
        root.insert("StackName".to_string(), json!(graph.name()));
        if let Some(region) = graph.region() {
            root.insert("Region".to_string(), json!(region));
        }
        root.insert("Tags".to_string(), json!(graph.tags()));
        root.insert("Resources".to_string(), serde_json::Value::Object(resources));

        Ok(Self(serde_json::Value::Object(root)))
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Look up a rendered resource by logical id.
    pub fn resource(&self, id: &str) -> Option<&serde_json::Value> {
        self.0.get("Resources").and_then(|r| r.get(id))
    }

    pub fn render(&self, format: ManifestFormat) -> DeclarationResult<String> {
        let rendered = match format {
            ManifestFormat::Json => serde_json::to_string_pretty(&self.0).map_err(|e| e.to_string()),
            ManifestFormat::Yaml => serde_yaml::to_string(&self.0).map_err(|e| e.to_string()),
        };
        rendered.map_err(DeclarationError::Rendering)
    }
}

fn render_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Str(s) => json!(s),
        Value::List(items) => serde_json::Value::Array(items.iter().map(render_value).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v)))
                .collect(),
        ),
        Value::Ref(reference) => match &reference.attribute {
            None => json!({ "Ref": reference.target.as_str() }),
            Some(attribute) => json!({ "Fn::GetAtt": [reference.target.as_str(), attribute] }),
        },
        Value::Join { separator, parts } => {
            let parts: Vec<serde_json::Value> = parts.iter().map(render_value).collect();
            json!({ "Fn::Join": [separator, parts] })
        }
    }
}
