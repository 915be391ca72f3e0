//! Workflow IR - the declarative document a workflow is compiled from
//!
//! ```json
//! {
//!   "ir_version": "0.1.0",
//!   "inputs": {"topic": {"type": "str"}},
//!   "nodes": [{"id": "greet", "type": "echo", "params": {"text": "Hello ${topic}"}}],
//!   "edges": [],
//!   "outputs": {"greeting": {"source": "${greet.text}"}}
//! }
//! ```
//!
//! Documents are parsed to a raw JSON value (JSON or YAML), checked against
//! the embedded schema, then deserialized and checked for identity rules.

pub mod schema;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WeaveError};
use crate::policy::TemplateMode;
use crate::types::SemanticType;

pub const DEFAULT_IR_VERSION: &str = "0.1.0";
pub const DEFAULT_BATCH_ALIAS: &str = "item";

fn default_ir_version() -> String {
    DEFAULT_IR_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_alias() -> String {
    DEFAULT_BATCH_ALIAS.to_string()
}

/// A complete workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowIr {
    #[serde(default = "default_ir_version")]
    pub ir_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeIr>,
    #[serde(default)]
    pub edges: Vec<EdgeIr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputSpec>,
    #[serde(default)]
    pub template_resolution_mode: TemplateMode,
}

/// One step declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIr {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
}

/// A transition; `action` defaults to `"default"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeIr {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl EdgeIr {
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub input_type: SemanticType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Fed from piped standard input by the CLI
    #[serde(default)]
    pub stdin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub output_type: SemanticType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Template producing the value; when absent the output is read by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    #[default]
    FailFast,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Template that must resolve to a list
    pub items: String,
    #[serde(rename = "as", default = "default_alias")]
    pub alias: String,
    #[serde(default)]
    pub error_handling: BatchErrorPolicy,
}

impl WorkflowIr {
    /// Load a `.json`, `.yaml` or `.yml` document
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(WeaveError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value)
    }

    /// Schema-check, deserialize and identity-check a raw document
    pub fn from_value(value: Value) -> Result<Self> {
        schema::check(&value)?;
        let ir: WorkflowIr = serde_json::from_value(value)?;
        ir.check_identity()?;
        Ok(ir)
    }

    /// Node ids must be unique; batch aliases must not shadow a node id
    pub fn check_identity(&self) -> Result<()> {
        let mut details = Vec::new();
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                details.push(format!("Duplicate node id '{}'", node.id));
            }
        }
        for node in &self.nodes {
            if let Some(batch) = &node.batch {
                if seen.contains(batch.alias.as_str()) {
                    details.push(format!(
                        "Node '{}' batch alias '{}' shadows a node id",
                        node.id, batch.alias
                    ));
                }
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(WeaveError::Structural { details })
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeIr> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// Display name used in logs and the call stack
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }
}
