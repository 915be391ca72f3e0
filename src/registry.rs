//! Interface registry: step-type name → (factory, declared interface)
//!
//! The compiler only asks the registry for an instance and its metadata;
//! it never branches on a type name itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeLimits;
use crate::dataflow::find_similar;
use crate::nodes::Node;
use crate::types::SemanticType;

// ============================================================================
// DECLARED INTERFACES
// ============================================================================

/// Documented shape of a nested field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldShape {
    #[serde(rename = "type", default)]
    pub field_type: SemanticType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub structure: BTreeMap<String, FieldShape>,
}

impl FieldShape {
    pub fn new(field_type: &str) -> Self {
        Self {
            field_type: SemanticType::parse(field_type),
            ..Self::default()
        }
    }
}

/// One declared input, output or param
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceField {
    pub key: String,
    #[serde(rename = "type", default)]
    pub field_type: SemanticType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub structure: BTreeMap<String, FieldShape>,
    /// Passed to the unit verbatim: never scanned for references
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub opaque: bool,
}

impl InterfaceField {
    pub fn new(key: impl Into<String>, field_type: &str) -> Self {
        Self {
            key: key.into(),
            field_type: SemanticType::parse(field_type),
            description: String::new(),
            structure: BTreeMap::new(),
            opaque: false,
        }
    }

    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, shape: FieldShape) -> Self {
        self.structure.insert(name.into(), shape);
        self
    }
}

/// Declared interface of a step type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeInterface {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InterfaceField>,
    #[serde(default)]
    pub outputs: Vec<InterfaceField>,
    #[serde(default)]
    pub params: Vec<InterfaceField>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl NodeInterface {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, field: InterfaceField) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn with_output(mut self, field: InterfaceField) -> Self {
        self.outputs.push(field);
        self
    }

    pub fn with_param(mut self, field: InterfaceField) -> Self {
        self.params.push(field);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn output(&self, key: &str) -> Option<&InterfaceField> {
        self.outputs.iter().find(|f| f.key == key)
    }

    /// True for params the unit takes verbatim (e.g. an embedded workflow document)
    pub fn is_opaque(&self, key: &str) -> bool {
        self.params.iter().any(|f| f.key == key && f.opaque)
    }

    /// Declared type of a parameter; params shadow inputs of the same name
    pub fn param_type(&self, key: &str) -> Option<&SemanticType> {
        self.params
            .iter()
            .chain(self.inputs.iter())
            .find(|f| f.key == key)
            .map(|f| &f.field_type)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// What a factory gets to know about the step it builds
pub struct BuildContext<'a> {
    pub node_id: &'a str,
    pub registry: &'a Arc<Registry>,
    pub limits: &'a RuntimeLimits,
    /// Directory relative workflow references are resolved against
    pub base_dir: Option<&'a Path>,
}

pub type NodeFactory = Arc<dyn Fn(&BuildContext<'_>) -> Box<dyn Node> + Send + Sync>;

struct Entry {
    factory: NodeFactory,
    interface: NodeInterface,
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `echo`, `fail`, `delay` and `workflow`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        crate::subworkflow::register(&mut registry);
        registry
    }

    /// Register (or replace) a step type
    pub fn register<F>(&mut self, type_name: impl Into<String>, interface: NodeInterface, factory: F)
    where
        F: Fn(&BuildContext<'_>) -> Box<dyn Node> + Send + Sync + 'static,
    {
        self.entries.insert(
            type_name.into(),
            Entry {
                factory: Arc::new(factory),
                interface,
            },
        );
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Instantiate a unit of the given type along with its interface
    pub fn lookup(
        &self,
        type_name: &str,
        ctx: &BuildContext<'_>,
    ) -> Option<(Box<dyn Node>, &NodeInterface)> {
        let entry = self.entries.get(type_name)?;
        Some(((entry.factory)(ctx), &entry.interface))
    }

    pub fn interface(&self, type_name: &str) -> Option<&NodeInterface> {
        self.entries.get(type_name).map(|e| &e.interface)
    }

    /// Interfaces for the given type names; unknown names are skipped
    pub fn get_interfaces<'n, I>(&self, type_names: I) -> BTreeMap<String, NodeInterface>
    where
        I: IntoIterator<Item = &'n str>,
    {
        type_names
            .into_iter()
            .filter_map(|name| {
                self.interface(name)
                    .map(|interface| (name.to_string(), interface.clone()))
            })
            .collect()
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn find_similar(&self, type_name: &str, max_results: usize) -> Vec<&str> {
        find_similar(type_name, &self.type_names(), max_results)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.type_names())
            .finish()
    }
}
