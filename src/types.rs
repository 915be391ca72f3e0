//! Semantic type model for declared interfaces
//!
//! Interfaces declare types as plain strings (`str`, `dict`, `dict|str`, ...).
//! They are parsed once into a closed [`SemanticType`] so that nested-access
//! and compatibility questions are answered on the type, never by string
//! matching.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared semantic type of an input, output or parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SemanticType {
    Str,
    Int,
    Float,
    Bool,
    Dict,
    List,
    #[default]
    Any,
    Union(BTreeSet<SemanticType>),
}

/// Outcome of asking whether `${x.field}` may traverse into a value of a given type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedAccess {
    Allowed,
    /// Only `any` could support it; permitted, but worth a warning
    Ambiguous,
    Rejected,
}

impl SemanticType {
    /// Parse a declared type string. Unknown names are treated as `any`.
    pub fn parse(declared: &str) -> Self {
        let mut members: BTreeSet<SemanticType> = BTreeSet::new();
        for part in declared.split('|') {
            match Self::parse_atom(part.trim()) {
                SemanticType::Union(inner) => members.extend(inner),
                atom => {
                    members.insert(atom);
                }
            }
        }

        match members.len() {
            0 => SemanticType::Any,
            1 => members.into_iter().next().unwrap_or(SemanticType::Any),
            _ => SemanticType::Union(members),
        }
    }

    fn parse_atom(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "str" | "string" | "text" => SemanticType::Str,
            "int" | "integer" => SemanticType::Int,
            "float" | "number" => SemanticType::Float,
            "bool" | "boolean" => SemanticType::Bool,
            "dict" | "object" | "map" => SemanticType::Dict,
            "list" | "array" => SemanticType::List,
            _ => SemanticType::Any,
        }
    }

    /// Member types (a non-union type is its own single member)
    pub fn members(&self) -> Vec<&SemanticType> {
        match self {
            SemanticType::Union(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, SemanticType::Any)
    }

    fn contains_any(&self) -> bool {
        self.members().into_iter().any(SemanticType::is_any)
    }

    /// True when at least one member can be traversed by field name
    pub fn supports_nested_access(&self) -> bool {
        self.members()
            .into_iter()
            .any(|member| matches!(member, SemanticType::Dict))
    }

    /// True when at least one member can be indexed
    pub fn supports_index_access(&self) -> bool {
        self.members()
            .into_iter()
            .any(|member| matches!(member, SemanticType::List))
    }

    /// Decide whether a path below an output of this type is acceptable.
    /// `by_index` is true when the first step of the path is `[n]`.
    pub fn nested_access(&self, by_index: bool) -> NestedAccess {
        let supported = if by_index {
            self.supports_index_access()
        } else {
            self.supports_nested_access()
        };

        if supported {
            NestedAccess::Allowed
        } else if self.contains_any() {
            NestedAccess::Ambiguous
        } else {
            NestedAccess::Rejected
        }
    }

    /// Whether a runtime value is compatible with this declared type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            SemanticType::Any => true,
            SemanticType::Str => value.is_string(),
            SemanticType::Int => value.is_i64() || value.is_u64(),
            SemanticType::Float => value.is_number(),
            SemanticType::Bool => value.is_boolean(),
            SemanticType::Dict => value.is_object(),
            SemanticType::List => value.is_array(),
            SemanticType::Union(inner) => inner.iter().any(|member| member.accepts(value)),
        }
    }
}

/// Short type name of a runtime value, in the declared-type vocabulary
pub fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Str => f.write_str("str"),
            SemanticType::Int => f.write_str("int"),
            SemanticType::Float => f.write_str("float"),
            SemanticType::Bool => f.write_str("bool"),
            SemanticType::Dict => f.write_str("dict"),
            SemanticType::List => f.write_str("list"),
            SemanticType::Any => f.write_str("any"),
            SemanticType::Union(inner) => {
                let names: Vec<String> = inner.iter().map(|t| t.to_string()).collect();
                f.write_str(&names.join("|"))
            }
        }
    }
}

impl From<String> for SemanticType {
    fn from(declared: String) -> Self {
        SemanticType::parse(&declared)
    }
}

impl From<&str> for SemanticType {
    fn from(declared: &str) -> Self {
        SemanticType::parse(declared)
    }
}

impl From<SemanticType> for String {
    fn from(ty: SemanticType) -> Self {
        ty.to_string()
    }
}
