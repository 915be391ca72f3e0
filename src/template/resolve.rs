//! Runtime template resolution
//!
//! A string that is exactly one reference (`"${x}"`) resolves to the
//! referenced value with its type intact. Any other string with references
//! is rebuilt as text, each resolved value stringified. Substitution walks
//! the original tokens once, so resolved values are never re-scanned.

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::warn;

use super::parse::{tokenize, TemplateRef, Token};
use super::path::{render_segments, traverse};
use crate::types::{type_name_of, SemanticType};

/// Default bound for descending into nested parameter structures
pub const DEFAULT_MAX_TEMPLATE_DEPTH: usize = 100;

/// A reference that could not be resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub reference: TemplateRef,
    /// The string the reference appeared in
    pub source: String,
    /// Human hint built from what the context does contain
    pub hint: String,
}

/// Result of resolving a value
#[derive(Debug, Clone)]
pub struct Resolved {
    pub value: Value,
    pub unresolved: Vec<Unresolved>,
}

impl Resolved {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// A declared-type violation found after resolving a simple reference
#[derive(Debug, Clone, PartialEq)]
pub struct TypeViolation {
    pub expected: String,
    pub actual: String,
    pub hint: String,
}

/// Resolves references against pre-bound parameters first, then the context
pub struct TemplateResolver<'a> {
    data: &'a Map<String, Value>,
    bindings: &'a Map<String, Value>,
    max_depth: usize,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(data: &'a Map<String, Value>, bindings: &'a Map<String, Value>) -> Self {
        Self {
            data,
            bindings,
            max_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn root(&self, base: &str) -> Option<&'a Value> {
        self.bindings.get(base).or_else(|| self.data.get(base))
    }

    /// Look up one reference
    pub fn lookup(&self, reference: &TemplateRef) -> Option<Cow<'a, Value>> {
        let root = self.root(&reference.base)?;
        traverse(root, &reference.path).ok()
    }

    /// Explain why a reference did not resolve, listing what is available
    pub fn hint_for(&self, reference: &TemplateRef) -> String {
        let Some(root) = self.root(&reference.base) else {
            let mut names: Vec<&str> = self
                .bindings
                .keys()
                .chain(self.data.keys())
                .map(String::as_str)
                .filter(|k| !k.starts_with("__"))
                .collect();
            names.sort_unstable();
            names.dedup();
            let lower = reference.base.to_lowercase();
            let similar: Vec<&str> = names
                .iter()
                .copied()
                .filter(|k| {
                    let k = k.to_lowercase();
                    k.contains(&lower) || lower.contains(&k)
                })
                .take(3)
                .collect();
            return if !similar.is_empty() {
                format!(
                    "'{}' is not in the context. Did you mean: {}?",
                    reference.base,
                    similar.join(", ")
                )
            } else if names.is_empty() {
                format!("'{}' is not in the context, which is empty", reference.base)
            } else {
                format!(
                    "'{}' is not in the context. Available: {}",
                    reference.base,
                    names.join(", ")
                )
            };
        };

        match traverse(root, &reference.path) {
            Ok(_) => format!("'{}' resolved", reference.expr),
            Err(err) => {
                let parent = format!(
                    "{}{}",
                    reference.base,
                    render_segments(&reference.path[..err.at])
                );
                if !err.available_keys.is_empty() {
                    format!(
                        "Available fields on '{}': {}",
                        parent,
                        err.available_keys.join(", ")
                    )
                } else if let Some(len) = err.list_len {
                    format!(
                        "'{}' is a list of {} item(s); index it like ${{{}[0]}}",
                        parent, len, parent
                    )
                } else {
                    format!(
                        "'{}' is a {} and has no field '{}'",
                        parent,
                        err.parent_type,
                        render_segments(&reference.path[err.at..err.at + 1])
                            .trim_start_matches('.')
                    )
                }
            }
        }
    }

    /// Resolve one string
    pub fn resolve_str(&self, text: &str) -> Resolved {
        let tokens = tokenize(text);

        if let [Token::Reference(reference)] = tokens.as_slice() {
            return match self.lookup(reference) {
                Some(value) => Resolved {
                    value: value.into_owned(),
                    unresolved: Vec::new(),
                },
                None => Resolved {
                    value: Value::String(text.to_string()),
                    unresolved: vec![self.unresolved(reference, text)],
                },
            };
        }

        let mut unresolved = Vec::new();
        let mut out = String::with_capacity(text.len() * 2);
        for token in tokens.iter() {
            match token {
                Token::Literal(range) => out.push_str(&text[range.clone()]),
                Token::Reference(reference) => match self.lookup(reference) {
                    Some(value) => out.push_str(&stringify(&value)),
                    None => {
                        // Keep original placeholder if not found
                        out.push_str(&reference.placeholder());
                        unresolved.push(self.unresolved(reference, text));
                    }
                },
            }
        }

        Resolved {
            value: Value::String(out),
            unresolved,
        }
    }

    /// Resolve a value, descending into lists and dicts
    pub fn resolve_value(&self, value: &Value) -> Resolved {
        let mut unresolved = Vec::new();
        let value = self.resolve_at(value, 0, &mut unresolved);
        Resolved { value, unresolved }
    }

    fn resolve_at(&self, value: &Value, depth: usize, unresolved: &mut Vec<Unresolved>) -> Value {
        if depth > self.max_depth {
            warn!(
                max_depth = self.max_depth,
                "template nesting too deep, leaving remaining structure unresolved"
            );
            return value.clone();
        }

        match value {
            Value::String(text) => {
                let resolved = self.resolve_str(text);
                unresolved.extend(resolved.unresolved);
                resolved.value
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_at(item, depth + 1, unresolved))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_at(v, depth + 1, unresolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn unresolved(&self, reference: &TemplateRef, source: &str) -> Unresolved {
        Unresolved {
            reference: reference.clone(),
            source: source.to_string(),
            hint: self.hint_for(reference),
        }
    }
}

/// Stringify a value for embedding in text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Check a resolved value against the declared type of the parameter it fills
pub fn check_type(declared: &SemanticType, value: &Value) -> Result<(), TypeViolation> {
    if declared.accepts(value) {
        return Ok(());
    }

    let actual = type_name_of(value);
    let hint = match (declared, value) {
        (SemanticType::Str, Value::Object(map)) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!(
                "Reference a string field instead, e.g. one of: {}",
                keys.join(", ")
            )
        }
        (SemanticType::Str, Value::Array(items)) => format!(
            "The value is a list of {} item(s); index it with [0] or join it upstream",
            items.len()
        ),
        _ => format!("Expected {}, got {}", declared, actual),
    };

    Err(TypeViolation {
        expected: declared.to_string(),
        actual: actual.to_string(),
        hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn simple_reference_preserves_type() {
        let data = map(json!({"a": {"b": [1, 2]}}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);

        let resolved = resolver.resolve_str("${a.b}");
        assert!(resolved.is_complete());
        assert_eq!(resolved.value, json!([1, 2]));
    }

    #[test]
    fn complex_reference_stringifies() {
        let data = map(json!({"n": 3, "d": {"k": "v"}, "s": "text"}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);

        assert_eq!(resolver.resolve_str("n=${n}").value, json!("n=3"));
        assert_eq!(resolver.resolve_str("d=${d}").value, json!("d={\"k\":\"v\"}"));
        assert_eq!(resolver.resolve_str("${s}!").value, json!("text!"));
    }

    #[test]
    fn resolution_is_single_pass() {
        let data = map(json!({"a": "${b}", "b": "leak"}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);
        assert_eq!(resolver.resolve_str("${a}").value, json!("${b}"));
        assert_eq!(resolver.resolve_str("x ${a}").value, json!("x ${b}"));
    }

    #[test]
    fn bindings_take_priority_over_context() {
        let data = map(json!({"item": "from-context"}));
        let bindings = map(json!({"item": "bound"}));
        let resolver = TemplateResolver::new(&data, &bindings);
        assert_eq!(resolver.resolve_str("${item}").value, json!("bound"));
    }

    #[test]
    fn unresolved_keeps_placeholder_and_hints_fields() {
        let data = map(json!({"step1": {"x": 1}}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);

        let resolved = resolver.resolve_str("value ${step1.y}");
        assert_eq!(resolved.value, json!("value ${step1.y}"));
        assert_eq!(resolved.unresolved.len(), 1);
        assert_eq!(resolved.unresolved[0].hint, "Available fields on 'step1': x");
    }

    #[test]
    fn hint_suggests_similar_names() {
        let data = map(json!({"fetch_data": {}}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);
        let resolved = resolver.resolve_str("${fetch}");
        assert!(resolved.unresolved[0].hint.contains("Did you mean: fetch_data"));
    }

    #[test]
    fn nested_structures_resolve_recursively() {
        let data = map(json!({"a": 1}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings);
        let resolved = resolver.resolve_value(&json!({"x": ["${a}", {"y": "n${a}"}], "z": true}));
        assert_eq!(resolved.value, json!({"x": [1, {"y": "n1"}], "z": true}));
    }

    #[test]
    fn depth_guard_stops_without_error() {
        let data = map(json!({"a": 1}));
        let bindings = Map::new();
        let resolver = TemplateResolver::new(&data, &bindings).with_max_depth(1);
        let resolved = resolver.resolve_value(&json!({"l1": {"l2": "${a}"}}));
        assert!(resolved.is_complete());
        assert_eq!(resolved.value, json!({"l1": {"l2": "${a}"}}));
    }

    #[test]
    fn type_check_explains_dict_for_str() {
        let violation = check_type(&SemanticType::Str, &json!({"title": "t"})).unwrap_err();
        assert_eq!(violation.expected, "str");
        assert_eq!(violation.actual, "dict");
        assert!(violation.hint.contains("title"));

        assert!(check_type(&SemanticType::parse("str|dict"), &json!({})).is_ok());
    }
}
