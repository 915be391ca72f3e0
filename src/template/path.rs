//! Reference paths - `base.field[0].rest`
//!
//! Supports:
//! - `a.b.c` (dot notation)
//! - `a[0].b` (list index)
//! - `a.0` (numeric segment, indexes a list or reads key "0" of a dict)
//!
//! Traversal into a string value that holds JSON text parses it first, so
//! `${step.stdout.field}` works on a step that printed a JSON document.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;

use crate::types::type_name_of;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Dict field access: .field
    Field(String),
    /// List index access: [0]
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => write!(f, ".{}", name),
            Segment::Index(idx) => write!(f, "[{}]", idx),
        }
    }
}

/// Split a reference expression (`step.items[0].name`) into base and segments.
///
/// The expression must already match the template grammar; this never fails
/// on grammar-valid input.
pub fn parse_reference(expr: &str) -> (String, Vec<Segment>) {
    let base_end = expr.find(['.', '[']).unwrap_or(expr.len());
    let base = expr[..base_end].to_string();
    let mut segments = Vec::new();
    let mut rest = &expr[base_end..];

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            segments.push(Segment::Field(after_dot[..end].to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let Some(close) = after_bracket.find(']') else {
                break;
            };
            match after_bracket[..close].parse::<usize>() {
                Ok(idx) => segments.push(Segment::Index(idx)),
                Err(_) => segments.push(Segment::Field(after_bracket[..close].to_string())),
            }
            rest = &after_bracket[close + 1..];
        } else {
            break;
        }
    }

    (base, segments)
}

/// Render segments back to text (`.a[0].b`)
pub fn render_segments(segments: &[Segment]) -> String {
    segments.iter().map(|s| s.to_string()).collect()
}

/// Why a traversal stopped
#[derive(Debug, Clone, PartialEq)]
pub struct TraverseError {
    /// Index of the segment that could not be applied
    pub at: usize,
    /// Type name of the value the segment was applied to
    pub parent_type: &'static str,
    /// Keys of the parent when it was a dict
    pub available_keys: Vec<String>,
    /// Length of the parent when it was a list
    pub list_len: Option<usize>,
}

impl TraverseError {
    fn describe(at: usize, parent: &Value) -> Self {
        Self {
            at,
            parent_type: type_name_of(parent),
            available_keys: parent
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default(),
            list_len: parent.as_array().map(Vec::len),
        }
    }
}

fn parse_json_text(value: &Value) -> Option<Value> {
    let text = value.as_str()?.trim();
    if !(text.starts_with('{') || text.starts_with('[')) {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn step_into<'v>(value: &'v Value, segment: &Segment) -> Option<Cow<'v, Value>> {
    let borrowed = match (value, segment) {
        (Value::Object(map), Segment::Field(name)) => map.get(name),
        (Value::Object(map), Segment::Index(idx)) => map.get(&idx.to_string()),
        (Value::Array(items), Segment::Index(idx)) => items.get(*idx),
        (Value::Array(items), Segment::Field(name)) => {
            name.parse::<usize>().ok().and_then(|idx| items.get(idx))
        }
        (Value::String(_), _) => {
            let parsed = parse_json_text(value)?;
            return step_into(&parsed, segment).map(|v| Cow::Owned(v.into_owned()));
        }
        _ => None,
    };
    borrowed.map(Cow::Borrowed)
}

/// Apply segments to a value. Borrows as long as no JSON text had to be parsed.
pub fn traverse<'v>(root: &'v Value, segments: &[Segment]) -> Result<Cow<'v, Value>, TraverseError> {
    let mut current: Cow<'v, Value> = Cow::Borrowed(root);

    for (at, segment) in segments.iter().enumerate() {
        current = match current {
            Cow::Borrowed(value) => {
                step_into(value, segment).ok_or_else(|| TraverseError::describe(at, value))?
            }
            Cow::Owned(value) => {
                let next = step_into(&value, segment)
                    .map(Cow::into_owned)
                    .ok_or_else(|| TraverseError::describe(at, &value))?;
                Cow::Owned(next)
            }
        };
    }

    Ok(current)
}
