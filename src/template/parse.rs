//! Template tokenizer with caching
//!
//! The grammar is `${identifier(.field | [index])*}`. Anything else that
//! starts with `$` (shell `$VAR`, `${arr[@]}`, `${#x}`) is literal text.
//! Tokenized templates are cached globally and shared through `Arc`.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::path::{parse_reference, Segment};

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+|\[[0-9]+\])*)\}")
        .expect("Invalid template regex")
});

static TOKEN_CACHE: Lazy<DashMap<String, Arc<Vec<Token>>>> = Lazy::new(DashMap::new);

/// A `${...}` reference, parsed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    /// Text between the braces, e.g. `step.items[0]`
    pub expr: String,
    /// First identifier, e.g. `step`
    pub base: String,
    pub path: Vec<Segment>,
}

impl TemplateRef {
    fn from_expr(expr: &str) -> Self {
        let (base, path) = parse_reference(expr);
        Self {
            expr: expr.to_string(),
            base,
            path,
        }
    }

    /// The reference as written, with braces
    pub fn placeholder(&self) -> String {
        format!("${{{}}}", self.expr)
    }
}

/// Token representing a parsed template fragment
#[derive(Debug, Clone)]
pub enum Token {
    /// Literal text (stores range in original string)
    Literal(Range<usize>),
    Reference(TemplateRef),
}

/// Parse a template into tokens (cached)
pub fn tokenize(template: &str) -> Arc<Vec<Token>> {
    if let Some(cached) = TOKEN_CACHE.get(template) {
        return Arc::clone(&cached);
    }

    let mut tokens = Vec::new();
    let mut literal_start = 0;
    for captures in TEMPLATE_RE.captures_iter(template) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() > literal_start {
            tokens.push(Token::Literal(literal_start..whole.start()));
        }
        tokens.push(Token::Reference(TemplateRef::from_expr(inner.as_str())));
        literal_start = whole.end();
    }
    if literal_start < template.len() {
        tokens.push(Token::Literal(literal_start..template.len()));
    }

    let tokens = Arc::new(tokens);
    TOKEN_CACHE.insert(template.to_string(), Arc::clone(&tokens));
    tokens
}

/// True when the string contains at least one reference
pub fn has_template(text: &str) -> bool {
    TEMPLATE_RE.is_match(text)
}

/// True when any string inside the value (recursively) contains a reference
pub fn value_has_template(value: &Value) -> bool {
    match value {
        Value::String(s) => has_template(s),
        Value::Array(items) => items.iter().any(value_has_template),
        Value::Object(map) => map.values().any(value_has_template),
        _ => false,
    }
}

/// The single reference when the whole string is exactly one `${...}`
pub fn simple_reference(text: &str) -> Option<TemplateRef> {
    let tokens = tokenize(text);
    match tokens.as_slice() {
        [Token::Reference(reference)] => Some(reference.clone()),
        _ => None,
    }
}

/// All references found in a value, recursively, in order of appearance
pub fn extract_refs(value: &Value) -> Vec<TemplateRef> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs
}

fn collect_refs(value: &Value, refs: &mut Vec<TemplateRef>) {
    match value {
        Value::String(s) => {
            for token in tokenize(s).iter() {
                if let Token::Reference(reference) = token {
                    if !refs.contains(reference) {
                        refs.push(reference.clone());
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, refs)),
        Value::Object(map) => map.values().for_each(|item| collect_refs(item, refs)),
        _ => {}
    }
}
