//! `${...}` template grammar, extraction and runtime resolution

pub mod parse;
pub mod path;
pub mod resolve;

pub use parse::{
    extract_refs, has_template, simple_reference, tokenize, value_has_template, TemplateRef,
    Token,
};
pub use path::{parse_reference, traverse, Segment};
pub use resolve::{
    check_type, stringify, Resolved, TemplateResolver, TypeViolation, Unresolved,
    DEFAULT_MAX_TEMPLATE_DEPTH,
};
