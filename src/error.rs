//! Error types with fix suggestions
//!
//! Error code ranges:
//! - WEAVE-000-009: Parse / IO errors
//! - WEAVE-010-019: Structural IR errors
//! - WEAVE-020-029: Graph / data-flow errors
//! - WEAVE-030-039: Compilation errors
//! - WEAVE-040-049: Template resolution errors
//! - WEAVE-050-059: Recursion errors
//! - WEAVE-060-069: Execution errors

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataflow::DataFlowError;

pub type Result<T> = std::result::Result<T, WeaveError>;

/// Format data-flow diagnostics for display
fn format_diagnostics(diagnostics: &[DataFlowError]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Coarse error taxonomy, reported as `category` in run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Structural,
    Resolution,
    Graph,
    Execution,
    Recursion,
    Batch,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Structural => "structural",
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::Graph => "graph",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Recursion => "recursion",
            ErrorCategory::Batch => "batch",
        };
        f.write_str(name)
    }
}

/// Compiler phase a [`CompilationError`] was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilePhase {
    Parsing,
    Validation,
    NodeResolution,
    FlowWiring,
    StartDetection,
}

impl fmt::Display for CompilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilePhase::Parsing => "parsing",
            CompilePhase::Validation => "validation",
            CompilePhase::NodeResolution => "node_resolution",
            CompilePhase::FlowWiring => "flow_wiring",
            CompilePhase::StartDetection => "start_detection",
        };
        f.write_str(name)
    }
}

/// Rich compile-time error tagged with the phase it happened in
#[derive(Debug, Clone, Error)]
#[error("[{phase}] {message}")]
pub struct CompilationError {
    pub phase: CompilePhase,
    pub message: String,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub suggestion: Option<String>,
}

impl CompilationError {
    pub fn new(phase: CompilePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            node_id: None,
            node_type: None,
            suggestion: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum WeaveError {
    // ─────────────────────────────────────────────────────────────
    // Parse / IO (WEAVE-000 to WEAVE-009)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-001: IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WEAVE-002: JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("WEAVE-003: YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("WEAVE-004: Unsupported workflow file extension: {path}")]
    UnsupportedFormat { path: String },

    // ─────────────────────────────────────────────────────────────
    // Structural (WEAVE-010 to WEAVE-019)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-010: Malformed workflow IR: {}", .details.join("; "))]
    Structural { details: Vec<String> },

    #[error("WEAVE-011: Missing required workflow input(s): {}", .names.join(", "))]
    MissingInputs { names: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Graph / data-flow (WEAVE-020 to WEAVE-029)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-020: Data-flow validation failed: {}", format_diagnostics(.diagnostics))]
    DataFlow { diagnostics: Vec<DataFlowError> },

    // ─────────────────────────────────────────────────────────────
    // Compilation (WEAVE-030 to WEAVE-039)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-030: Compilation failed {0}")]
    Compilation(#[from] CompilationError),

    // ─────────────────────────────────────────────────────────────
    // Template resolution (WEAVE-040 to WEAVE-049)
    // ─────────────────────────────────────────────────────────────
    #[error(
        "WEAVE-040: Node '{node_id}' parameter '{param}': unresolved reference(s) {} in '{template}'",
        .unresolved.join(", ")
    )]
    UnresolvedTemplate {
        node_id: String,
        param: String,
        template: String,
        unresolved: Vec<String>,
        hint: String,
    },

    #[error(
        "WEAVE-041: Node '{node_id}' parameter '{param}': '{template}' resolved to {actual}, expected {expected}"
    )]
    TypeMismatch {
        node_id: String,
        param: String,
        template: String,
        expected: String,
        actual: String,
        hint: String,
    },

    #[error("WEAVE-042: Node '{node_id}' batch items '{template}' did not resolve to a list ({actual})")]
    InvalidBatchItems {
        node_id: String,
        template: String,
        actual: String,
    },

    #[error(
        "WEAVE-043: Node '{node_id}': '{template}' accesses '{nested_path}' on output type '{output_type}' which does not support nested access"
    )]
    NestedAccess {
        node_id: String,
        template: String,
        output_type: String,
        nested_path: String,
    },

    #[error(
        "WEAVE-044: Node '{node_id}': '{template}' reads '{output}' which node '{source_node}' does not declare"
    )]
    UndeclaredOutput {
        node_id: String,
        template: String,
        source_node: String,
        output: String,
        hint: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Recursion (WEAVE-050 to WEAVE-059)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-050: Maximum workflow nesting depth {max} exceeded while calling '{workflow}'")]
    MaxDepthExceeded { workflow: String, depth: usize, max: usize },

    #[error("WEAVE-051: Circular workflow reference: {} -> {workflow}", .stack.join(" -> "))]
    CircularWorkflow { workflow: String, stack: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Execution (WEAVE-060 to WEAVE-069)
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-060: Step limit of {max} exceeded while walking the graph")]
    StepLimitExceeded { max: usize },

    #[error("WEAVE-061: Node '{node_id}' failed: {message}")]
    Execution { node_id: String, message: String },
}

impl WeaveError {
    /// Taxonomy bucket used in run results
    pub fn category(&self) -> ErrorCategory {
        match self {
            WeaveError::Io(_)
            | WeaveError::JsonParse(_)
            | WeaveError::YamlParse(_)
            | WeaveError::UnsupportedFormat { .. }
            | WeaveError::Structural { .. }
            | WeaveError::MissingInputs { .. } => ErrorCategory::Structural,
            WeaveError::DataFlow { .. } | WeaveError::StepLimitExceeded { .. } => {
                ErrorCategory::Graph
            }
            WeaveError::Compilation(err) => match err.phase {
                CompilePhase::Parsing => ErrorCategory::Structural,
                CompilePhase::NodeResolution | CompilePhase::Validation => {
                    ErrorCategory::Resolution
                }
                CompilePhase::FlowWiring | CompilePhase::StartDetection => ErrorCategory::Graph,
            },
            WeaveError::UnresolvedTemplate { .. }
            | WeaveError::TypeMismatch { .. }
            | WeaveError::InvalidBatchItems { .. }
            | WeaveError::NestedAccess { .. }
            | WeaveError::UndeclaredOutput { .. } => ErrorCategory::Resolution,
            WeaveError::MaxDepthExceeded { .. } | WeaveError::CircularWorkflow { .. } => {
                ErrorCategory::Recursion
            }
            WeaveError::Execution { .. } => ErrorCategory::Execution,
        }
    }

    /// Offending node id, when known
    pub fn node_id(&self) -> Option<&str> {
        match self {
            WeaveError::UnresolvedTemplate { node_id, .. }
            | WeaveError::TypeMismatch { node_id, .. }
            | WeaveError::InvalidBatchItems { node_id, .. }
            | WeaveError::NestedAccess { node_id, .. }
            | WeaveError::UndeclaredOutput { node_id, .. }
            | WeaveError::Execution { node_id, .. } => Some(node_id),
            WeaveError::Compilation(err) => err.node_id.as_deref(),
            _ => None,
        }
    }

    /// Phase tag for fatal errors surfaced to users
    pub fn phase(&self) -> &'static str {
        match self {
            WeaveError::Compilation(err) => match err.phase {
                CompilePhase::Parsing => "parsing",
                CompilePhase::Validation => "validation",
                CompilePhase::NodeResolution => "node_resolution",
                CompilePhase::FlowWiring => "flow_wiring",
                CompilePhase::StartDetection => "start_detection",
            },
            WeaveError::Io(_)
            | WeaveError::JsonParse(_)
            | WeaveError::YamlParse(_)
            | WeaveError::UnsupportedFormat { .. }
            | WeaveError::Structural { .. } => "parsing",
            WeaveError::MissingInputs { .. }
            | WeaveError::DataFlow { .. }
            | WeaveError::NestedAccess { .. }
            | WeaveError::UndeclaredOutput { .. } => "validation",
            _ => "execution",
        }
    }
}

impl FixSuggestion for WeaveError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            WeaveError::Io(_) => Some("Check file path and permissions"),
            WeaveError::JsonParse(_) => Some("Check JSON syntax: brackets, commas and quoting"),
            WeaveError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            WeaveError::UnsupportedFormat { .. } => {
                Some("Use a .json, .yaml or .yml workflow file")
            }
            WeaveError::Structural { .. } => {
                Some("Fix the IR shape: nodes need 'id' and 'type', edges need 'from' and 'to'")
            }
            WeaveError::MissingInputs { .. } => {
                Some("Pass the input with --param name=value or declare a default")
            }
            WeaveError::DataFlow { .. } => {
                Some("Reference only declared inputs or steps that run earlier")
            }
            WeaveError::Compilation(err) => err.suggestion.as_deref(),
            WeaveError::UnresolvedTemplate { hint, .. }
            | WeaveError::TypeMismatch { hint, .. }
            | WeaveError::UndeclaredOutput { hint, .. } => Some(hint.as_str()),
            WeaveError::InvalidBatchItems { .. } => {
                Some("Point batch.items at a list, e.g. ${step.files}")
            }
            WeaveError::NestedAccess { .. } => {
                Some("Declare the output as dict (or a union containing dict) before reading sub-fields")
            }
            WeaveError::MaxDepthExceeded { .. } => {
                Some("Reduce sub-workflow nesting or raise max_depth")
            }
            WeaveError::CircularWorkflow { .. } => {
                Some("Remove the cycle - a workflow cannot call itself through its children")
            }
            WeaveError::StepLimitExceeded { .. } => {
                Some("Check action routing for unintended loops or raise WEAVE_MAX_STEPS")
            }
            WeaveError::Execution { .. } => Some("Inspect the failing step's parameters"),
        }
    }
}
