//! Execution result types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorCategory, FixSuggestion, WeaveError};

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Completed, but with recorded warnings
    Degraded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Degraded => write!(f, "degraded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An error entry in a run result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub node_id: Option<String>,
    pub message: String,
    pub category: ErrorCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl RunError {
    pub fn new(node_id: Option<&str>, message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            node_id: node_id.map(String::from),
            message: message.into(),
            category,
            phase: None,
            fix: None,
        }
    }

    pub fn from_error(err: &WeaveError) -> Self {
        Self {
            node_id: err.node_id().map(String::from),
            message: err.to_string(),
            category: err.category(),
            phase: Some(err.phase().to_string()),
            fix: err.fix_suggestion().map(String::from),
        }
    }
}

/// A non-fatal issue recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWarning {
    pub node_id: Option<String>,
    pub message: String,
    pub category: ErrorCategory,
    /// Declared output type, when the warning stems from nested-access ambiguity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_path: Option<String>,
}

impl RunWarning {
    pub fn new(node_id: Option<&str>, message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            node_id: node_id.map(String::from),
            message: message.into(),
            category,
            output_type: None,
            nested_path: None,
        }
    }

    pub fn from_error(err: &WeaveError) -> Self {
        let mut warning = Self::new(err.node_id(), err.to_string(), err.category());
        if let WeaveError::NestedAccess {
            output_type,
            nested_path,
            ..
        } = err
        {
            warning.output_type = Some(output_type.clone());
            warning.nested_path = Some(nested_path.clone());
        }
        warning
    }

    /// Union-ambiguity warning: traversal permitted only because `any` is a member
    pub fn ambiguous_access(
        node_id: &str,
        template: &str,
        output_type: &str,
        nested_path: &str,
    ) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: format!(
                "'{}' accesses '{}' on output type '{}'; only 'any' permits it, so the path is unchecked",
                template, nested_path, output_type
            ),
            category: ErrorCategory::Resolution,
            output_type: Some(output_type.to_string()),
            nested_path: Some(nested_path.to_string()),
        }
    }
}

/// Result of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub status: RunStatus,
    pub errors: Vec<RunError>,
    pub warnings: Vec<RunWarning>,
    /// Advisory findings from compilation (unreachable steps, rewired edges)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<RunWarning>,
    /// Declared workflow outputs, resolved after the walk
    pub outputs: Map<String, Value>,
    /// Final context data including reserved journal keys
    pub shared_after: Value,
}

impl ExecutionResult {
    /// A run that never started (compile or binding failure)
    pub fn rejected(err: &WeaveError) -> Self {
        Self {
            success: false,
            status: RunStatus::Failed,
            errors: vec![RunError::from_error(err)],
            warnings: Vec::new(),
            diagnostics: Vec::new(),
            outputs: Map::new(),
            shared_after: Value::Object(Map::new()),
        }
    }

    /// Ids of steps that completed, read from `shared_after`
    pub fn completed_nodes(&self) -> Vec<String> {
        self.shared_after
            .get(crate::context::COMPLETED_NODES_KEY)
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_access_warning_carries_type_and_path() {
        let err = WeaveError::NestedAccess {
            node_id: "b".into(),
            template: "${a.x.y}".into(),
            output_type: "any".into(),
            nested_path: "x.y".into(),
        };
        let warning = RunWarning::from_error(&err);
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value["output_type"], json!("any"));
        assert_eq!(value["nested_path"], json!("x.y"));
        assert_eq!(value["category"], json!("resolution"));
    }

    #[test]
    fn plain_warning_omits_optional_fields() {
        let warning = RunWarning::new(Some("a"), "slow", ErrorCategory::Execution);
        let value = serde_json::to_value(&warning).unwrap();
        assert!(value.get("output_type").is_none());
        assert_eq!(value["node_id"], json!("a"));
    }

    #[test]
    fn rejected_result_is_failed() {
        let result = ExecutionResult::rejected(&WeaveError::MissingInputs {
            names: vec!["topic".into()],
        });
        assert!(!result.success);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.errors[0].phase.as_deref(), Some("validation"));
        assert!(result.completed_nodes().is_empty());
    }
}
