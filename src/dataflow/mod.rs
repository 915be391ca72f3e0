//! Static data-flow validation of a workflow IR
//!
//! Checks run in order:
//! 1. At most one input reads piped stdin
//! 2. Edge cycles (DFS with a visiting marker)
//! 3. Topological order, ties broken by declaration order
//! 4. Reference scoping: every `${base...}` names a declared input, an
//!    external parameter, a step that runs strictly earlier, or (inside a
//!    batch step only) that step's item alias
//! 5. Steps unreachable from the start node (warning)
//!
//! An empty diagnostic list (ignoring warnings) means the IR is safe to compile.

mod graph;
mod refs;

use thiserror::Error;

use crate::error::{Result, WeaveError};
use crate::ir::WorkflowIr;

pub use graph::DependencyGraph;
pub use refs::find_similar;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single data-flow diagnostic
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataFlowError {
    #[error("Cycle detected: {}", .path.join(" → "))]
    CycleDetected { path: Vec<String> },

    #[error("Node '{node_id}' references '{template}' but '{target}' does not run before it")]
    ForwardReference {
        node_id: String,
        template: String,
        target: String,
    },

    #[error("Node '{node_id}' references undefined '{name}' in '{template}'")]
    UndefinedReference {
        node_id: String,
        template: String,
        name: String,
        suggestions: Vec<String>,
    },

    #[error("Only one input may read stdin, found: {}", .inputs.join(", "))]
    MultipleStdinInputs { inputs: Vec<String> },

    #[error("Node '{node_id}' is not reachable from start node '{start}' and will never run")]
    UnreachableNode { node_id: String, start: String },
}

impl DataFlowError {
    pub fn severity(&self) -> Severity {
        match self {
            DataFlowError::UnreachableNode { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }

    /// Node the diagnostic is about, when there is one
    pub fn node_id(&self) -> Option<&str> {
        match self {
            DataFlowError::ForwardReference { node_id, .. }
            | DataFlowError::UndefinedReference { node_id, .. }
            | DataFlowError::UnreachableNode { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            DataFlowError::CycleDetected { .. } => Some(
                "Remove an edge from the cycle; express iteration with batch instead".to_string(),
            ),
            DataFlowError::ForwardReference {
                node_id, target, ..
            } => Some(format!(
                "Add an edge from '{}' to '{}' so it runs first, or reference an earlier step",
                target, node_id
            )),
            DataFlowError::UndefinedReference { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("Did you mean: {}?", suggestions.join(", ")))
            }
            DataFlowError::UndefinedReference { name, .. } => Some(format!(
                "Declare '{}' under inputs or pass it as a parameter",
                name
            )),
            DataFlowError::MultipleStdinInputs { .. } => {
                Some("Mark exactly one input with stdin: true".to_string())
            }
            DataFlowError::UnreachableNode { node_id, .. } => {
                Some(format!("Add an edge leading to '{}'", node_id))
            }
        }
    }
}

/// Run every data-flow check. `external` names parameters supplied from
/// outside the document (caller bindings) that references may use.
pub fn validate(ir: &WorkflowIr, external: &[String]) -> Vec<DataFlowError> {
    let mut diagnostics = Vec::new();

    let stdin_inputs: Vec<String> = ir
        .inputs
        .iter()
        .filter(|(_, spec)| spec.stdin)
        .map(|(name, _)| name.clone())
        .collect();
    if stdin_inputs.len() > 1 {
        diagnostics.push(DataFlowError::MultipleStdinInputs {
            inputs: stdin_inputs,
        });
    }

    let graph = DependencyGraph::from_ir(ir);
    let order = match graph.topological_order() {
        Ok(order) => Some(order),
        Err(cycles) => {
            diagnostics.extend(
                cycles
                    .into_iter()
                    .map(|path| DataFlowError::CycleDetected { path }),
            );
            None
        }
    };

    diagnostics.extend(refs::check_references(ir, order.as_deref(), external));

    if let Some(start) = ir
        .start_node
        .as_deref()
        .or_else(|| ir.nodes.first().map(|n| n.id.as_str()))
    {
        diagnostics.extend(graph.unreachable_from(start).into_iter().map(|node_id| {
            DataFlowError::UnreachableNode {
                node_id: node_id.to_string(),
                start: start.to_string(),
            }
        }));
    }

    diagnostics
}

/// Deterministic execution order, or the cycles that prevent one
pub fn execution_order(ir: &WorkflowIr) -> Result<Vec<String>> {
    DependencyGraph::from_ir(ir)
        .topological_order()
        .map(|order| order.into_iter().map(String::from).collect())
        .map_err(|cycles| WeaveError::DataFlow {
            diagnostics: cycles
                .into_iter()
                .map(|path| DataFlowError::CycleDetected { path })
                .collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ir(value: serde_json::Value) -> WorkflowIr {
        serde_json::from_value(value).unwrap()
    }

    fn errors(ir: &WorkflowIr) -> Vec<DataFlowError> {
        validate(ir, &[]).into_iter().filter(DataFlowError::is_error).collect()
    }

    #[test]
    fn clean_linear_workflow_passes() {
        let ir = ir(json!({
            "inputs": {"topic": {"type": "str"}},
            "nodes": [
                {"id": "a", "type": "echo", "params": {"text": "${topic}"}},
                {"id": "b", "type": "echo", "params": {"text": "${a.text}", "n": {"deep": ["${a.text}"]}}}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));
        assert!(validate(&ir, &[]).is_empty());
    }

    #[test]
    fn forward_and_undefined_are_distinct() {
        let ir = ir(json!({
            "nodes": [
                {"id": "a", "type": "echo", "params": {"x": "${b.out}", "y": "${nope}"}},
                {"id": "b", "type": "echo"}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));
        let errs = errors(&ir);
        assert_eq!(errs.len(), 2);
        assert!(matches!(&errs[0], DataFlowError::ForwardReference { target, .. } if target == "b"));
        assert!(matches!(&errs[1], DataFlowError::UndefinedReference { name, .. } if name == "nope"));
    }

    #[test]
    fn self_reference_is_forward() {
        let ir = ir(json!({"nodes": [{"id": "a", "type": "echo", "params": {"x": "${a.text}"}}]}));
        assert!(matches!(&errors(&ir)[0], DataFlowError::ForwardReference { .. }));
    }

    #[test]
    fn undefined_input_suggests_case_insensitively() {
        let ir = ir(json!({
            "inputs": {"UserName": {}},
            "nodes": [{"id": "a", "type": "echo", "params": {"x": "${username}"}}]
        }));
        let errs = errors(&ir);
        match &errs[0] {
            DataFlowError::UndefinedReference { suggestions, .. } => {
                assert_eq!(suggestions, &vec!["UserName".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(errs[0].suggestion().as_deref(), Some("Did you mean: UserName?"));
    }

    #[test]
    fn alias_scoped_to_its_batch_step() {
        let ir = ir(json!({
            "inputs": {"files": {"type": "list"}},
            "nodes": [
                {"id": "each", "type": "echo",
                 "params": {"path": "${file.name}", "n": "${file[0]}"},
                 "batch": {"items": "${files}", "as": "file"}},
                {"id": "after", "type": "echo", "params": {"x": "${file}"}}
            ],
            "edges": [{"from": "each", "to": "after"}]
        }));
        let errs = errors(&ir);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].node_id(), Some("after"));
    }

    #[test]
    fn alias_not_in_scope_for_items() {
        let ir = ir(json!({
            "nodes": [{"id": "each", "type": "echo", "batch": {"items": "${item}"}}]
        }));
        assert!(matches!(&errors(&ir)[0], DataFlowError::UndefinedReference { name, .. } if name == "item"));
    }

    #[test]
    fn shell_syntax_is_skipped() {
        let ir = ir(json!({
            "nodes": [{"id": "a", "type": "shell", "params": {"cmd": "for f in ${arr[@]}; do echo ${#f}; done"}}]
        }));
        assert!(validate(&ir, &[]).is_empty());
    }

    #[test]
    fn external_params_are_in_scope() {
        let ir = ir(json!({"nodes": [{"id": "a", "type": "echo", "params": {"x": "${ext}"}}]}));
        assert!(validate(&ir, &["ext".to_string()]).is_empty());
    }

    #[test]
    fn multiple_stdin_inputs_named() {
        let ir = ir(json!({
            "inputs": {"a": {"stdin": true}, "b": {"stdin": true}, "c": {}},
            "nodes": []
        }));
        let errs = errors(&ir);
        assert_eq!(
            errs,
            vec![DataFlowError::MultipleStdinInputs {
                inputs: vec!["a".into(), "b".into()]
            }]
        );
    }

    #[test]
    fn cycles_reported_and_refs_still_checked() {
        let ir = ir(json!({
            "nodes": [
                {"id": "a", "type": "echo", "params": {"x": "${missing}"}},
                {"id": "b", "type": "echo"}
            ],
            "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]
        }));
        let errs = errors(&ir);
        assert!(errs.iter().any(|e| matches!(e, DataFlowError::CycleDetected { .. })));
        assert!(errs.iter().any(|e| matches!(e, DataFlowError::UndefinedReference { .. })));
    }

    #[test]
    fn output_sources_are_checked() {
        let ir = ir(json!({
            "nodes": [{"id": "a", "type": "echo"}],
            "outputs": {"result": {"source": "${b.text}"}}
        }));
        let errs = errors(&ir);
        assert_eq!(errs[0].node_id(), Some("outputs.result"));
    }

    #[test]
    fn unreachable_is_a_warning() {
        let ir = ir(json!({"nodes": [{"id": "a", "type": "echo"}, {"id": "b", "type": "echo"}]}));
        let diagnostics = validate(&ir, &[]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity(), Severity::Warning);
    }

    #[test]
    fn execution_order_is_deterministic() {
        let ir = ir(json!({
            "nodes": [{"id": "x", "type": "echo"}, {"id": "y", "type": "echo"}, {"id": "z", "type": "echo"}],
            "edges": [{"from": "z", "to": "x"}]
        }));
        let first = execution_order(&ir).unwrap();
        assert_eq!(first, vec!["y", "z", "x"]);
        assert_eq!(execution_order(&ir).unwrap(), first);
    }
}
