//! Graph walk driver
//!
//! Binds workflow inputs, then walks the compiled graph one unit at a time
//! from the start node, following the action each unit returns:
//!
//! - `Completed` follows the edge for its action; no edge ends the walk
//! - `Failed` follows an `error` edge when there is one, otherwise the run fails
//! - `Aborted` stops the run immediately
//!
//! Declared outputs are resolved once the walk ends without failure.

mod result;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::compiler::{compile, CompileOptions, CompiledWorkflow};
use crate::context::{CallFrame, ExecutionContext};
use crate::error::{ErrorCategory, Result, WeaveError};
use crate::ir::{InputSpec, WorkflowIr};
use crate::nodes::{Params, ERROR_ACTION};
use crate::registry::Registry;
use crate::template::TemplateResolver;
use crate::wrappers::{StepCall, StepOutcome};

pub use result::{ExecutionResult, RunError, RunStatus, RunWarning};

/// Everything a finished walk leaves behind
#[derive(Debug)]
pub struct RunReport {
    pub context: ExecutionContext,
    pub status: RunStatus,
    /// Contained step failures that stopped the walk
    pub errors: Vec<RunError>,
    /// The error that aborted the run, if any
    pub fatal: Option<WeaveError>,
    pub outputs: Map<String, Value>,
    /// Advisory compile findings; reported, never counted against the status
    pub diagnostics: Vec<RunWarning>,
}

impl RunReport {
    pub fn into_result(self) -> ExecutionResult {
        let mut errors = Vec::with_capacity(self.errors.len() + 1);
        if let Some(fatal) = &self.fatal {
            errors.push(RunError::from_error(fatal));
        }
        errors.extend(self.errors);

        ExecutionResult {
            success: self.status != RunStatus::Failed,
            status: self.status,
            errors,
            warnings: self.context.journal().warnings().to_vec(),
            diagnostics: self.diagnostics,
            outputs: self.outputs,
            shared_after: self.context.shared_after(),
        }
    }
}

/// Check required inputs and apply defaults. Undeclared params pass through.
pub fn bind_inputs(inputs: &BTreeMap<String, InputSpec>, params: Params) -> Result<Params> {
    let mut bound = params;
    let mut missing = Vec::new();

    for (name, spec) in inputs {
        if bound.contains_key(name) {
            continue;
        }
        match &spec.default {
            Some(default) => {
                bound.insert(name.clone(), default.clone());
            }
            None if spec.required => missing.push(name.clone()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(WeaveError::MissingInputs { names: missing });
    }

    for name in bound.keys().filter(|name| !inputs.contains_key(*name)) {
        debug!(param = %name, "passing through undeclared parameter");
    }
    Ok(bound)
}

/// Walk a compiled workflow on the given context
pub fn execute(compiled: &CompiledWorkflow, mut ctx: ExecutionContext, params: Params) -> RunReport {
    let bindings = match bind_inputs(compiled.inputs(), params) {
        Ok(bindings) => bindings,
        Err(err) => {
            return RunReport {
                context: ctx,
                status: RunStatus::Failed,
                errors: Vec::new(),
                fatal: Some(err),
                outputs: Map::new(),
                diagnostics: compiled.diagnostics().to_vec(),
            }
        }
    };
    ctx.protect(compiled.node_ids());
    ctx.protect(compiled.inputs().keys().map(String::as_str));
    for (name, value) in &bindings {
        ctx.insert(name.clone(), value.clone());
    }
    ctx.journal_mut()
        .warnings_mut()
        .extend(compiled.warnings().iter().cloned());

    info!(
        workflow = compiled.identity(),
        depth = ctx.frame().depth(),
        mode = %compiled.policy().mode(),
        "run started"
    );

    let policy = compiled.policy();
    let max_steps = compiled.limits().max_steps;
    let mut errors = Vec::new();
    let mut fatal = None;
    let mut steps = 0usize;
    let mut current = Some(compiled.start().to_string());

    while let Some(node_id) = current.take() {
        if steps >= max_steps {
            fatal = Some(WeaveError::StepLimitExceeded { max: max_steps });
            break;
        }
        steps += 1;

        let Some(unit) = compiled.unit(&node_id) else {
            fatal = Some(WeaveError::Execution {
                message: "step is not part of the compiled graph".to_string(),
                node_id,
            });
            break;
        };

        let outcome = {
            let mut call = StepCall::new(&mut ctx, bindings.clone(), policy);
            unit.run(&mut call)
        };
        match outcome {
            StepOutcome::Completed(output) => {
                current = compiled
                    .successor(&node_id, &output.action)
                    .map(String::from);
                if current.is_none() && compiled.has_successors(&node_id) {
                    debug!(node = %node_id, action = %output.action, "no edge for action, ending walk");
                }
            }
            StepOutcome::Failed(failure) => match compiled.successor(&node_id, ERROR_ACTION) {
                Some(handler) => {
                    warn!(node = %node_id, handler, "step failed, routing to error handler");
                    ctx.journal_mut().warn(RunWarning::new(
                        Some(failure.node_id.as_str()),
                        failure.message,
                        failure.category,
                    ));
                    current = Some(handler.to_string());
                }
                None => {
                    let mut error =
                        RunError::new(Some(failure.node_id.as_str()), failure.message, failure.category);
                    error.phase = Some("execution".to_string());
                    errors.push(error);
                    break;
                }
            },
            StepOutcome::Aborted(err) => {
                fatal = Some(err);
                break;
            }
        }
    }

    let failed = fatal.is_some() || !errors.is_empty();
    let outputs = if failed {
        Map::new()
    } else {
        resolve_outputs(compiled, &mut ctx, &bindings)
    };

    let status = if failed {
        RunStatus::Failed
    } else if !ctx.journal().warnings().is_empty() {
        RunStatus::Degraded
    } else {
        RunStatus::Success
    };
    info!(workflow = compiled.identity(), %status, steps, "run finished");

    RunReport {
        context: ctx,
        status,
        errors,
        fatal,
        outputs,
        diagnostics: compiled.diagnostics().to_vec(),
    }
}

fn resolve_outputs(
    compiled: &CompiledWorkflow,
    ctx: &mut ExecutionContext,
    bindings: &Params,
) -> Map<String, Value> {
    let mut outputs = Map::new();
    let mut unresolved = Vec::new();
    {
        let resolver = TemplateResolver::new(ctx.data(), bindings)
            .with_max_depth(compiled.limits().max_template_depth);
        for (name, spec) in compiled.outputs() {
            let template = spec
                .source
                .clone()
                .unwrap_or_else(|| format!("${{{}}}", name));
            let resolved = resolver.resolve_str(&template);
            match resolved.unresolved.first() {
                None => {
                    outputs.insert(name.clone(), resolved.value);
                }
                Some(missing) => unresolved.push(RunWarning::new(
                    None,
                    format!(
                        "Output '{}' could not be resolved from '{}': {}",
                        name, template, missing.hint
                    ),
                    ErrorCategory::Resolution,
                )),
            }
        }
    }
    for warning in unresolved {
        warn!("{}", warning.message);
        ctx.journal_mut().warn(warning);
    }
    outputs
}

/// Compile and run a workflow in a fresh top-level context
pub fn run_workflow(
    ir: &WorkflowIr,
    registry: &Arc<Registry>,
    params: Params,
    options: &CompileOptions,
) -> ExecutionResult {
    let mut options = options.clone();
    options.external_params.extend(params.keys().cloned());

    let compiled = match compile(ir, registry, &options) {
        Ok(compiled) => compiled,
        Err(err) => {
            warn!(error = %err, "compilation failed");
            return ExecutionResult::rejected(&err);
        }
    };

    let ctx = ExecutionContext::with_frame(Map::new(), CallFrame::for_workflow(compiled.identity()));
    execute(&compiled, ctx, params).into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ir(value: Value) -> WorkflowIr {
        serde_json::from_value(value).unwrap()
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn run(ir: &WorkflowIr, params: Params) -> ExecutionResult {
        let registry = Arc::new(Registry::with_builtins());
        run_workflow(ir, &registry, params, &CompileOptions::default())
    }

    #[test]
    fn binds_defaults_and_reports_missing_inputs() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "topic".to_string(),
            serde_json::from_value::<InputSpec>(json!({"type": "str"})).unwrap(),
        );
        inputs.insert(
            "lang".to_string(),
            serde_json::from_value::<InputSpec>(json!({"type": "str", "default": "en"})).unwrap(),
        );

        let bound = bind_inputs(&inputs, params(json!({"topic": "rust", "extra": 1}))).unwrap();
        assert_eq!(bound["lang"], json!("en"));
        assert_eq!(bound["extra"], json!(1));

        let err = bind_inputs(&inputs, Params::new()).unwrap_err();
        assert!(matches!(err, WeaveError::MissingInputs { ref names } if names == &vec!["topic".to_string()]));
    }

    #[test]
    fn linear_run_succeeds() {
        let ir = ir(json!({
            "inputs": {"topic": {"type": "str"}},
            "nodes": [
                {"id": "a", "type": "echo", "params": {"text": "about ${topic}"}},
                {"id": "b", "type": "echo", "params": {"copy": "${a.text}"}}
            ],
            "edges": [{"from": "a", "to": "b"}],
            "outputs": {"final": {"source": "${b.copy}"}}
        }));
        let result = run(&ir, params(json!({"topic": "rust"})));

        assert!(result.success);
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.completed_nodes(), vec!["a", "b"]);
        assert_eq!(result.outputs["final"], json!("about rust"));
        assert_eq!(result.shared_after["copy"], json!("about rust"));
    }

    #[test]
    fn failure_without_error_edge_fails_the_run() {
        let ir = ir(json!({
            "nodes": [
                {"id": "f", "type": "fail", "params": {"message": "boom"}},
                {"id": "after", "type": "echo"}
            ],
            "edges": [{"from": "f", "to": "after"}]
        }));
        let result = run(&ir, Params::new());

        assert!(!result.success);
        assert_eq!(result.errors[0].node_id.as_deref(), Some("f"));
        assert_eq!(result.errors[0].category, ErrorCategory::Execution);
        assert!(result.completed_nodes().is_empty());
    }

    #[test]
    fn failure_routes_to_error_edge() {
        let ir = ir(json!({
            "nodes": [
                {"id": "f", "type": "fail", "params": {"message": "boom"}},
                {"id": "ok", "type": "echo"},
                {"id": "handler", "type": "echo", "params": {"seen": "${f.error}"}}
            ],
            "edges": [
                {"from": "f", "to": "ok"},
                {"from": "f", "to": "handler", "action": "error"}
            ]
        }));
        let result = run(&ir, Params::new());

        assert!(result.success);
        assert_eq!(result.status, RunStatus::Degraded);
        assert_eq!(result.completed_nodes(), vec!["handler"]);
        assert_eq!(result.shared_after["seen"], json!("boom"));
    }

    #[test]
    fn action_labels_pick_the_branch() {
        let ir = ir(json!({
            "nodes": [
                {"id": "route", "type": "echo", "params": {"action": "left"}},
                {"id": "l", "type": "echo"},
                {"id": "r", "type": "echo"}
            ],
            "edges": [
                {"from": "route", "to": "l", "action": "left"},
                {"from": "route", "to": "r", "action": "right"}
            ]
        }));
        let result = run(&ir, Params::new());
        assert_eq!(result.completed_nodes(), vec!["route", "l"]);
    }

    #[test]
    fn missing_input_rejects_before_any_step() {
        let ir = ir(json!({
            "inputs": {"topic": {"type": "str"}},
            "nodes": [{"id": "a", "type": "echo", "params": {"t": "${topic}"}}]
        }));
        let result = run(&ir, Params::new());
        assert!(!result.success);
        assert_eq!(result.errors[0].phase.as_deref(), Some("validation"));
        assert!(result.completed_nodes().is_empty());
    }

    #[test]
    fn unresolvable_output_is_a_warning() {
        let ir = ir(json!({
            "nodes": [{"id": "a", "type": "echo"}],
            "outputs": {"nothing": {"type": "str"}}
        }));
        let result = run(&ir, Params::new());
        assert_eq!(result.status, RunStatus::Degraded);
        assert!(result.warnings[0].message.contains("Output 'nothing'"));
    }

    #[test]
    fn graph_findings_do_not_degrade_a_clean_run() {
        let ir = ir(json!({
            "nodes": [{"id": "a", "type": "echo"}, {"id": "island", "type": "echo"}]
        }));
        let result = run(&ir, Params::new());

        assert_eq!(result.status, RunStatus::Success);
        assert!(result.warnings.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].node_id.as_deref(), Some("island"));
    }

    #[test]
    fn edge_cycles_never_reach_the_walk() {
        let ir = ir(json!({
            "nodes": [
                {"id": "a", "type": "echo", "params": {"action": "again"}},
                {"id": "b", "type": "echo", "params": {"action": "again"}}
            ],
            "edges": [
                {"from": "a", "to": "b"},
                {"from": "a", "to": "b", "action": "again"},
                {"from": "b", "to": "a", "action": "again"}
            ]
        }));
        let result = run(&ir, Params::new());
        assert!(!result.success);
        assert_eq!(result.errors[0].category, ErrorCategory::Graph);
    }
}
