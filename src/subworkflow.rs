//! Sub-workflow step: runs another workflow as one unit
//!
//! ```yaml
//! - id: summarize
//!   type: workflow
//!   params:
//!     workflow_ref: summarize.yaml   # or workflow_ir: {...}
//!     storage_mode: mapped           # mapped | isolated | scoped | shared
//!     param_mapping: {text: "${fetch.body}"}
//!     output_mapping: {summary: short_summary}
//! ```
//!
//! Depth and call-stack guards run in `prepare`, before the child document
//! is loaded or compiled; both abort the whole run. Any other failure of the
//! child (load, compile, run) comes back as this step's own failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::compiler::{compile, CompileOptions};
use crate::config::RuntimeLimits;
use crate::context::{CallFrame, ExecutionContext};
use crate::error::{ErrorCategory, WeaveError};
use crate::executor::{self, RunStatus, RunWarning};
use crate::ir::WorkflowIr;
use crate::nodes::{Node, NodeError, NodeOutput, Params};
use crate::registry::{BuildContext, InterfaceField, NodeInterface, Registry};
use crate::template::{simple_reference, TemplateResolver};

/// How much of the caller's context the child sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Only the resolved `param_mapping` entries
    #[default]
    Mapped,
    /// Nothing but reserved keys
    Isolated,
    /// Caller keys under `scope_prefix`, prefix stripped
    Scoped,
    /// The caller's data itself; the child's final data replaces it
    Shared,
}

/// What `prepare` hands to `execute`
#[derive(Debug, Serialize, Deserialize)]
struct Invocation {
    ir: WorkflowIr,
    identity: String,
    base_dir: Option<PathBuf>,
    frame: CallFrame,
    storage_mode: StorageMode,
    data: Map<String, Value>,
    bindings: Map<String, Value>,
    output_mapping: Map<String, Value>,
}

enum Source {
    File(PathBuf),
    Inline(Value),
}

pub struct WorkflowNode {
    node_id: String,
    registry: Arc<Registry>,
    limits: RuntimeLimits,
    base_dir: Option<PathBuf>,
}

impl WorkflowNode {
    pub fn new(ctx: &BuildContext<'_>) -> Self {
        Self {
            node_id: ctx.node_id.to_string(),
            registry: Arc::clone(ctx.registry),
            limits: ctx.limits.clone(),
            base_dir: ctx.base_dir.map(Path::to_path_buf),
        }
    }

    /// Where the child document comes from, and its call-stack identity
    fn locate(&self, params: &Params) -> Result<(Source, String, Option<PathBuf>), NodeError> {
        match (params.get("workflow_ref"), params.get("workflow_ir")) {
            (Some(Value::String(reference)), None) => {
                let path = match &self.base_dir {
                    Some(dir) if Path::new(reference).is_relative() => dir.join(reference),
                    _ => PathBuf::from(reference),
                };
                let path = std::fs::canonicalize(&path).unwrap_or(path);
                let identity = path.display().to_string();
                let base_dir = path.parent().map(Path::to_path_buf);
                Ok((Source::File(path), identity, base_dir))
            }
            (None, Some(inline @ Value::Object(_))) => {
                let identity = format!("inline:{}", self.node_id);
                Ok((Source::Inline(inline.clone()), identity, self.base_dir.clone()))
            }
            (Some(_), Some(_)) => Err(NodeError::InvalidParams(
                "set either workflow_ref or workflow_ir, not both".to_string(),
            )),
            (None, None) => Err(NodeError::InvalidParams(
                "workflow_ref or workflow_ir is required".to_string(),
            )),
            _ => Err(NodeError::InvalidParams(
                "workflow_ref must be a path string and workflow_ir an object".to_string(),
            )),
        }
    }
}

fn object_param(params: &Params, key: &str) -> Result<Map<String, Value>, NodeError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(NodeError::InvalidParams(format!(
            "'{}' must be a dict, got {}",
            key,
            crate::types::type_name_of(other)
        ))),
    }
}

/// Child data for the given storage mode
fn child_data(
    mode: StorageMode,
    caller: &Map<String, Value>,
    mapping: &Map<String, Value>,
    prefix: &str,
) -> Map<String, Value> {
    match mode {
        StorageMode::Mapped => mapping.clone(),
        StorageMode::Isolated => Map::new(),
        StorageMode::Scoped => caller
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect(),
        StorageMode::Shared => caller.clone(),
    }
}

impl Node for WorkflowNode {
    fn prepare(&self, params: &Params, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let storage_mode = match params.get("storage_mode") {
            None => StorageMode::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                NodeError::InvalidParams(format!(
                    "unknown storage_mode {}, expected mapped, isolated, scoped or shared",
                    value
                ))
            })?,
        };
        // A step may tighten the configured limit, never lift it
        let max_depth = params
            .get("max_depth")
            .and_then(Value::as_u64)
            .map_or(self.limits.max_depth, |depth| {
                (depth as usize).min(self.limits.max_depth)
            });

        let (source, identity, base_dir) = self.locate(params)?;

        let frame = ctx.frame();
        if frame.depth() >= max_depth {
            return Err(NodeError::Fatal(WeaveError::MaxDepthExceeded {
                workflow: identity,
                depth: frame.depth() + 1,
                max: max_depth,
            }));
        }
        if frame.contains(&identity) {
            return Err(NodeError::Fatal(WeaveError::CircularWorkflow {
                workflow: identity,
                stack: frame.stack().to_vec(),
            }));
        }

        let ir = match source {
            Source::File(path) => WorkflowIr::from_path(&path),
            Source::Inline(value) => WorkflowIr::from_value(value),
        }
        .map_err(|err| {
            NodeError::failed_with(
                format!("Sub-workflow '{}' could not be loaded: {}", identity, err),
                json!({ "phase": err.phase(), "category": err.category() }),
            )
        })?;

        let mapping = object_param(params, "param_mapping")?;
        let default_prefix = format!("{}.", self.node_id);
        let prefix = params
            .get("scope_prefix")
            .and_then(Value::as_str)
            .unwrap_or(default_prefix.as_str());
        let data = child_data(storage_mode, ctx.data(), &mapping, prefix);
        let bindings = match storage_mode {
            StorageMode::Isolated => Map::new(),
            _ => mapping,
        };

        debug!(
            node = %self.node_id,
            workflow = %identity,
            mode = ?storage_mode,
            keys = data.len(),
            "prepared sub-workflow"
        );

        let invocation = Invocation {
            ir,
            frame: frame.enter(identity.clone()),
            identity,
            base_dir,
            storage_mode,
            data,
            bindings,
            output_mapping: object_param(params, "output_mapping")?,
        };
        serde_json::to_value(invocation)
            .map_err(|err| NodeError::failed(format!("could not hand over sub-workflow: {}", err)))
    }

    fn execute(&self, prepared: &Value) -> Result<Value, NodeError> {
        let invocation: Invocation = serde_json::from_value(prepared.clone())
            .map_err(|err| NodeError::failed(format!("invalid sub-workflow invocation: {}", err)))?;
        let identity = invocation.identity.clone();

        let options = CompileOptions {
            mode: None,
            limits: self.limits.clone(),
            base_dir: invocation.base_dir.clone(),
            identity: Some(identity.clone()),
            external_params: invocation
                .data
                .keys()
                .chain(invocation.bindings.keys())
                .cloned()
                .collect(),
        };
        let compiled = compile(&invocation.ir, &self.registry, &options).map_err(|err| {
            NodeError::failed_with(
                format!("Sub-workflow '{}' failed to compile: {}", identity, err),
                json!({ "phase": err.phase(), "category": err.category() }),
            )
        })?;

        info!(node = %self.node_id, workflow = %identity, depth = invocation.frame.depth(), "entering sub-workflow");
        let ctx = ExecutionContext::with_frame(invocation.data, invocation.frame);
        let mut report = executor::execute(&compiled, ctx, invocation.bindings);

        // Recursion guards tripped further down abort every level
        if report
            .fatal
            .as_ref()
            .is_some_and(|err| err.category() == ErrorCategory::Recursion)
        {
            if let Some(err) = report.fatal.take() {
                return Err(NodeError::Fatal(err));
            }
        }

        let data = report.context.data().clone();
        let failed = report.status == RunStatus::Failed;
        let result = report.into_result();
        if failed {
            let reason = result
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(NodeError::failed_with(
                format!("Sub-workflow '{}' failed: {}", identity, reason),
                json!({ "errors": result.errors }),
            ));
        }

        Ok(json!({
            "data": data,
            "outputs": result.outputs,
            "warnings": result.warnings,
        }))
    }

    fn finalize(
        &self,
        ctx: &mut ExecutionContext,
        prepared: &Value,
        executed: Value,
    ) -> Result<NodeOutput, NodeError> {
        let child_data = executed
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let outputs = executed
            .get("outputs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if prepared.get("storage_mode") == Some(&json!("shared")) {
            ctx.replace_data(child_data.clone());
        }

        if let Some(warnings) = executed.get("warnings").and_then(Value::as_array) {
            for warning in warnings {
                if let Ok(warning) = serde_json::from_value::<RunWarning>(warning.clone()) {
                    ctx.journal_mut().warn(warning);
                }
            }
        }

        let output_mapping = prepared
            .get("output_mapping")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if output_mapping.is_empty() {
            return Ok(NodeOutput {
                values: outputs,
                action: None,
            });
        }

        // Declared outputs win over raw child data
        let resolver = TemplateResolver::new(&child_data, &outputs);
        let mut values = Params::new();
        for (child_key, parent_key) in &output_mapping {
            let Some(parent_key) = parent_key.as_str() else {
                continue;
            };
            // Keys outside the reference grammar never resolve
            let found = simple_reference(&format!("${{{}}}", child_key))
                .and_then(|reference| resolver.lookup(&reference));
            match found {
                Some(value) => {
                    values.insert(parent_key.to_string(), value.into_owned());
                }
                None => ctx.journal_mut().warn(RunWarning::new(
                    Some(&self.node_id),
                    format!(
                        "Output mapping '{}' -> '{}' found nothing in the sub-workflow results",
                        child_key, parent_key
                    ),
                    ErrorCategory::Execution,
                )),
            }
        }
        Ok(NodeOutput {
            values,
            action: None,
        })
    }
}

/// Register the `workflow` step type
pub fn register(registry: &mut Registry) {
    registry.register(
        "workflow",
        NodeInterface::new("Runs another workflow as a single step")
            .with_param(
                InterfaceField::new("workflow_ref", "str")
                    .with_description("Path to a .json or .yaml workflow, relative to the caller"),
            )
            .with_param(
                InterfaceField::new("workflow_ir", "dict")
                    .with_description("Inline workflow document")
                    .opaque(),
            )
            .with_param(
                InterfaceField::new("param_mapping", "dict")
                    .with_description("Child parameter name -> value or template"),
            )
            .with_param(
                InterfaceField::new("output_mapping", "dict")
                    .with_description("Child key or path -> caller key"),
            )
            .with_param(
                InterfaceField::new("storage_mode", "str")
                    .with_description("mapped | isolated | scoped | shared"),
            )
            .with_param(InterfaceField::new("scope_prefix", "str"))
            .with_param(InterfaceField::new("max_depth", "int"))
            .with_action("default")
            .with_action("error"),
        |ctx| Box::new(WorkflowNode::new(ctx)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn storage_modes_shape_child_data() {
        let caller = map(json!({"a": 1, "other": 2, "sub.x": 3, "sub.": 4}));
        let mapping = map(json!({"x": 1}));

        assert_eq!(
            child_data(StorageMode::Mapped, &caller, &mapping, "sub."),
            map(json!({"x": 1}))
        );
        assert!(child_data(StorageMode::Isolated, &caller, &mapping, "sub.").is_empty());
        assert_eq!(
            child_data(StorageMode::Scoped, &caller, &mapping, "sub."),
            map(json!({"x": 3}))
        );
        assert_eq!(child_data(StorageMode::Shared, &caller, &mapping, "sub."), caller);
    }

    #[test]
    fn storage_mode_names() {
        let mode: StorageMode = serde_json::from_value(json!("scoped")).unwrap();
        assert_eq!(mode, StorageMode::Scoped);
        assert!(serde_json::from_value::<StorageMode>(json!("global")).is_err());
    }

    fn node(registry: &Arc<Registry>, limits: &RuntimeLimits) -> WorkflowNode {
        WorkflowNode::new(&BuildContext {
            node_id: "sub",
            registry,
            limits,
            base_dir: None,
        })
    }

    #[test]
    fn depth_guard_runs_before_loading() {
        let registry = Arc::new(Registry::with_builtins());
        let limits = RuntimeLimits::testing();
        let node = node(&registry, &limits);

        let mut frame = CallFrame::for_workflow("root");
        for level in 0..limits.max_depth {
            frame = frame.enter(format!("level{}", level));
        }
        let ctx = ExecutionContext::with_frame(Map::new(), frame);
        // The referenced file does not exist; the guard must fire first
        let params = map(json!({"workflow_ref": "/nonexistent/child.json"}));

        match node.prepare(&params, &ctx) {
            Err(NodeError::Fatal(WeaveError::MaxDepthExceeded { depth, max, .. })) => {
                assert_eq!(depth, 4);
                assert_eq!(max, 3);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn step_max_depth_only_tightens_the_limit() {
        let registry = Arc::new(Registry::with_builtins());
        let limits = RuntimeLimits::testing();
        let node = node(&registry, &limits);

        let mut frame = CallFrame::for_workflow("root");
        for level in 0..limits.max_depth {
            frame = frame.enter(format!("level{}", level));
        }
        let deep = ExecutionContext::with_frame(Map::new(), frame);
        let raised = map(json!({"workflow_ref": "/nonexistent/child.json", "max_depth": 100}));
        match node.prepare(&raised, &deep) {
            Err(NodeError::Fatal(WeaveError::MaxDepthExceeded { max, .. })) => assert_eq!(max, 3),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        let shallow = ExecutionContext::with_frame(
            Map::new(),
            CallFrame::for_workflow("root").enter("level0"),
        );
        let lowered = map(json!({"workflow_ref": "/nonexistent/child.json", "max_depth": 1}));
        match node.prepare(&lowered, &shallow) {
            Err(NodeError::Fatal(WeaveError::MaxDepthExceeded { depth, max, .. })) => {
                assert_eq!(depth, 2);
                assert_eq!(max, 1);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn inline_identity_on_stack_is_circular() {
        let registry = Arc::new(Registry::with_builtins());
        let limits = RuntimeLimits::default();
        let node = node(&registry, &limits);

        let ctx = ExecutionContext::with_frame(
            Map::new(),
            CallFrame::for_workflow("root").enter("inline:sub"),
        );
        let params = map(json!({"workflow_ir": {"nodes": [{"id": "a", "type": "echo"}]}}));

        match node.prepare(&params, &ctx) {
            Err(NodeError::Fatal(WeaveError::CircularWorkflow { workflow, stack })) => {
                assert_eq!(workflow, "inline:sub");
                assert_eq!(stack, vec!["root".to_string(), "inline:sub".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn source_params_are_validated() {
        let registry = Arc::new(Registry::with_builtins());
        let limits = RuntimeLimits::default();
        let node = node(&registry, &limits);
        let ctx = ExecutionContext::new();

        let err = node.prepare(&Params::new(), &ctx).unwrap_err();
        assert!(matches!(err, NodeError::InvalidParams(_)));

        let both = map(json!({"workflow_ref": "a.json", "workflow_ir": {}}));
        assert!(matches!(
            node.prepare(&both, &ctx).unwrap_err(),
            NodeError::InvalidParams(_)
        ));
    }

    #[test]
    fn load_failures_are_contained() {
        let registry = Arc::new(Registry::with_builtins());
        let limits = RuntimeLimits::default();
        let node = node(&registry, &limits);
        let ctx = ExecutionContext::with_frame(Map::new(), CallFrame::for_workflow("root"));
        let params = map(json!({"workflow_ir": {"edges": []}}));

        let err = node.prepare(&params, &ctx).unwrap_err();
        assert_eq!(err.kind(), crate::nodes::NodeErrorKind::Execution);
        assert!(err.to_string().contains("could not be loaded"));
    }
}
