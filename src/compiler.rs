//! Workflow compiler: validated IR → wired graph of wrapped units
//!
//! Phases, each tagged on the error it raises:
//!
//! | Phase | Work |
//! |-------|------|
//! | `parsing` | identity rules (duplicate ids, alias shadowing) |
//! | `validation` | data-flow checks, static checks against declared interfaces |
//! | `node_resolution` | registry lookup, one unit per step |
//! | `flow_wiring` | edges → per-action successors |
//! | `start_detection` | explicit `start_node`, else the first step |
//!
//! Template-free params are applied to the leaf unit here; templated ones are
//! handed to the wrapper pipeline and resolved at run time.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RuntimeLimits;
use crate::dataflow::{self, DataFlowError};
use crate::error::{CompilePhase, CompilationError, ErrorCategory, Result, WeaveError};
use crate::executor::RunWarning;
use crate::ir::{InputSpec, NodeIr, OutputSpec, WorkflowIr};
use crate::nodes::Params;
use crate::policy::{ResolutionPolicy, TemplateMode};
use crate::registry::{BuildContext, NodeInterface, Registry};
use crate::template::{extract_refs, value_has_template, Segment, TemplateRef};
use crate::types::{NestedAccess, SemanticType};
use crate::wrappers::{PipelineBuilder, Unit};

/// Knobs for one compile
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Overrides the document's `template_resolution_mode`
    pub mode: Option<TemplateMode>,
    pub limits: RuntimeLimits,
    /// Directory relative sub-workflow references resolve against
    pub base_dir: Option<PathBuf>,
    /// Identity pushed on the call stack; defaults to the document name
    pub identity: Option<String>,
    /// Names supplied from outside the document that references may use
    pub external_params: Vec<String>,
}

impl CompileOptions {
    /// Options for a document loaded from `path`: the canonical path is its
    /// call-stack identity and its directory anchors relative references
    pub fn for_file(path: &Path) -> Self {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            base_dir: canonical.parent().map(Path::to_path_buf),
            identity: Some(canonical.display().to_string()),
            ..Self::default()
        }
    }
}

/// A compiled, ready-to-walk workflow
pub struct CompiledWorkflow {
    identity: String,
    order: Vec<String>,
    units: HashMap<String, Box<dyn Unit>>,
    successors: HashMap<String, BTreeMap<String, String>>,
    start: String,
    inputs: BTreeMap<String, InputSpec>,
    outputs: BTreeMap<String, OutputSpec>,
    policy: ResolutionPolicy,
    limits: RuntimeLimits,
    warnings: Vec<RunWarning>,
    diagnostics: Vec<RunWarning>,
}

impl CompiledWorkflow {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Step ids in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn unit(&self, node_id: &str) -> Option<&dyn Unit> {
        self.units.get(node_id).map(|unit| unit.as_ref())
    }

    /// Target of the edge leaving `node_id` under `action`
    pub fn successor(&self, node_id: &str, action: &str) -> Option<&str> {
        self.successors
            .get(node_id)
            .and_then(|by_action| by_action.get(action))
            .map(String::as_str)
    }

    pub fn has_successors(&self, node_id: &str) -> bool {
        self.successors
            .get(node_id)
            .is_some_and(|by_action| !by_action.is_empty())
    }

    pub fn inputs(&self) -> &BTreeMap<String, InputSpec> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, OutputSpec> {
        &self.outputs
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    /// Resolution issues let through by the policy and ambiguous accesses;
    /// seeded into every run's warnings
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    /// Graph findings (unreachable steps, rewired actions). Advisory only.
    pub fn diagnostics(&self) -> &[RunWarning] {
        &self.diagnostics
    }
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("identity", &self.identity)
            .field("start", &self.start)
            .field("nodes", &self.order)
            .field("successors", &self.successors)
            .finish()
    }
}

/// Compile a workflow against a registry
pub fn compile(
    ir: &WorkflowIr,
    registry: &Arc<Registry>,
    options: &CompileOptions,
) -> Result<CompiledWorkflow> {
    let identity = options
        .identity
        .clone()
        .unwrap_or_else(|| ir.display_name().to_string());
    let policy = ResolutionPolicy::new(options.mode.unwrap_or(ir.template_resolution_mode));
    debug!(workflow = %identity, mode = %policy.mode(), nodes = ir.nodes.len(), "compiling");

    // parsing
    ir.check_identity()?;

    // validation
    let view = dataflow_view(ir, registry);
    let mut warnings = Vec::new();
    let mut diagnostics = Vec::new();
    let (errors, soft): (Vec<DataFlowError>, Vec<DataFlowError>) =
        dataflow::validate(&view, &options.external_params)
            .into_iter()
            .partition(DataFlowError::is_error);
    if !errors.is_empty() {
        return Err(WeaveError::DataFlow {
            diagnostics: errors,
        });
    }
    for diagnostic in soft {
        warn!("{}", diagnostic);
        diagnostics.push(RunWarning::new(
            diagnostic.node_id(),
            diagnostic.to_string(),
            ErrorCategory::Graph,
        ));
    }

    // node_resolution
    let mut interfaces: HashMap<&str, NodeInterface> = HashMap::new();
    let mut units = HashMap::new();
    for node in &ir.nodes {
        let build_ctx = BuildContext {
            node_id: &node.id,
            registry,
            limits: &options.limits,
            base_dir: options.base_dir.as_deref(),
        };
        let Some((leaf, interface)) = registry.lookup(&node.node_type, &build_ctx) else {
            return Err(unknown_type(registry, node).into());
        };
        interfaces.insert(node.id.as_str(), interface.clone());
        units.insert(node.id.clone(), (node, leaf));
    }

    check_interfaces(&view, &interfaces, policy, &mut warnings)?;

    let units: HashMap<String, Box<dyn Unit>> = units
        .into_iter()
        .map(|(id, (node, leaf))| {
            let interface = interfaces.get(node.id.as_str());
            let (templated, literal): (Params, Params) = node
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .partition(|(k, v)| {
                    value_has_template(v) && !interface.is_some_and(|i| i.is_opaque(k))
                });
            let declared_types: HashMap<String, SemanticType> = interface
                .map(|interface| {
                    templated
                        .keys()
                        .filter_map(|key| {
                            interface
                                .param_type(key)
                                .map(|ty| (key.clone(), ty.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let unit = PipelineBuilder::new(node.id.clone(), node.node_type.clone(), leaf)
                .static_params(literal)
                .template_params(templated)
                .declared_types(declared_types)
                .batch(node.batch.clone())
                .limits(options.limits.clone())
                .build();
            (id, unit)
        })
        .collect();

    // flow_wiring
    let mut successors: HashMap<String, BTreeMap<String, String>> = HashMap::new();
    for edge in &ir.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !units.contains_key(endpoint.as_str()) {
                return Err(CompilationError::new(
                    CompilePhase::FlowWiring,
                    format!(
                        "Edge '{}' -> '{}' references unknown node '{}'",
                        edge.from, edge.to, endpoint
                    ),
                )
                .with_node(endpoint.clone())
                .with_suggestion(format!(
                    "Available nodes: {}",
                    ir.node_ids().collect::<Vec<_>>().join(", ")
                ))
                .into());
            }
        }

        let by_action = successors.entry(edge.from.clone()).or_default();
        if let Some(previous) = by_action.insert(edge.action().to_string(), edge.to.clone()) {
            if previous != edge.to {
                let message = format!(
                    "Node '{}' action '{}' is wired to both '{}' and '{}'; using '{}'",
                    edge.from,
                    edge.action(),
                    previous,
                    edge.to,
                    edge.to
                );
                warn!("{}", message);
                diagnostics.push(RunWarning::new(Some(edge.from.as_str()), message, ErrorCategory::Graph));
            }
        }
    }

    // start_detection
    let start = match &ir.start_node {
        Some(start) if units.contains_key(start.as_str()) => start.clone(),
        Some(start) => {
            return Err(CompilationError::new(
                CompilePhase::StartDetection,
                format!("Start node '{}' is not a declared node", start),
            )
            .with_node(start.clone())
            .with_suggestion(format!(
                "Use one of: {}",
                ir.node_ids().collect::<Vec<_>>().join(", ")
            ))
            .into())
        }
        None => match ir.nodes.first() {
            Some(first) => first.id.clone(),
            None => {
                return Err(CompilationError::new(
                    CompilePhase::StartDetection,
                    "Workflow has no nodes",
                )
                .with_suggestion("Declare at least one node")
                .into())
            }
        },
    };

    debug!(workflow = %identity, start = %start, "compiled");
    Ok(CompiledWorkflow {
        identity,
        order: ir.node_ids().map(String::from).collect(),
        units,
        successors,
        start,
        inputs: ir.inputs.clone(),
        outputs: ir.outputs.clone(),
        policy,
        limits: options.limits.clone(),
        warnings,
        diagnostics,
    })
}

/// The document as data-flow sees it: params a unit declares opaque are
/// dropped, since their references belong to another document
pub fn dataflow_view<'i>(ir: &'i WorkflowIr, registry: &Registry) -> Cow<'i, WorkflowIr> {
    let is_opaque = |node_type: &str, key: &str| {
        registry
            .interface(node_type)
            .is_some_and(|interface| interface.is_opaque(key))
    };
    let any_opaque = ir
        .nodes
        .iter()
        .any(|node| node.params.keys().any(|key| is_opaque(&node.node_type, key)));
    if !any_opaque {
        return Cow::Borrowed(ir);
    }

    let mut view = ir.clone();
    for node in &mut view.nodes {
        let node_type = node.node_type.clone();
        node.params.retain(|key, _| !is_opaque(&node_type, key));
    }
    Cow::Owned(view)
}

fn unknown_type(registry: &Registry, node: &NodeIr) -> CompilationError {
    let similar = registry.find_similar(&node.node_type, 3);
    let suggestion = if similar.is_empty() {
        format!("Available types: {}", registry.type_names().join(", "))
    } else {
        format!("Did you mean: {}?", similar.join(", "))
    };
    CompilationError::new(
        CompilePhase::NodeResolution,
        format!("Unknown node type '{}' for node '{}'", node.node_type, node.id),
    )
    .with_node(node.id.clone())
    .with_type(node.node_type.clone())
    .with_suggestion(suggestion)
}

/// Check `${step.output.rest}` references against the producing step's
/// declared outputs. Steps that declare no outputs are not checked.
fn check_interfaces(
    ir: &WorkflowIr,
    interfaces: &HashMap<&str, NodeInterface>,
    policy: ResolutionPolicy,
    warnings: &mut Vec<RunWarning>,
) -> Result<()> {
    for node in &ir.nodes {
        let mut refs = extract_refs(&serde_json::Value::Object(node.params.clone()));
        if let Some(batch) = &node.batch {
            refs.extend(extract_refs(&serde_json::Value::String(batch.items.clone())));
        }

        for reference in refs {
            let Some(source) = interfaces.get(reference.base.as_str()) else {
                continue;
            };
            if source.outputs.is_empty() {
                continue;
            }
            match static_issue(&node.id, &reference, source) {
                StaticCheck::Clean => {}
                StaticCheck::Ambiguous(warning) => {
                    warn!("{}", warning.message);
                    warnings.push(warning);
                }
                StaticCheck::Issue(issue) => policy.settle(issue, warnings)?,
            }
        }
    }
    Ok(())
}

enum StaticCheck {
    Clean,
    Ambiguous(RunWarning),
    Issue(WeaveError),
}

fn static_issue(node_id: &str, reference: &TemplateRef, source: &NodeInterface) -> StaticCheck {
    let Some(Segment::Field(key)) = reference.path.first() else {
        return StaticCheck::Clean;
    };

    let Some(output) = source.output(key) else {
        let declared: Vec<&str> = source.outputs.iter().map(|f| f.key.as_str()).collect();
        return StaticCheck::Issue(WeaveError::UndeclaredOutput {
            node_id: node_id.to_string(),
            template: reference.placeholder(),
            source_node: reference.base.clone(),
            output: key.clone(),
            hint: format!(
                "Declared outputs of '{}': {}",
                reference.base,
                declared.join(", ")
            ),
        });
    };

    let rest = &reference.path[1..];
    let Some(first) = rest.first() else {
        return StaticCheck::Clean;
    };
    let nested_path = crate::template::path::render_segments(rest)
        .trim_start_matches('.')
        .to_string();

    match output
        .field_type
        .nested_access(matches!(first, Segment::Index(_)))
    {
        NestedAccess::Rejected => StaticCheck::Issue(WeaveError::NestedAccess {
            node_id: node_id.to_string(),
            template: reference.placeholder(),
            output_type: output.field_type.to_string(),
            nested_path,
        }),
        NestedAccess::Ambiguous => StaticCheck::Ambiguous(RunWarning::ambiguous_access(
            node_id,
            &reference.placeholder(),
            &output.field_type.to_string(),
            &nested_path,
        )),
        NestedAccess::Allowed => match first {
            Segment::Field(field)
                if !output.structure.is_empty() && !output.structure.contains_key(field) =>
            {
                let documented: Vec<&str> = output.structure.keys().map(String::as_str).collect();
                StaticCheck::Issue(WeaveError::UndeclaredOutput {
                    node_id: node_id.to_string(),
                    template: reference.placeholder(),
                    source_node: reference.base.clone(),
                    output: format!("{}.{}", key, field),
                    hint: format!(
                        "Fields documented on '{}.{}': {}",
                        reference.base,
                        key,
                        documented.join(", ")
                    ),
                })
            }
            _ => StaticCheck::Clean,
        },
    }
}
