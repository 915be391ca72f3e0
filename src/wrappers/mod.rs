//! Per-step wrapper pipeline
//!
//! Outermost to innermost:
//!
//! ```text
//! Instrumented > Batch (if configured) > Namespacer > TemplateLayer (if templated) > LeafUnit
//! ```
//!
//! Every layer implements [`Unit`], so a layer neither knows nor cares what
//! it wraps. Batching drives namespaced, per-item resolved runs on scratch
//! contexts; instrumentation times the step as a whole.

mod batch;
mod instrument;
mod leaf;
mod namespace;
mod resolver;

use std::collections::HashMap;

use serde_json::Value;

use crate::config::RuntimeLimits;
use crate::context::ExecutionContext;
use crate::error::{ErrorCategory, WeaveError};
use crate::ir::BatchConfig;
use crate::nodes::{Node, Params};
use crate::policy::ResolutionPolicy;
use crate::types::SemanticType;

pub use batch::BatchLayer;
pub use instrument::Instrumented;
pub use leaf::LeafUnit;
pub use namespace::{commit_output, Namespacer};
pub use resolver::TemplateLayer;

/// One invocation of a step
pub struct StepCall<'a> {
    pub ctx: &'a mut ExecutionContext,
    /// Template-resolved parameters, filled in by [`TemplateLayer`]
    pub params: Params,
    /// Pre-bound values (workflow inputs, batch item alias); win over context
    pub bindings: Params,
    pub policy: ResolutionPolicy,
}

impl<'a> StepCall<'a> {
    pub fn new(ctx: &'a mut ExecutionContext, bindings: Params, policy: ResolutionPolicy) -> Self {
        Self {
            ctx,
            params: Params::new(),
            bindings,
            policy,
        }
    }
}

/// Successful step result
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub values: Params,
    pub action: String,
}

/// A contained failure of the step itself
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub node_id: String,
    pub message: String,
    pub category: ErrorCategory,
    pub details: Option<Value>,
}

/// What every layer returns
#[derive(Debug)]
pub enum StepOutcome {
    Completed(StepOutput),
    /// Routed on an `error` transition when one exists
    Failed(StepFailure),
    /// Halts the whole run
    Aborted(WeaveError),
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed(_))
    }
}

/// Shared contract of leaf units and decorators
pub trait Unit: Send + Sync {
    fn node_id(&self) -> &str;

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome;

    /// Layer name, for introspection
    fn layer(&self) -> &'static str;

    /// The wrapped unit, if this is a decorator
    fn inner(&self) -> Option<&dyn Unit> {
        None
    }
}

/// Layer names from outermost to innermost
pub fn layers(unit: &dyn Unit) -> Vec<&'static str> {
    let mut names = vec![unit.layer()];
    let mut current = unit.inner();
    while let Some(next) = current {
        names.push(next.layer());
        current = next.inner();
    }
    names
}

/// Composes the fixed layer order around one leaf unit
pub struct PipelineBuilder {
    node_id: String,
    node_type: String,
    leaf: Box<dyn Node>,
    static_params: Params,
    template_params: Params,
    declared_types: HashMap<String, SemanticType>,
    batch: Option<BatchConfig>,
    limits: RuntimeLimits,
}

impl PipelineBuilder {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, leaf: Box<dyn Node>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            leaf,
            static_params: Params::new(),
            template_params: Params::new(),
            declared_types: HashMap::new(),
            batch: None,
            limits: RuntimeLimits::default(),
        }
    }

    pub fn static_params(mut self, params: Params) -> Self {
        self.static_params = params;
        self
    }

    pub fn template_params(mut self, params: Params) -> Self {
        self.template_params = params;
        self
    }

    pub fn declared_types(mut self, types: HashMap<String, SemanticType>) -> Self {
        self.declared_types = types;
        self
    }

    pub fn batch(mut self, batch: Option<BatchConfig>) -> Self {
        self.batch = batch;
        self
    }

    pub fn limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Box<dyn Unit> {
        let mut unit: Box<dyn Unit> =
            Box::new(LeafUnit::new(self.node_id.clone(), self.leaf, self.static_params));

        if !self.template_params.is_empty() {
            unit = Box::new(TemplateLayer::new(
                unit,
                self.template_params,
                self.declared_types,
                self.limits.max_template_depth,
            ));
        }

        unit = Box::new(Namespacer::new(unit));

        if let Some(batch) = self.batch {
            unit = Box::new(BatchLayer::new(unit, batch, &self.limits));
        }

        Box::new(Instrumented::new(unit, self.node_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BatchErrorPolicy;
    use crate::nodes::EchoNode;
    use serde_json::json;

    #[test]
    fn plain_step_gets_namespacer_and_instrumentation() {
        let unit = PipelineBuilder::new("a", "echo", Box::new(EchoNode)).build();
        assert_eq!(layers(unit.as_ref()), vec!["instrumented", "namespacer", "leaf"]);
    }

    #[test]
    fn full_stack_order() {
        let mut templated = Params::new();
        templated.insert("text".into(), json!("${item}"));
        let unit = PipelineBuilder::new("a", "echo", Box::new(EchoNode))
            .template_params(templated)
            .batch(Some(BatchConfig {
                items: "${xs}".into(),
                alias: "item".into(),
                error_handling: BatchErrorPolicy::FailFast,
            }))
            .build();
        assert_eq!(
            layers(unit.as_ref()),
            vec!["instrumented", "batch", "namespacer", "template", "leaf"]
        );
    }
}
