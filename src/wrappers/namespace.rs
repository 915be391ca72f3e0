//! Writes a step's output under its own id and flattens it to the top level

use serde_json::{json, Value};
use tracing::debug;

use super::{StepCall, StepOutcome, Unit};
use crate::context::ExecutionContext;
use crate::nodes::Params;

pub struct Namespacer {
    inner: Box<dyn Unit>,
}

impl Namespacer {
    pub fn new(inner: Box<dyn Unit>) -> Self {
        Self { inner }
    }
}

/// Store `values` under `node_id`, then copy each key to the top level.
/// Keys naming a step, a workflow input or a reserved slot stay namespaced only.
pub fn commit_output(ctx: &mut ExecutionContext, node_id: &str, values: &Params) {
    ctx.insert(node_id, Value::Object(values.clone()));
    for (key, value) in values {
        if key == node_id || ctx.is_protected(key) {
            debug!(node = node_id, key = %key, "not flattening over a protected key");
            continue;
        }
        ctx.insert(key.clone(), value.clone());
    }
}

impl Unit for Namespacer {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn layer(&self) -> &'static str {
        "namespacer"
    }

    fn inner(&self) -> Option<&dyn Unit> {
        Some(self.inner.as_ref())
    }

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome {
        let outcome = self.inner.run(call);
        match &outcome {
            StepOutcome::Completed(output) => {
                commit_output(call.ctx, self.inner.node_id(), &output.values)
            }
            // Downstream error handlers read the message from the namespace
            StepOutcome::Failed(failure) => call
                .ctx
                .insert(self.inner.node_id(), json!({ "error": failure.message })),
            StepOutcome::Aborted(_) => {}
        }
        outcome
    }
}
