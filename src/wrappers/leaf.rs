//! Innermost layer: drives one [`Node`] through its lifecycle

use tracing::debug;

use super::{StepCall, StepFailure, StepOutcome, StepOutput, Unit};
use crate::error::ErrorCategory;
use crate::nodes::{Node, NodeError, Params, DEFAULT_ACTION};

pub struct LeafUnit {
    node_id: String,
    node: Box<dyn Node>,
    /// Template-free params, applied once at compile time
    static_params: Params,
}

impl LeafUnit {
    pub fn new(node_id: impl Into<String>, node: Box<dyn Node>, static_params: Params) -> Self {
        Self {
            node_id: node_id.into(),
            node,
            static_params,
        }
    }

    fn failure(&self, err: NodeError) -> StepOutcome {
        match err {
            NodeError::Fatal(err) => StepOutcome::Aborted(err),
            other => StepOutcome::Failed(StepFailure {
                node_id: self.node_id.clone(),
                message: other.to_string(),
                category: ErrorCategory::Execution,
                details: other.details().cloned(),
            }),
        }
    }
}

impl Unit for LeafUnit {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn layer(&self) -> &'static str {
        "leaf"
    }

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome {
        let mut params = self.static_params.clone();
        params.extend(call.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let prepared = match self.node.prepare(&params, &*call.ctx) {
            Ok(prepared) => prepared,
            Err(err) => return self.failure(err),
        };

        let executed = match self.node.execute(&prepared) {
            Ok(value) => value,
            Err(err @ NodeError::Fatal(_)) => return self.failure(err),
            Err(err) => {
                debug!(node = %self.node_id, error = %err, "execute failed, trying fallback");
                match self.node.fallback(&prepared, err) {
                    Ok(value) => value,
                    Err(err) => return self.failure(err),
                }
            }
        };

        match self.node.finalize(&mut *call.ctx, &prepared, executed) {
            Ok(output) => StepOutcome::Completed(StepOutput {
                values: output.values,
                action: output.action.unwrap_or_else(|| DEFAULT_ACTION.to_string()),
            }),
            Err(err) => self.failure(err),
        }
    }
}
