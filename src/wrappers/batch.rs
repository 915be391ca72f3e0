//! Batch iteration layer
//!
//! `batch.items` is resolved once, then the wrapped pipeline runs once per
//! item, in order, with the item bound under the batch alias. Each item runs
//! on a scratch copy of the context, so per-item output never reaches the
//! caller; only the aggregate is committed under the step id:
//!
//! ```json
//! {"results": [..], "count": 3, "success_count": 2, "error_count": 1,
//!  "errors": [{"index": 1, "item": .., "error": ".."}]}
//! ```

use serde_json::{json, Value};
use tracing::{debug, info};

use super::{commit_output, StepCall, StepFailure, StepOutcome, StepOutput, Unit};
use crate::config::RuntimeLimits;
use crate::error::{ErrorCategory, WeaveError};
use crate::executor::RunWarning;
use crate::ir::{BatchConfig, BatchErrorPolicy};
use crate::nodes::{Params, DEFAULT_ACTION};
use crate::template::TemplateResolver;
use crate::types::type_name_of;

pub struct BatchLayer {
    inner: Box<dyn Unit>,
    config: BatchConfig,
    max_errors: usize,
    max_template_depth: usize,
}

impl BatchLayer {
    pub fn new(inner: Box<dyn Unit>, config: BatchConfig, limits: &RuntimeLimits) -> Self {
        Self {
            inner,
            config,
            max_errors: limits.max_batch_errors,
            max_template_depth: limits.max_template_depth,
        }
    }

    /// Resolve `batch.items` to a list. Problems go through the policy;
    /// when it lets them pass the batch runs over zero items.
    fn resolve_items(&self, call: &mut StepCall<'_>) -> Result<Vec<Value>, WeaveError> {
        let node_id = self.inner.node_id();
        let resolved = TemplateResolver::new(call.ctx.data(), &call.bindings)
            .with_max_depth(self.max_template_depth)
            .resolve_str(&self.config.items);

        let issue = if !resolved.is_complete() {
            WeaveError::UnresolvedTemplate {
                node_id: node_id.to_string(),
                param: "batch.items".to_string(),
                template: self.config.items.clone(),
                unresolved: resolved
                    .unresolved
                    .iter()
                    .map(|u| u.reference.placeholder())
                    .collect(),
                hint: resolved
                    .unresolved
                    .iter()
                    .map(|u| u.hint.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            }
        } else {
            match resolved.value {
                Value::Array(items) => return Ok(items),
                // Upstream steps often emit JSON text
                Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
                    Ok(Value::Array(items)) => return Ok(items),
                    _ => WeaveError::InvalidBatchItems {
                        node_id: node_id.to_string(),
                        template: self.config.items.clone(),
                        actual: "str".to_string(),
                    },
                },
                other => WeaveError::InvalidBatchItems {
                    node_id: node_id.to_string(),
                    template: self.config.items.clone(),
                    actual: type_name_of(&other).to_string(),
                },
            }
        };

        let policy = call.policy;
        policy.settle(issue, call.ctx.journal_mut().warnings_mut())?;
        Ok(Vec::new())
    }
}

impl Unit for BatchLayer {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn layer(&self) -> &'static str {
        "batch"
    }

    fn inner(&self) -> Option<&dyn Unit> {
        Some(self.inner.as_ref())
    }

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome {
        let node_id = self.inner.node_id();
        let items = match self.resolve_items(call) {
            Ok(items) => items,
            Err(err) => return StepOutcome::Aborted(err),
        };

        let count = items.len();
        info!(node = node_id, count, alias = %self.config.alias, "running batch");

        let mut results = Vec::with_capacity(count);
        let mut errors = Vec::new();
        let mut error_count = 0usize;

        for (index, item) in items.iter().enumerate() {
            let mut bindings = call.bindings.clone();
            bindings.insert(self.config.alias.clone(), item.clone());
            let mut scratch = call.ctx.scratch();
            let outcome = {
                let mut item_call = StepCall::new(&mut scratch, bindings, call.policy);
                self.inner.run(&mut item_call)
            };
            let item_warnings = scratch.journal_mut().take_warnings();
            call.ctx.journal_mut().warnings_mut().extend(item_warnings);

            match outcome {
                StepOutcome::Completed(output) => results.push(Value::Object(output.values)),
                StepOutcome::Aborted(err) => return StepOutcome::Aborted(err),
                StepOutcome::Failed(failure) => match self.config.error_handling {
                    BatchErrorPolicy::FailFast => {
                        let message = format!("Batch item {} failed: {}", index, failure.message);
                        call.ctx.insert(node_id, json!({ "error": message }));
                        return StepOutcome::Failed(StepFailure {
                            node_id: node_id.to_string(),
                            message,
                            category: ErrorCategory::Batch,
                            details: Some(json!({ "index": index, "item": item })),
                        });
                    }
                    BatchErrorPolicy::Continue => {
                        debug!(node = node_id, index, error = %failure.message, "batch item failed");
                        error_count += 1;
                        results.push(Value::Null);
                        if errors.len() < self.max_errors {
                            errors.push(json!({
                                "index": index,
                                "item": item,
                                "error": failure.message,
                            }));
                        }
                    }
                },
            }
        }

        let truncated = error_count - errors.len();
        let mut values = Params::new();
        values.insert("results".into(), Value::Array(results));
        values.insert("count".into(), json!(count));
        values.insert("success_count".into(), json!(count - error_count));
        values.insert("error_count".into(), json!(error_count));
        values.insert("errors".into(), Value::Array(errors));
        if truncated > 0 {
            values.insert("errors_truncated".into(), json!(truncated));
        }

        if error_count > 0 {
            call.ctx.journal_mut().warn(RunWarning::new(
                Some(node_id),
                format!("Batch: {} of {} items failed", error_count, count),
                ErrorCategory::Batch,
            ));
        }

        commit_output(call.ctx, node_id, &values);
        StepOutcome::Completed(StepOutput {
            values,
            action: DEFAULT_ACTION.to_string(),
        })
    }
}
