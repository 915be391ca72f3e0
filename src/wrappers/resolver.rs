//! Template resolution layer
//!
//! Resolves every templated parameter against the context (bindings first)
//! right before the wrapped unit runs. Unresolved references and declared
//! type mismatches are handed to the [`ResolutionPolicy`]; in strict mode the
//! first one aborts the run before the unit is touched.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::{StepCall, StepOutcome, Unit};
use crate::error::WeaveError;
use crate::nodes::Params;
use crate::template::{check_type, simple_reference, TemplateResolver};
use crate::types::SemanticType;

pub struct TemplateLayer {
    inner: Box<dyn Unit>,
    template_params: Params,
    /// Declared types of the unit's params, from its interface
    declared_types: HashMap<String, SemanticType>,
    max_depth: usize,
}

impl TemplateLayer {
    pub fn new(
        inner: Box<dyn Unit>,
        template_params: Params,
        declared_types: HashMap<String, SemanticType>,
        max_depth: usize,
    ) -> Self {
        Self {
            inner,
            template_params,
            declared_types,
            max_depth,
        }
    }

    /// Resolve all params, collecting issues in parameter order
    fn resolve(&self, call: &StepCall<'_>) -> (Params, Vec<WeaveError>) {
        let node_id = self.inner.node_id();
        let resolver = TemplateResolver::new(call.ctx.data(), &call.bindings)
            .with_max_depth(self.max_depth);

        let mut resolved_params = Params::new();
        let mut issues = Vec::new();

        for (key, raw) in &self.template_params {
            let resolved = resolver.resolve_value(raw);

            if !resolved.is_complete() {
                let mut names: Vec<String> = Vec::new();
                for unresolved in &resolved.unresolved {
                    let name = unresolved.reference.placeholder();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                let hints: Vec<&str> = resolved
                    .unresolved
                    .iter()
                    .map(|u| u.hint.as_str())
                    .collect();
                issues.push(WeaveError::UnresolvedTemplate {
                    node_id: node_id.to_string(),
                    param: key.clone(),
                    template: resolved
                        .unresolved
                        .first()
                        .map(|u| u.source.clone())
                        .unwrap_or_default(),
                    unresolved: names,
                    hint: hints.join("; "),
                });
            } else if let (Value::String(text), Some(declared)) =
                (raw, self.declared_types.get(key))
            {
                // Only whole-value references keep their type
                if simple_reference(text).is_some() {
                    if let Err(violation) = check_type(declared, &resolved.value) {
                        issues.push(WeaveError::TypeMismatch {
                            node_id: node_id.to_string(),
                            param: key.clone(),
                            template: text.clone(),
                            expected: violation.expected,
                            actual: violation.actual,
                            hint: violation.hint,
                        });
                    }
                }
            }

            debug!(node = node_id, param = %key, "resolved parameter");
            resolved_params.insert(key.clone(), resolved.value);
        }

        (resolved_params, issues)
    }
}

impl Unit for TemplateLayer {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn layer(&self) -> &'static str {
        "template"
    }

    fn inner(&self) -> Option<&dyn Unit> {
        Some(self.inner.as_ref())
    }

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome {
        let (resolved, issues) = self.resolve(call);

        for issue in issues {
            let policy = call.policy;
            if let Err(err) = policy.settle(issue, call.ctx.journal_mut().warnings_mut()) {
                return StepOutcome::Aborted(err);
            }
        }

        call.params.extend(resolved);
        self.inner.run(call)
    }
}
