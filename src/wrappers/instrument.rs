//! Outermost layer: tracing span, timing and the completion journal

use std::time::Instant;

use tracing::{error, info, info_span, warn};

use super::{StepCall, StepOutcome, Unit};

pub struct Instrumented {
    inner: Box<dyn Unit>,
    node_type: String,
}

impl Instrumented {
    pub fn new(inner: Box<dyn Unit>, node_type: impl Into<String>) -> Self {
        Self {
            inner,
            node_type: node_type.into(),
        }
    }
}

impl Unit for Instrumented {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn layer(&self) -> &'static str {
        "instrumented"
    }

    fn inner(&self) -> Option<&dyn Unit> {
        Some(self.inner.as_ref())
    }

    fn run(&self, call: &mut StepCall<'_>) -> StepOutcome {
        let node_id = self.inner.node_id();
        let span = info_span!("step", id = %node_id, node_type = %self.node_type);
        let _guard = span.enter();

        let started = Instant::now();
        let outcome = self.inner.run(call);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let journal = call.ctx.journal_mut();
        journal.record_timing(node_id, elapsed_ms);
        match &outcome {
            StepOutcome::Completed(output) => {
                journal.record_completion(node_id, !output.values.is_empty());
                info!(elapsed_ms, action = %output.action, "step completed");
            }
            StepOutcome::Failed(failure) => {
                warn!(elapsed_ms, error = %failure.message, "step failed");
            }
            StepOutcome::Aborted(err) => {
                error!(elapsed_ms, error = %err, "run aborted");
            }
        }
        outcome
    }
}
