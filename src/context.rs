//! # Execution Context
//!
//! Per-run key/value accumulator plus two pieces of bookkeeping:
//!
//! - `CallFrame`: sub-workflow depth and the stack of in-flight workflow
//!   identities. Plain values, copied into each child context, never shared.
//! - `Journal`: completed steps, modification flags, timings and warnings.
//!
//! Reserved `__name__` keys are never stored in the data map; they are
//! overlaid when the context is exported with [`ExecutionContext::shared_after`].
//! Protected keys (step ids and declared inputs) are only ever written under
//! their own name, never by flattening another step's output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::executor::RunWarning;

// ============================================================================
// RESERVED KEYS
// ============================================================================

pub const COMPLETED_NODES_KEY: &str = "__completed_nodes__";
pub const CACHE_HITS_KEY: &str = "__cache_hits__";
pub const MODIFIED_NODES_KEY: &str = "__modified_nodes__";
pub const WORKFLOW_DEPTH_KEY: &str = "__workflow_depth__";
pub const WORKFLOW_STACK_KEY: &str = "__workflow_stack__";
pub const NODE_TIMINGS_KEY: &str = "__node_timings_ms__";

/// True for `__name__` keys owned by the runtime
pub fn is_reserved_key(key: &str) -> bool {
    key.len() > 4 && key.starts_with("__") && key.ends_with("__")
}

// ============================================================================
// CALL FRAME
// ============================================================================

/// Recursion guard state for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    depth: usize,
    stack: Vec<String>,
}

impl CallFrame {
    /// Frame of a top-level run of the named workflow
    pub fn for_workflow(identity: impl Into<String>) -> Self {
        Self {
            depth: 0,
            stack: vec![identity.into()],
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.stack.iter().any(|entry| entry == identity)
    }

    /// Frame for a child invocation, one level deeper
    pub fn enter(&self, identity: impl Into<String>) -> Self {
        let mut stack = self.stack.clone();
        stack.push(identity.into());
        Self {
            depth: self.depth + 1,
            stack,
        }
    }
}

// ============================================================================
// JOURNAL
// ============================================================================

/// What happened during a run, exported under the reserved keys
#[derive(Debug, Clone, Default)]
pub struct Journal {
    completed: Vec<String>,
    cache_hits: Map<String, Value>,
    modified: Map<String, Value>,
    timings: Map<String, Value>,
    warnings: Vec<RunWarning>,
}

impl Journal {
    /// Record a step that completed
    pub fn record_completion(&mut self, node_id: &str, modified: bool) {
        self.completed.push(node_id.to_string());
        self.cache_hits.insert(node_id.to_string(), Value::Bool(false));
        self.modified.insert(node_id.to_string(), Value::Bool(modified));
    }

    pub fn record_timing(&mut self, node_id: &str, elapsed_ms: u64) {
        self.timings.insert(node_id.to_string(), json!(elapsed_ms));
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed.iter().any(|id| id == node_id)
    }

    pub fn warn(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn warnings_mut(&mut self) -> &mut Vec<RunWarning> {
        &mut self.warnings
    }

    /// Drain the recorded warnings
    pub fn take_warnings(&mut self) -> Vec<RunWarning> {
        std::mem::take(&mut self.warnings)
    }
}

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    data: Map<String, Value>,
    frame: CallFrame,
    journal: Journal,
    protected: HashSet<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with data for the given call frame
    pub fn with_frame(data: Map<String, Value>, frame: CallFrame) -> Self {
        let data = data
            .into_iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .collect();
        Self {
            data,
            frame,
            journal: Journal::default(),
            protected: HashSet::new(),
        }
    }

    /// Copy of the data, frame and protected keys with an empty journal.
    /// Writes to the copy never reach this context.
    pub fn scratch(&self) -> Self {
        Self {
            data: self.data.clone(),
            frame: self.frame.clone(),
            journal: Journal::default(),
            protected: self.protected.clone(),
        }
    }

    /// Mark keys that output flattening must not overwrite
    pub fn protect<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(keys.into_iter().map(Into::into));
    }

    pub fn is_protected(&self, key: &str) -> bool {
        is_reserved_key(key) || self.protected.contains(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Insert a value; reserved keys are ignored
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if is_reserved_key(&key) {
            return;
        }
        self.data.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Replace all data (shared sub-workflows hand their final data back this way)
    pub fn replace_data(&mut self, data: Map<String, Value>) {
        self.data = data
            .into_iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .collect();
    }

    pub fn frame(&self) -> &CallFrame {
        &self.frame
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Data plus reserved journal and frame keys
    pub fn shared_after(&self) -> Value {
        let mut out = self.data.clone();
        out.insert(COMPLETED_NODES_KEY.to_string(), json!(self.journal.completed));
        out.insert(
            CACHE_HITS_KEY.to_string(),
            Value::Object(self.journal.cache_hits.clone()),
        );
        out.insert(
            MODIFIED_NODES_KEY.to_string(),
            Value::Object(self.journal.modified.clone()),
        );
        out.insert(
            NODE_TIMINGS_KEY.to_string(),
            Value::Object(self.journal.timings.clone()),
        );
        out.insert(WORKFLOW_DEPTH_KEY.to_string(), json!(self.frame.depth));
        out.insert(WORKFLOW_STACK_KEY.to_string(), json!(self.frame.stack));
        Value::Object(out)
    }

    pub fn into_parts(self) -> (Map<String, Value>, Journal) {
        (self.data, self.journal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_threaded_by_value() {
        let root = CallFrame::for_workflow("main.json");
        let child = root.enter("child.json");

        assert_eq!(root.depth(), 0);
        assert_eq!(root.stack().to_vec(), vec!["main.json".to_string()]);
        assert_eq!(child.depth(), 1);
        assert!(child.contains("main.json"));
        assert!(child.contains("child.json"));
        assert!(!root.contains("child.json"));
    }

    #[test]
    fn reserved_keys_stay_out_of_data() {
        let mut data = Map::new();
        data.insert("__workflow_depth__".into(), json!(7));
        data.insert("a".into(), json!(1));
        let mut ctx = ExecutionContext::with_frame(data, CallFrame::default());
        ctx.insert("__completed_nodes__", json!(["fake"]));

        assert_eq!(ctx.data().len(), 1);
        assert!(!ctx.contains_key("__workflow_depth__"));
    }

    #[test]
    fn scratch_copies_keep_protection_but_not_writes() {
        let mut ctx = ExecutionContext::with_frame(Map::new(), CallFrame::for_workflow("wf"));
        ctx.protect(["fetch", "who"]);
        ctx.insert("a", json!(1));

        let mut scratch = ctx.scratch();
        scratch.insert("b", json!(2));
        scratch.journal_mut().record_completion("x", true);

        assert!(scratch.is_protected("fetch"));
        assert!(scratch.is_protected("__completed_nodes__"));
        assert!(!scratch.is_protected("a"));
        assert_eq!(scratch.get("a"), Some(&json!(1)));
        assert!(!ctx.contains_key("b"));
        assert!(ctx.journal().completed().is_empty());
        assert_eq!(scratch.frame().stack(), ctx.frame().stack());
    }

    #[test]
    fn shared_after_exports_journal() {
        let mut ctx = ExecutionContext::with_frame(Map::new(), CallFrame::for_workflow("wf"));
        ctx.insert("step", json!({"out": 1}));
        ctx.journal_mut().record_completion("step", true);
        ctx.journal_mut().record_timing("step", 3);

        let shared = ctx.shared_after();
        assert_eq!(shared[COMPLETED_NODES_KEY], json!(["step"]));
        assert_eq!(shared[CACHE_HITS_KEY], json!({"step": false}));
        assert_eq!(shared[MODIFIED_NODES_KEY], json!({"step": true}));
        assert_eq!(shared[NODE_TIMINGS_KEY], json!({"step": 3}));
        assert_eq!(shared[WORKFLOW_DEPTH_KEY], json!(0));
        assert_eq!(shared[WORKFLOW_STACK_KEY], json!(["wf"]));
        assert_eq!(shared["step"], json!({"out": 1}));
    }

    #[test]
    fn reserved_key_detection() {
        assert!(is_reserved_key("__cache_hits__"));
        assert!(!is_reserved_key("____"));
        assert!(!is_reserved_key("_private"));
    }
}
