//! Leaf unit lifecycle contract and built-in units
//!
//! Every step type implements [`Node`]: `prepare` reads params and context,
//! `execute` does the work on the prepared value only, `fallback` gets one
//! chance to turn a failure into a value, and `finalize` writes back and
//! picks the transition action.

mod bridge;
mod builtin;

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::error::WeaveError;

pub use bridge::{AsyncNode, BridgedNode};
pub use builtin::{register_builtins, DelayNode, EchoNode, FailNode};

/// Step parameters after static application and template resolution
pub type Params = Map<String, Value>;

pub const DEFAULT_ACTION: &str = "default";
pub const ERROR_ACTION: &str = "error";

/// Failure kinds a unit can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    Execution,
    Timeout,
    InvalidParams,
    /// Escalates to a run-level abort (recursion guards)
    Fatal,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{message}")]
    Failed {
        message: String,
        details: Option<Value>,
    },

    #[error("timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Fatal(#[from] WeaveError),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed {
            message: message.into(),
            details: None,
        }
    }

    pub fn failed_with(message: impl Into<String>, details: Value) -> Self {
        NodeError::Failed {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn kind(&self) -> NodeErrorKind {
        match self {
            NodeError::Failed { .. } => NodeErrorKind::Execution,
            NodeError::Timeout { .. } => NodeErrorKind::Timeout,
            NodeError::InvalidParams(_) => NodeErrorKind::InvalidParams,
            NodeError::Fatal(_) => NodeErrorKind::Fatal,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            NodeError::Failed { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Values a unit hands back plus the transition it wants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub values: Params,
    pub action: Option<String>,
}

impl NodeOutput {
    /// A dict result becomes the output map; anything else lands under `result`
    pub fn from_value(value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self {
            values,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// The lifecycle every leaf unit satisfies
pub trait Node: Send + Sync {
    fn prepare(&self, params: &Params, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let _ = ctx;
        Ok(Value::Object(params.clone()))
    }

    fn execute(&self, prepared: &Value) -> Result<Value, NodeError>;

    fn fallback(&self, prepared: &Value, error: NodeError) -> Result<Value, NodeError> {
        let _ = prepared;
        Err(error)
    }

    fn finalize(
        &self,
        ctx: &mut ExecutionContext,
        prepared: &Value,
        executed: Value,
    ) -> Result<NodeOutput, NodeError> {
        let _ = (ctx, prepared);
        Ok(NodeOutput::from_value(executed))
    }
}
