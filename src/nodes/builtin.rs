//! Built-in step types: `echo`, `fail`, `delay`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{AsyncNode, BridgedNode, Node, NodeError, NodeOutput};
use crate::context::ExecutionContext;
use crate::registry::{InterfaceField, NodeInterface, Registry};

/// Outputs its parameters; an `action` param picks the transition
pub struct EchoNode;

impl Node for EchoNode {
    fn execute(&self, prepared: &Value) -> Result<Value, NodeError> {
        let mut values = prepared.as_object().cloned().unwrap_or_default();
        values.remove("action");
        Ok(Value::Object(values))
    }

    fn finalize(
        &self,
        _ctx: &mut ExecutionContext,
        prepared: &Value,
        executed: Value,
    ) -> Result<NodeOutput, NodeError> {
        let output = NodeOutput::from_value(executed);
        Ok(match prepared.get("action").and_then(Value::as_str) {
            Some(action) => output.with_action(action),
            None => output,
        })
    }
}

/// Always fails with its `message` param
pub struct FailNode;

impl Node for FailNode {
    fn execute(&self, prepared: &Value) -> Result<Value, NodeError> {
        let message = prepared
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("step failed");
        Err(NodeError::failed(message))
    }
}

/// Sleeps `ms` milliseconds on an async timer
pub struct DelayNode;

#[async_trait]
impl AsyncNode for DelayNode {
    async fn call(&self, input: Value) -> Result<Value, NodeError> {
        let ms = match input.get("ms") {
            None => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| NodeError::InvalidParams(format!("'ms' must be an int, got {}", value)))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(serde_json::json!({ "slept_ms": ms }))
    }
}

/// Register `echo`, `fail` and `delay`
pub fn register_builtins(registry: &mut Registry) {
    registry.register(
        "echo",
        NodeInterface::new("Outputs its parameters unchanged")
            .with_param(InterfaceField::new("action", "str").with_description("Transition to take"))
            .with_action("default"),
        |_| Box::new(EchoNode),
    );

    registry.register(
        "fail",
        NodeInterface::new("Always fails")
            .with_param(InterfaceField::new("message", "str"))
            .with_action("error"),
        |_| Box::new(FailNode),
    );

    registry.register(
        "delay",
        NodeInterface::new("Sleeps on an async timer")
            .with_param(InterfaceField::new("ms", "int"))
            .with_param(InterfaceField::new("timeout_ms", "int"))
            .with_output(InterfaceField::new("slept_ms", "int"))
            .with_action("default"),
        |ctx| Box::new(BridgedNode::new(DelayNode, ctx.limits.async_timeout)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn echo_strips_action_and_routes() {
        let mut ctx = ExecutionContext::new();
        let prepared = json!({"text": "hi", "action": "next"});
        let executed = EchoNode.execute(&prepared).unwrap();
        assert_eq!(executed, json!({"text": "hi"}));

        let output = EchoNode.finalize(&mut ctx, &prepared, executed).unwrap();
        assert_eq!(output.action.as_deref(), Some("next"));
    }

    #[test]
    fn fail_uses_message() {
        let err = FailNode.execute(&json!({"message": "boom"})).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn delay_rejects_non_int() {
        let node = BridgedNode::new(DelayNode, Duration::from_secs(1));
        let err = node.execute(&json!({"ms": "soon"})).unwrap_err();
        assert!(matches!(err, NodeError::InvalidParams(_)));
        assert_eq!(node.execute(&json!({"ms": 1})).unwrap(), json!({"slept_ms": 1}));
    }
}
