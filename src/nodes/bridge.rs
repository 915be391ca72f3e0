//! Bridge from async leaf units into the synchronous graph
//!
//! Each execution gets its own current-thread runtime, alive only for that
//! call, so no event loop outlives the step or leaks into the core.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Node, NodeError};

/// A leaf unit talking to an asynchronous protocol
#[async_trait]
pub trait AsyncNode: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, NodeError>;
}

/// Runs an [`AsyncNode`] to completion under a timeout
pub struct BridgedNode<N> {
    inner: N,
    timeout: Duration,
}

impl<N: AsyncNode> BridgedNode<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<N: AsyncNode> Node for BridgedNode<N> {
    fn execute(&self, prepared: &Value) -> Result<Value, NodeError> {
        // A `timeout_ms` param overrides the configured timeout for this call
        let timeout = prepared
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.timeout);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| NodeError::failed(format!("failed to start event loop: {}", e)))?;

        let input = prepared.clone();
        runtime.block_on(async move {
            match tokio::time::timeout(timeout, self.inner.call(input)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout { timeout }),
            }
        })
    }
}
