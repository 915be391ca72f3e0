//! Runtime limits and safety controls
//!
//! Provides configurable limits for:
//! - Sub-workflow nesting depth
//! - Nested parameter structure depth during template resolution
//! - Error details kept for `continue` batches
//! - Graph-walk steps (guards action-routing loops)
//! - Timeout for bridged async leaf units

use std::time::Duration;

use tracing::warn;

use crate::template::DEFAULT_MAX_TEMPLATE_DEPTH;

pub const ENV_MAX_DEPTH: &str = "WEAVE_MAX_DEPTH";
pub const ENV_MAX_TEMPLATE_DEPTH: &str = "WEAVE_MAX_TEMPLATE_DEPTH";
pub const ENV_MAX_BATCH_ERRORS: &str = "WEAVE_MAX_BATCH_ERRORS";
pub const ENV_MAX_STEPS: &str = "WEAVE_MAX_STEPS";
pub const ENV_ASYNC_TIMEOUT_MS: &str = "WEAVE_ASYNC_TIMEOUT_MS";

/// Limits applied to a run and to every sub-workflow it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// Maximum sub-workflow nesting depth
    pub max_depth: usize,

    /// Maximum depth when resolving templates inside nested params
    pub max_template_depth: usize,

    /// Maximum per-item error details kept by a `continue` batch
    pub max_batch_errors: usize,

    /// Maximum units invoked while walking one graph
    pub max_steps: usize,

    /// Timeout for one bridged async unit execution
    pub async_timeout: Duration,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_template_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
            max_batch_errors: 100,
            max_steps: 10_000,
            async_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeLimits {
    /// Create limits suitable for testing (more restrictive)
    pub fn testing() -> Self {
        Self {
            max_depth: 3,
            max_template_depth: 10,
            max_batch_errors: 5,
            max_steps: 100,
            async_timeout: Duration::from_secs(2),
        }
    }

    /// Create unlimited configuration (use with caution!)
    pub fn unlimited() -> Self {
        Self {
            max_depth: 1_000,
            max_template_depth: 10_000,
            max_batch_errors: usize::MAX,
            max_steps: usize::MAX,
            async_timeout: Duration::from_secs(86_400),
        }
    }

    /// Defaults overridden by `WEAVE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup; unparsable values are ignored
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<usize> {
            let raw = lookup(key)?;
            match raw.trim().parse::<usize>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparsable limit override");
                    None
                }
            }
        };

        if let Some(v) = read(ENV_MAX_DEPTH) {
            self.max_depth = v;
        }
        if let Some(v) = read(ENV_MAX_TEMPLATE_DEPTH) {
            self.max_template_depth = v;
        }
        if let Some(v) = read(ENV_MAX_BATCH_ERRORS) {
            self.max_batch_errors = v;
        }
        if let Some(v) = read(ENV_MAX_STEPS) {
            self.max_steps = v;
        }
        if let Some(v) = read(ENV_ASYNC_TIMEOUT_MS) {
            self.async_timeout = Duration::from_millis(v as u64);
        }
        self
    }
}
