//! Template resolution mode and the single strict/permissive decision point

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WeaveError};
use crate::executor::RunWarning;

/// Per-workflow flag controlling how resolution problems escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Resolution problems abort the run
    #[default]
    Strict,
    /// Resolution problems are recorded as warnings and the run continues
    Permissive,
}

impl fmt::Display for TemplateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateMode::Strict => f.write_str("strict"),
            TemplateMode::Permissive => f.write_str("permissive"),
        }
    }
}

impl FromStr for TemplateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(TemplateMode::Strict),
            "permissive" => Ok(TemplateMode::Permissive),
            other => Err(format!(
                "unknown template mode '{}', expected strict or permissive",
                other
            )),
        }
    }
}

/// Decides whether a resolution problem aborts or degrades the run.
///
/// Every layer that can hit an unresolved reference, a type mismatch or bad
/// batch items hands the problem here instead of branching on the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionPolicy {
    mode: TemplateMode,
}

impl ResolutionPolicy {
    pub fn new(mode: TemplateMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TemplateMode {
        self.mode
    }

    pub fn is_strict(&self) -> bool {
        self.mode == TemplateMode::Strict
    }

    /// Strict: return the issue as an error. Permissive: record it as a warning.
    pub fn settle(&self, issue: WeaveError, warnings: &mut Vec<RunWarning>) -> Result<()> {
        match self.mode {
            TemplateMode::Strict => Err(issue),
            TemplateMode::Permissive => {
                warn!(node = issue.node_id().unwrap_or("-"), "{}", issue);
                warnings.push(RunWarning::from_error(&issue));
                Ok(())
            }
        }
    }
}
