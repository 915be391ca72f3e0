//! Structural IR checks against the embedded JSON Schema
//!
//! Runs on the raw JSON value before serde parsing, so a malformed document
//! reports every offending path at once instead of the first serde error.

use jsonschema::Validator;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::{Result, WeaveError};

/// Embedded schema JSON (compiled at build time)
const SCHEMA_JSON: &str = include_str!("../../schemas/workflow-ir.schema.json");

/// Global schema validator instance (lazy initialization)
static VALIDATOR: OnceLock<std::result::Result<Validator, String>> = OnceLock::new();

fn validator() -> Result<&'static Validator> {
    let compiled = VALIDATOR.get_or_init(|| {
        let schema: Value = serde_json::from_str(SCHEMA_JSON)
            .map_err(|e| format!("Failed to parse schema JSON: {}", e))?;
        Validator::new(&schema).map_err(|e| format!("Failed to compile schema: {}", e))
    });

    compiled.as_ref().map_err(|reason| WeaveError::Structural {
        details: vec![reason.clone()],
    })
}

/// Validate a raw IR document, collecting every violation
pub fn check(value: &Value) -> Result<()> {
    let details: Vec<String> = validator()?
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if details.is_empty() {
        Ok(())
    } else {
        Err(WeaveError::Structural { details })
    }
}
