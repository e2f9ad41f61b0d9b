//! Flow conditions
//!
//! A flow may carry `conditional_code`. Before touching its children the
//! engine asks a [`ConditionEvaluator`] for a verdict; a flow whose condition
//! is false is skipped and counts as complete.

use crate::core::step::Flow;
use crate::error::{EngineError, Result};

/// Decides whether a conditional flow should run
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, code: &str, flow: &Flow) -> Result<bool>;
}

/// Evaluates literal boolean conditions only
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralConditionEvaluator;

impl ConditionEvaluator for LiteralConditionEvaluator {
    fn evaluate(&self, code: &str, _flow: &Flow) -> Result<bool> {
        match code.trim().to_ascii_lowercase().as_str() {
            "" | "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(EngineError::Configuration(format!(
                "cannot evaluate flow condition '{}'",
                other
            ))),
        }
    }
}
