// ABOUTME: Error types for step invocation and workflow execution
// ABOUTME: Separates per-step failures (recorded on results) from run-level execution errors

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use thiserror::Error;

use super::result::StepStatus;
use super::state::RunStatus;
use crate::parser::DefinitionError;
use crate::registry::RegistryError;
use crate::template::TemplateError;

/// Why a single primitive invocation did not produce an output.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    #[error("No capability provider found for '{capability_id}'")]
    CapabilityNotFound { capability_id: String },

    #[error("Invocation exceeded its timeout of {}", format_timeout(.timeout))]
    Timeout {
        #[serde(with = "humantime_serde")]
        timeout: Duration,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("{message}")]
    Reference { message: String },

    #[error("Step of type '{step_type}' cannot be invoked directly")]
    Unsupported { step_type: String },

    #[error("Invocation cancelled")]
    Cancelled,
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

fn at_step(step_id: &Option<String>) -> String {
    step_id
        .as_ref()
        .map(|id| format!(" at step '{}'", id))
        .unwrap_or_default()
}

impl StepError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::CapabilityNotFound { .. } => "capability_not_found",
            StepError::Timeout { .. } => "timeout",
            StepError::Transport { .. } => "transport",
            StepError::Reference { .. } => "reference",
            StepError::Unsupported { .. } => "unsupported",
            StepError::Cancelled => "cancelled",
        }
    }

    /// Timeouts and transport faults may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Timeout { .. } | StepError::Transport { .. })
    }

    pub fn status(&self) -> StepStatus {
        match self {
            StepError::Timeout { .. } => StepStatus::Timeout,
            _ => StepStatus::Failure,
        }
    }
}

impl From<TemplateError> for StepError {
    fn from(error: TemplateError) -> Self {
        StepError::Reference {
            message: error.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Step '{step_id}' failed: {error}")]
    StepFailed {
        step_id: String,
        inputs: JsonValue,
        error: StepError,
    },

    #[error("Switch step '{step_id}' has no case for selector {selector} and no default")]
    UnmatchedSwitch { step_id: String, selector: JsonValue },

    #[error("Conditional step '{step_id}' condition resolved to non-boolean value {value}")]
    InvalidCondition { step_id: String, value: JsonValue },

    #[error("Switch step '{step_id}' selector resolved to non-scalar value {value}")]
    InvalidSelector { step_id: String, value: JsonValue },

    #[error("Step '{step_id}' could not resolve its expression: {source}")]
    Resolution {
        step_id: String,
        source: TemplateError,
    },

    #[error("Step '{step_id}' already committed an output in this run")]
    DuplicateCommit { step_id: String },

    #[error("Run cancelled{}", at_step(.step_id))]
    Cancelled { step_id: Option<String> },

    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Definition error: {0}")]
    DefinitionError(#[from] DefinitionError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::StepFailed { error, .. } => error.kind(),
            ExecutionError::UnmatchedSwitch { .. } => "unmatched_switch",
            ExecutionError::InvalidCondition { .. } => "invalid_condition",
            ExecutionError::InvalidSelector { .. } => "invalid_selector",
            ExecutionError::Resolution { .. } => "reference",
            ExecutionError::DuplicateCommit { .. } => "duplicate_commit",
            ExecutionError::Cancelled { .. } => "cancelled",
            ExecutionError::InvalidTransition { .. } => "invalid_transition",
            ExecutionError::DefinitionError(_) => "definition",
            ExecutionError::RegistryError(_) => "registry",
            ExecutionError::JoinError(_) => "join",
        }
    }

    /// The step the error is attributed to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionError::StepFailed { step_id, .. }
            | ExecutionError::UnmatchedSwitch { step_id, .. }
            | ExecutionError::InvalidCondition { step_id, .. }
            | ExecutionError::InvalidSelector { step_id, .. }
            | ExecutionError::Resolution { step_id, .. }
            | ExecutionError::DuplicateCommit { step_id } => Some(step_id),
            ExecutionError::Cancelled { step_id } => step_id.as_deref(),
            _ => None,
        }
    }

    /// The resolved inputs (or deciding value) of the failing step.
    pub fn inputs(&self) -> JsonValue {
        match self {
            ExecutionError::StepFailed { inputs, .. } => inputs.clone(),
            ExecutionError::UnmatchedSwitch { selector, .. } => json!({ "selector": selector }),
            ExecutionError::InvalidSelector { value, .. } => json!({ "selector": value }),
            ExecutionError::InvalidCondition { value, .. } => json!({ "condition": value }),
            _ => JsonValue::Null,
        }
    }

    /// Whether a `collect_all` parallel step may record this failure instead of aborting.
    pub fn is_collectible(&self) -> bool {
        !matches!(
            self,
            ExecutionError::UnmatchedSwitch { .. }
                | ExecutionError::DuplicateCommit { .. }
                | ExecutionError::Cancelled { .. }
                | ExecutionError::InvalidTransition { .. }
                | ExecutionError::JoinError(_)
        )
    }

    /// Status recorded for a branch that ended with this error.
    pub fn branch_status(&self) -> StepStatus {
        match self {
            ExecutionError::StepFailed { error, .. } => error.status(),
            _ => StepStatus::Failure,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_serializes_with_kind_tag() {
        let error = StepError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["kind"], "timeout");
        assert_eq!(value["timeout"], "1s 500ms");
        assert_eq!(error.to_string(), "Invocation exceeded its timeout of 1s 500ms");

        let back: StepError = serde_json::from_value(value).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn test_transient_errors() {
        assert!(StepError::Transport {
            message: "reset".into()
        }
        .is_transient());
        assert!(!StepError::CapabilityNotFound {
            capability_id: "x".into()
        }
        .is_transient());
        assert!(!StepError::Cancelled.is_transient());
    }

    #[test]
    fn test_execution_error_attribution() {
        let error = ExecutionError::StepFailed {
            step_id: "build".into(),
            inputs: json!({"topic": "rust"}),
            error: StepError::Timeout {
                timeout: Duration::from_secs(1),
            },
        };
        assert_eq!(error.step_id(), Some("build"));
        assert_eq!(error.inputs(), json!({"topic": "rust"}));
        assert_eq!(error.kind(), "timeout");
        assert_eq!(error.branch_status(), StepStatus::Timeout);
        assert!(error.is_collectible());

        let unmatched = ExecutionError::UnmatchedSwitch {
            step_id: "route".into(),
            selector: json!("x"),
        };
        assert!(!unmatched.is_collectible());
        assert_eq!(unmatched.inputs(), json!({"selector": "x"}));

        let cancelled = ExecutionError::Cancelled { step_id: None };
        assert_eq!(cancelled.to_string(), "Run cancelled");
    }
}
