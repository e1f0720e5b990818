// ABOUTME: Error types for workflow definition loading and validation
// ABOUTME: Defines specific error types for parser module operations

use thiserror::Error;

use crate::template::TemplateError;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read workflow definition: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Workflow definition is not valid UTF-8: {0}")]
    EncodingError(#[from] std::str::Utf8Error),

    #[error("Invalid definition format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty workflow: no steps defined")]
    EmptyWorkflow,

    #[error("Duplicate step id: {step}")]
    DuplicateStep { step: String },

    #[error("Unknown step type '{step_type}' in step '{step}'. Supported types: {supported_types:?}")]
    UnknownStepType {
        step: String,
        step_type: String,
        supported_types: Vec<String>,
    },

    #[error("Invalid configuration for step '{step}': {reason}")]
    InvalidStepConfig { step: String, reason: String },

    #[error("Malformed branch '{branch}' in step '{step}': {reason}")]
    MalformedBranch {
        step: String,
        branch: String,
        reason: String,
    },

    #[error("Invalid template in '{field}': {error}")]
    InvalidTemplate { field: String, error: TemplateError },

    #[error("Invalid error handling: {reason}")]
    InvalidErrorHandling { reason: String },
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
