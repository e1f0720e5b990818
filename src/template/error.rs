// ABOUTME: Error types for template parsing and resolution
// ABOUTME: Distinguishes malformed expressions from references to steps that have not run

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template syntax error in '{template}': {reason}")]
    Syntax { template: String, reason: String },

    #[error("Reference to step '{step_id}' which has not committed an output (in '{{{{ {expression} }}}}')")]
    Reference { step_id: String, expression: String },
}

pub type Result<T> = std::result::Result<T, TemplateError>;
