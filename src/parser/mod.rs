// ABOUTME: Parser module for YAML workflow definitions
// ABOUTME: Exports definition parsing, validation, and the typed step model

pub mod error;
pub mod step;
pub mod validation;
pub mod workflow;

pub use error::{DefinitionError, ValidationError};
pub use step::{Branch, FailurePolicy, StepKind, WorkflowStep, DEFAULT_STEP_TIMEOUT};
pub use validation::{ReferenceIssue, ReferenceWarning, ValidationReport, WorkflowValidator};
pub use workflow::{
    ErrorHandling, ErrorPolicy, RetrySettings, WorkflowDefinition, WorkflowMetadata,
    WorkflowParser,
};
