// ABOUTME: Error types for workflow definition registries
// ABOUTME: Covers unknown keys, rejected key components and storage faults

use thiserror::Error;

use super::DefinitionKey;
use crate::parser::DefinitionError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Workflow definition not found: {0}")]
    NotFound(DefinitionKey),

    #[error("Invalid definition key component '{component}': {reason}")]
    InvalidKey { component: String, reason: String },

    #[error("Failed to access definition {key}: {source}")]
    IoError {
        key: DefinitionKey,
        source: std::io::Error,
    },

    #[error("Invalid definition: {0}")]
    DefinitionError(#[from] DefinitionError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
