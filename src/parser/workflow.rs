// ABOUTME: Core workflow definition structures and parsing functionality
// ABOUTME: Defines WorkflowDefinition, its metadata and error-handling configuration

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use super::error::{DefinitionError, Result, ValidationError};
use super::step::{RawStep, WorkflowStep};
use super::validation;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub metadata: WorkflowMetadata,
    pub steps: Vec<WorkflowStep>,
    pub error_handling: ErrorHandling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandling {
    #[serde(default)]
    pub policy: ErrorPolicy,
    /// Steps whose failure commits an absent output instead of failing the run.
    #[serde(default)]
    pub ignore_failures: Vec<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    #[serde(alias = "fail_fast")]
    Abort,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ErrorHandling {
    /// Whether a failure of `step_id` is committed as absent instead of aborting.
    pub fn is_ignorable(&self, step_id: &str) -> bool {
        self.policy == ErrorPolicy::Continue || self.ignore_failures.iter().any(|id| id == step_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    metadata: Option<RawMetadata>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
    #[serde(default)]
    error_handling: Option<ErrorHandling>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetadata {
    id: Option<String>,
    name: Option<String>,
    version: Option<YamlValue>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DefinitionError::MissingField(field.to_string())),
    }
}

impl RawMetadata {
    fn into_metadata(self) -> Result<WorkflowMetadata> {
        // Versions like `1.0` arrive as YAML numbers.
        let version = match self.version {
            Some(YamlValue::String(text)) => Some(text),
            Some(YamlValue::Number(number)) => Some(number.to_string()),
            Some(YamlValue::Null) | None => None,
            Some(_) => {
                return Err(DefinitionError::InvalidFormat(
                    "metadata.version must be a string or number".to_string(),
                ))
            }
        };

        Ok(WorkflowMetadata {
            id: required(self.id, "metadata.id")?,
            name: required(self.name, "metadata.name")?,
            version: required(version, "metadata.version")?,
            description: self.description.unwrap_or_default(),
            tags: self.tags,
        })
    }
}

impl WorkflowDefinition {
    /// Parse a definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DefinitionError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Parse a definition from raw registry bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(bytes)?;
        Self::from_yaml(content)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: RawDefinition = serde_yaml::from_str(content).map_err(DefinitionError::YamlError)?;

        let metadata = raw
            .metadata
            .ok_or_else(|| DefinitionError::MissingField("metadata".to_string()))?
            .into_metadata()?;

        let steps = raw
            .steps
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, step)| step.into_step(&format!("steps[{}]", index)))
            .collect::<Result<Vec<_>>>()?;

        let definition = Self {
            metadata,
            steps,
            error_handling: raw.error_handling.unwrap_or_default(),
        };
        definition.validate_structure()?;

        Ok(definition)
    }

    /// Validate the structural rules every definition must satisfy
    pub fn validate_structure(&self) -> Result<()> {
        if self.metadata.id.trim().is_empty() {
            return Err(DefinitionError::MissingField("metadata.id".to_string()));
        }
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyWorkflow.into());
        }
        validation::check_structure(self)?;
        Ok(())
    }

    /// Top-level step ids in execution order
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    /// Every step in the definition, nested ones included, in declaration order
    pub fn all_steps(&self) -> Vec<&WorkflowStep> {
        self.steps.iter().flat_map(|step| step.descendants()).collect()
    }

    pub fn find_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.all_steps().into_iter().find(|step| step.id == step_id)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.find_step(step_id).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(DefinitionError::IoError)?;
        self.parse_string(&content)
    }

    pub fn parse_string(&self, content: &str) -> Result<WorkflowDefinition> {
        WorkflowDefinition::from_yaml(content)
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<WorkflowDefinition> {
        WorkflowDefinition::from_bytes(bytes)
    }
}

impl Default for WorkflowParser {
    fn default() -> Self {
        Self::new()
    }
}
