// ABOUTME: Step definitions for the four execution patterns and their YAML conversion
// ABOUTME: Turns loosely-shaped step documents into a typed, validated step tree

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::time::Duration;

use super::error::{DefinitionError, Result, ValidationError};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

pub const SUPPORTED_STEP_TYPES: [&str; 4] = ["primitive", "parallel", "conditional", "switch"];

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub id: String,
    pub timeout: Duration,
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Invoke one capability with resolved inputs.
    Primitive {
        capability_id: String,
        inputs: JsonValue,
    },
    Parallel {
        branches: Vec<Branch>,
        failure_policy: FailurePolicy,
        escalate_failures: bool,
    },
    Conditional {
        condition: String,
        if_true: Branch,
        if_false: Branch,
    },
    Switch {
        selector: String,
        cases: IndexMap<String, Branch>,
        default: Option<Branch>,
    },
}

/// An ordered group of steps run as a unit inside a composite step.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    CollectAll,
}

impl WorkflowStep {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            StepKind::Primitive { .. } => "primitive",
            StepKind::Parallel { .. } => "parallel",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Switch { .. } => "switch",
        }
    }

    pub fn capability_id(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Primitive { capability_id, .. } => Some(capability_id),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, StepKind::Primitive { .. })
    }

    /// Child branches in declaration order.
    pub fn branches(&self) -> Vec<&Branch> {
        match &self.kind {
            StepKind::Primitive { .. } => Vec::new(),
            StepKind::Parallel { branches, .. } => branches.iter().collect(),
            StepKind::Conditional {
                if_true, if_false, ..
            } => vec![if_true, if_false],
            StepKind::Switch { cases, default, .. } => {
                cases.values().chain(default.iter()).collect()
            }
        }
    }

    /// This step followed by every nested step, depth first.
    pub fn descendants(&self) -> Vec<&WorkflowStep> {
        let mut found = vec![self];
        for branch in self.branches() {
            for step in &branch.steps {
                found.extend(step.descendants());
            }
        }
        found
    }
}

impl Branch {
    pub fn new(id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawStep {
    id: Option<String>,
    #[serde(rename = "type")]
    step_type: Option<String>,
    #[serde(alias = "capability")]
    skill: Option<String>,
    inputs: Option<JsonValue>,
    timeout: Option<RawTimeout>,
    condition: Option<String>,
    if_true: Option<YamlValue>,
    if_false: Option<YamlValue>,
    selector: Option<String>,
    cases: Option<IndexMap<String, YamlValue>>,
    default: Option<YamlValue>,
    branches: Option<Vec<YamlValue>>,
    failure_policy: Option<FailurePolicy>,
    escalate_failures: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBranch {
    id: Option<String>,
    steps: Vec<YamlValue>,
}

fn invalid(step: &str, reason: impl Into<String>) -> DefinitionError {
    ValidationError::InvalidStepConfig {
        step: step.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn malformed(step: &str, branch: &str, reason: impl Into<String>) -> DefinitionError {
    ValidationError::MalformedBranch {
        step: step.to_string(),
        branch: branch.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl RawTimeout {
    fn into_duration(self, step: &str) -> Result<Duration> {
        let duration = match self {
            RawTimeout::Seconds(seconds) => Duration::from_secs(seconds),
            RawTimeout::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| invalid(step, format!("invalid timeout '{}': {}", text, e)))?,
        };
        if duration.is_zero() {
            return Err(invalid(step, "timeout must be greater than zero"));
        }
        Ok(duration)
    }
}

impl RawStep {
    /// Convert into a typed step. `location` names the step in errors until its id is known.
    pub(crate) fn into_step(mut self, location: &str) -> Result<WorkflowStep> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(DefinitionError::MissingField(format!("{}.id", location))),
        };

        let timeout = match self.timeout.take() {
            Some(raw) => raw.into_duration(&id)?,
            None => DEFAULT_STEP_TIMEOUT,
        };

        let step_type = self
            .step_type
            .as_deref()
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "primitive".to_string());

        let kind = match step_type.as_str() {
            "primitive" | "sequential" => self.into_primitive(&id)?,
            "parallel" => self.into_parallel(&id)?,
            "conditional" => self.into_conditional(&id)?,
            "switch" => self.into_switch(&id)?,
            other => {
                return Err(ValidationError::UnknownStepType {
                    step: id,
                    step_type: other.to_string(),
                    supported_types: SUPPORTED_STEP_TYPES.iter().map(|t| t.to_string()).collect(),
                }
                .into())
            }
        };

        Ok(WorkflowStep { id, timeout, kind })
    }

    fn reject_fields(&self, id: &str, allowed: &[&str]) -> Result<()> {
        let present = [
            ("skill", self.skill.is_some()),
            ("inputs", self.inputs.is_some()),
            ("condition", self.condition.is_some()),
            ("if_true", self.if_true.is_some()),
            ("if_false", self.if_false.is_some()),
            ("selector", self.selector.is_some()),
            ("cases", self.cases.is_some()),
            ("default", self.default.is_some()),
            ("branches", self.branches.is_some()),
            ("failure_policy", self.failure_policy.is_some()),
            ("escalate_failures", self.escalate_failures.is_some()),
        ];
        match present
            .iter()
            .find(|(field, set)| *set && !allowed.contains(field))
        {
            Some((field, _)) => Err(invalid(
                id,
                format!("field '{}' is not valid for this step type", field),
            )),
            None => Ok(()),
        }
    }

    fn into_primitive(self, id: &str) -> Result<StepKind> {
        self.reject_fields(id, &["skill", "inputs"])?;

        let capability_id = match self.skill.as_deref().map(str::trim) {
            Some(skill) if !skill.is_empty() => skill.to_string(),
            _ => return Err(DefinitionError::MissingField(format!("{}.skill", id))),
        };

        let inputs = match self.inputs {
            None | Some(JsonValue::Null) => JsonValue::Object(Default::default()),
            Some(inputs @ JsonValue::Object(_)) => inputs,
            Some(_) => return Err(invalid(id, "inputs must be a mapping")),
        };

        Ok(StepKind::Primitive {
            capability_id,
            inputs,
        })
    }

    fn into_parallel(self, id: &str) -> Result<StepKind> {
        self.reject_fields(id, &["branches", "failure_policy", "escalate_failures"])?;

        let raw_branches = self.branches.unwrap_or_default();
        if raw_branches.is_empty() {
            return Err(invalid(id, "parallel step requires at least one branch"));
        }

        let failure_policy = self.failure_policy.unwrap_or_default();
        let escalate_failures = self.escalate_failures.unwrap_or(false);
        if escalate_failures && failure_policy != FailurePolicy::CollectAll {
            return Err(invalid(
                id,
                "escalate_failures only applies to the collect_all failure policy",
            ));
        }

        let branches = raw_branches
            .into_iter()
            .enumerate()
            .map(|(index, value)| parse_branch(value, format!("branch_{}", index), id))
            .collect::<Result<Vec<_>>>()?;

        Ok(StepKind::Parallel {
            branches,
            failure_policy,
            escalate_failures,
        })
    }

    fn into_conditional(self, id: &str) -> Result<StepKind> {
        self.reject_fields(id, &["condition", "if_true", "if_false"])?;

        let condition = match self.condition {
            Some(condition) if !condition.trim().is_empty() => condition,
            _ => return Err(DefinitionError::MissingField(format!("{}.condition", id))),
        };
        if self.if_true.is_none() && self.if_false.is_none() {
            return Err(invalid(
                id,
                "conditional step requires 'if_true' or 'if_false'",
            ));
        }

        let if_true = parse_branch(self.if_true.unwrap_or(YamlValue::Null), "if_true".into(), id)?;
        let if_false =
            parse_branch(self.if_false.unwrap_or(YamlValue::Null), "if_false".into(), id)?;

        Ok(StepKind::Conditional {
            condition,
            if_true,
            if_false,
        })
    }

    fn into_switch(self, id: &str) -> Result<StepKind> {
        self.reject_fields(id, &["selector", "cases", "default"])?;

        let selector = match self.selector {
            Some(selector) if !selector.trim().is_empty() => selector,
            _ => return Err(DefinitionError::MissingField(format!("{}.selector", id))),
        };

        let raw_cases = self.cases.unwrap_or_default();
        if raw_cases.is_empty() {
            return Err(invalid(id, "switch step requires at least one case"));
        }

        let mut cases = IndexMap::with_capacity(raw_cases.len());
        for (label, value) in raw_cases {
            let branch = parse_branch(value, label.clone(), id)?;
            cases.insert(label, branch);
        }

        let default = self
            .default
            .map(|value| parse_branch(value, "default".into(), id))
            .transpose()?;

        Ok(StepKind::Switch {
            selector,
            cases,
            default,
        })
    }
}

fn parse_nested(value: YamlValue, location: &str) -> Result<WorkflowStep> {
    let raw: RawStep = serde_yaml::from_value(value)?;
    raw.into_step(location)
}

/// A branch is a single step, a list of steps, or `{ id, steps }`.
fn parse_branch(value: YamlValue, fallback_id: String, step: &str) -> Result<Branch> {
    let location = format!("{}.{}", step, fallback_id);
    match value {
        YamlValue::Null => Ok(Branch::new(fallback_id, Vec::new())),
        YamlValue::Sequence(items) => {
            let steps = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| parse_nested(item, &format!("{}[{}]", location, index)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Branch::new(fallback_id, steps))
        }
        YamlValue::Mapping(map) if map.contains_key(&YamlValue::from("steps")) => {
            let raw: RawBranch = serde_yaml::from_value(YamlValue::Mapping(map))
                .map_err(|e| malformed(step, &fallback_id, e.to_string()))?;
            let id = match raw.id {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                Some(_) => return Err(malformed(step, &fallback_id, "branch id cannot be empty")),
                None => fallback_id,
            };
            let steps = raw
                .steps
                .into_iter()
                .enumerate()
                .map(|(index, item)| parse_nested(item, &format!("{}[{}]", location, index)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Branch::new(id, steps))
        }
        mapping @ YamlValue::Mapping(_) => {
            let nested = parse_nested(mapping, &location)?;
            Ok(Branch::new(nested.id.clone(), vec![nested]))
        }
        _ => Err(malformed(
            step,
            &fallback_id,
            "expected a step, a list of steps, or a mapping with 'steps'",
        )),
    }
}
