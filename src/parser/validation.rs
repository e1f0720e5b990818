// ABOUTME: Workflow validation logic for structure and step references
// ABOUTME: Enforces hard structural rules and reports references that cannot resolve at run time

use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::error::{Result, ValidationError};
use super::step::{StepKind, WorkflowStep};
use super::workflow::WorkflowDefinition;
use crate::template::Template;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ReferenceWarning>,
    pub is_valid: bool,
}

/// A template reference that will fail or read nothing when the step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceWarning {
    pub step: String,
    pub target: String,
    pub issue: ReferenceIssue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceIssue {
    /// No step with this id exists anywhere in the definition.
    Undeclared,
    /// The target only runs after the referencing step.
    NotYetCommitted,
    /// The target runs concurrently in another branch of the named parallel step.
    SiblingBranch { parallel: String },
    /// The target only commits when the named conditional or switch step selects its branch.
    ConditionallyCommitted { branching: String },
}

impl fmt::Display for ReferenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issue {
            ReferenceIssue::Undeclared => write!(
                f,
                "Step '{}' references undeclared step '{}'",
                self.step, self.target
            ),
            ReferenceIssue::NotYetCommitted => write!(
                f,
                "Step '{}' references step '{}' which has not run at that point",
                self.step, self.target
            ),
            ReferenceIssue::SiblingBranch { parallel } => write!(
                f,
                "Step '{}' references step '{}' from a sibling branch of parallel step '{}'",
                self.step, self.target, parallel
            ),
            ReferenceIssue::ConditionallyCommitted { branching } => write!(
                f,
                "Step '{}' references step '{}' which only runs if '{}' selects its branch",
                self.step, self.target, branching
            ),
        }
    }
}

/// Structural checks applied to every definition before it can run.
pub(crate) fn check_structure(definition: &WorkflowDefinition) -> std::result::Result<(), ValidationError> {
    match structural_errors(definition).into_iter().next() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn structural_errors(definition: &WorkflowDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if definition.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
    }

    let mut seen = HashSet::new();
    for step in definition.all_steps() {
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStep {
                step: step.id.clone(),
            });
        }
        if let Err(error) = validate_single_step(step) {
            errors.push(error);
        }
        for (field, text) in step_templates(step) {
            if let Err(error) = Template::parse(text) {
                errors.push(ValidationError::InvalidTemplate { field, error });
            }
        }
    }

    let handling = &definition.error_handling;
    for id in &handling.ignore_failures {
        if !seen.contains(id.as_str()) {
            errors.push(ValidationError::InvalidErrorHandling {
                reason: format!("ignore_failures names unknown step '{}'", id),
            });
        }
    }
    if handling.retry.max_attempts == 0 {
        errors.push(ValidationError::InvalidErrorHandling {
            reason: "retry.max_attempts must be greater than 0".to_string(),
        });
    }
    if handling.retry.backoff_multiplier <= 0.0 {
        errors.push(ValidationError::InvalidErrorHandling {
            reason: "retry.backoff_multiplier must be greater than 0".to_string(),
        });
    }

    errors
}

fn validate_single_step(step: &WorkflowStep) -> std::result::Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidStepConfig {
        step: step.id.clone(),
        reason: reason.to_string(),
    };

    if step.timeout.is_zero() {
        return Err(invalid("timeout must be greater than zero"));
    }

    match &step.kind {
        StepKind::Primitive { capability_id, .. } if capability_id.trim().is_empty() => {
            Err(invalid("skill cannot be empty"))
        }
        StepKind::Parallel { branches, .. } => {
            if branches.is_empty() {
                return Err(invalid("parallel step requires at least one branch"));
            }
            let mut ids = HashSet::new();
            for branch in branches {
                if !ids.insert(branch.id.as_str()) {
                    return Err(ValidationError::MalformedBranch {
                        step: step.id.clone(),
                        branch: branch.id.clone(),
                        reason: "branch ids must be unique within a parallel step".to_string(),
                    });
                }
            }
            Ok(())
        }
        StepKind::Switch { cases, .. } if cases.is_empty() => {
            Err(invalid("switch step requires at least one case"))
        }
        _ => Ok(()),
    }
}

/// Every template-bearing string in a step with the field it came from.
fn step_templates(step: &WorkflowStep) -> Vec<(String, &str)> {
    let mut found = Vec::new();
    match &step.kind {
        StepKind::Primitive { inputs, .. } => {
            collect_strings(inputs, format!("steps.{}.inputs", step.id), &mut found)
        }
        StepKind::Conditional { condition, .. } => {
            found.push((format!("steps.{}.condition", step.id), condition.as_str()))
        }
        StepKind::Switch { selector, .. } => {
            found.push((format!("steps.{}.selector", step.id), selector.as_str()))
        }
        StepKind::Parallel { .. } => {}
    }
    found
}

fn collect_strings<'a>(value: &'a JsonValue, field: String, found: &mut Vec<(String, &'a str)>) {
    match value {
        JsonValue::String(text) => found.push((field, text)),
        JsonValue::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_strings(item, format!("{}.{}", field, index), found);
            }
        }
        JsonValue::Object(map) => {
            for (key, item) in map {
                collect_strings(item, format!("{}.{}", field, key), found);
            }
        }
        _ => {}
    }
}

fn referenced_steps(text: &str) -> Vec<String> {
    match Template::parse(text) {
        Ok(template) => template
            .expressions()
            .filter_map(|expression| expression.step_id().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub struct WorkflowValidator {
    strict_mode: bool,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    /// In strict mode reference warnings also make the definition invalid.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Validate a complete definition
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<ValidationReport> {
        let mut report = ValidationReport::new();
        report.errors = structural_errors(definition);

        let declared: HashSet<&str> = definition
            .all_steps()
            .into_iter()
            .map(|step| step.id.as_str())
            .collect();
        let mut commits = Commits::default();
        let mut siblings = Vec::new();
        self.scan_steps(
            &definition.steps,
            &declared,
            &mut commits,
            &mut siblings,
            &mut report.warnings,
        );

        report.is_valid =
            report.errors.is_empty() && !(self.strict_mode && report.has_warnings());
        Ok(report)
    }

    /// Walk steps in execution order tracking which outputs are committed.
    fn scan_steps(
        &self,
        steps: &[WorkflowStep],
        declared: &HashSet<&str>,
        commits: &mut Commits,
        siblings: &mut Vec<(String, HashSet<String>)>,
        warnings: &mut Vec<ReferenceWarning>,
    ) {
        for step in steps {
            for (_, text) in step_templates(step) {
                for target in referenced_steps(text) {
                    if let Some(issue) = classify(&target, declared, commits, siblings) {
                        warnings.push(ReferenceWarning {
                            step: step.id.clone(),
                            target,
                            issue,
                        });
                    }
                }
            }

            let branches = step.branches();
            for (index, branch) in branches.iter().enumerate() {
                let mut local = commits.clone();
                let is_parallel = matches!(step.kind, StepKind::Parallel { .. });
                if is_parallel {
                    let others = branches
                        .iter()
                        .enumerate()
                        .filter(|(other, _)| *other != index)
                        .flat_map(|(_, other)| other.steps.iter().flat_map(|s| s.descendants()))
                        .map(|s| s.id.clone())
                        .collect();
                    siblings.push((step.id.clone(), others));
                }
                self.scan_steps(&branch.steps, declared, &mut local, siblings, warnings);
                if is_parallel {
                    siblings.pop();
                }
            }

            commits.record(step, None);
        }
    }
}

/// Step outputs known to be in the context at a point of the walk.
#[derive(Debug, Clone, Default)]
struct Commits {
    guaranteed: HashSet<String>,
    /// Step id -> nearest conditional or switch step gating it.
    conditional: HashMap<String, String>,
}

impl Commits {
    fn record(&mut self, step: &WorkflowStep, gate: Option<&str>) {
        match gate {
            Some(gate) => {
                self.conditional.insert(step.id.clone(), gate.to_string());
            }
            None => {
                self.guaranteed.insert(step.id.clone());
            }
        }

        let inner_gate = match step.kind {
            StepKind::Conditional { .. } | StepKind::Switch { .. } => Some(step.id.as_str()),
            StepKind::Primitive { .. } | StepKind::Parallel { .. } => gate,
        };
        for branch in step.branches() {
            for child in &branch.steps {
                self.record(child, inner_gate);
            }
        }
    }
}

fn classify(
    target: &str,
    declared: &HashSet<&str>,
    commits: &Commits,
    siblings: &[(String, HashSet<String>)],
) -> Option<ReferenceIssue> {
    if !declared.contains(target) {
        return Some(ReferenceIssue::Undeclared);
    }
    if commits.guaranteed.contains(target) {
        return None;
    }
    if let Some(branching) = commits.conditional.get(target) {
        return Some(ReferenceIssue::ConditionallyCommitted {
            branching: branching.clone(),
        });
    }
    match siblings.iter().rev().find(|(_, ids)| ids.contains(target)) {
        Some((parallel, _)) => Some(ReferenceIssue::SiblingBranch {
            parallel: parallel.clone(),
        }),
        None => Some(ReferenceIssue::NotYetCommitted),
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}
