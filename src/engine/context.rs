// ABOUTME: Run-scoped workflow context holding the initial input and committed step results
// ABOUTME: Resolves template expressions against the context without side effects

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use indexmap::IndexMap;

use super::error::{ExecutionError, Result};
use super::result::StepResult;
use crate::template::{self, Expression, Template, TemplateError, TemplateRoot};

/// Append-only record of a run: the caller's input and each step's committed result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    input: JsonValue,
    steps: IndexMap<String, StepResult>,
}

impl WorkflowContext {
    pub fn new(input: JsonValue) -> Self {
        Self {
            input,
            steps: IndexMap::new(),
        }
    }

    pub fn input(&self) -> &JsonValue {
        &self.input
    }

    /// Record a step's result. Each step id commits at most once per run.
    pub fn commit(&mut self, result: StepResult) -> Result<()> {
        if self.steps.contains_key(&result.step_id) {
            return Err(ExecutionError::DuplicateCommit {
                step_id: result.step_id,
            });
        }
        self.steps.insert(result.step_id.clone(), result);
        Ok(())
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.get(step_id)
    }

    pub fn output(&self, step_id: &str) -> Option<&JsonValue> {
        self.steps.get(step_id).map(|result| &result.output)
    }

    pub fn is_committed(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step ids in commit order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn results(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.values()
    }

    /// Results committed after the first `mark` entries.
    pub fn results_after(&self, mark: usize) -> impl Iterator<Item = &StepResult> {
        self.steps.values().skip(mark)
    }

    pub fn last_output(&self) -> Option<&JsonValue> {
        self.steps.values().last().map(|result| &result.output)
    }

    /// Resolve a template string against the current context.
    pub fn resolve(&self, text: &str) -> template::Result<JsonValue> {
        let template = Template::parse(text)?;
        self.evaluate(&template)
    }

    pub fn evaluate(&self, template: &Template) -> template::Result<JsonValue> {
        template.evaluate(|expression| self.lookup(expression))
    }

    /// Resolve every string leaf of a nested input structure.
    pub fn resolve_inputs(&self, inputs: &JsonValue) -> template::Result<JsonValue> {
        match inputs {
            JsonValue::String(text) => self.resolve(text),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve_inputs(item))
                .collect::<template::Result<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.resolve_inputs(value)?);
                }
                Ok(JsonValue::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, expression: &Expression) -> template::Result<JsonValue> {
        let base = match &expression.root {
            TemplateRoot::Input => &self.input,
            TemplateRoot::Step(step_id) => match self.steps.get(step_id) {
                Some(result) => &result.output,
                None => {
                    return Err(TemplateError::Reference {
                        step_id: step_id.clone(),
                        expression: expression.to_string(),
                    })
                }
            },
        };
        Ok(template::lookup_path(base, &expression.path)
            .cloned()
            .unwrap_or(JsonValue::Null))
    }
}
