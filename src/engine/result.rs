// ABOUTME: Step result types and the run report returned for every workflow run
// ABOUTME: Defines result structures for individual steps and complete workflow execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::context::WorkflowContext;
use super::error::{ExecutionError, StepError};
use super::state::RunStatus;
use crate::parser::WorkflowMetadata;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Timeout,
}

/// The committed record of one step: its output plus how it was produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Branch taken by a conditional or switch step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_branch: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

fn elapsed_since(started_at: DateTime<Utc>) -> (DateTime<Utc>, Duration) {
    let finished_at = Utc::now();
    let duration = (finished_at - started_at).to_std().unwrap_or(Duration::ZERO);
    (finished_at, duration)
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, output: JsonValue, started_at: DateTime<Utc>) -> Self {
        let (finished_at, duration) = elapsed_since(started_at);
        Self {
            step_id: step_id.into(),
            status: StepStatus::Success,
            output,
            error: None,
            selected_branch: None,
            attempts: 1,
            started_at,
            finished_at,
            duration,
        }
    }

    pub fn failure(step_id: impl Into<String>, error: StepError, started_at: DateTime<Utc>) -> Self {
        let (finished_at, duration) = elapsed_since(started_at);
        Self {
            step_id: step_id.into(),
            status: error.status(),
            output: JsonValue::Null,
            error: Some(error),
            selected_branch: None,
            attempts: 1,
            started_at,
            finished_at,
            duration,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.selected_branch = Some(branch.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StepStatus::Failure | StepStatus::Timeout)
    }
}

/// Where and why a run failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub step_id: Option<String>,
    pub inputs: JsonValue,
    pub kind: String,
    pub detail: String,
}

impl From<&ExecutionError> for RunFailure {
    fn from(error: &ExecutionError) -> Self {
        Self {
            step_id: error.step_id().map(str::to_string),
            inputs: error.inputs(),
            kind: error.kind().to_string(),
            detail: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub committed_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub timed_out_steps: usize,
}

/// Everything a caller needs to inspect a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow: WorkflowMetadata,
    pub status: RunStatus,
    pub context: WorkflowContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl RunReport {
    pub fn new(
        run_id: String,
        workflow: WorkflowMetadata,
        status: RunStatus,
        context: WorkflowContext,
        failure: Option<RunFailure>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let (finished_at, duration) = elapsed_since(started_at);
        let summary = RunSummary::from_context(&context);
        Self {
            run_id,
            workflow,
            status,
            context,
            failure,
            summary,
            started_at,
            finished_at,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.context.get(step_id)
    }

    pub fn output(&self, step_id: &str) -> Option<&JsonValue> {
        self.context.output(step_id)
    }

    /// Output of the last committed step, the run's overall result.
    pub fn final_output(&self) -> Option<&JsonValue> {
        self.context.last_output()
    }
}

impl RunSummary {
    pub fn from_context(context: &WorkflowContext) -> Self {
        let mut summary = RunSummary::default();
        for result in context.results() {
            summary.committed_steps += 1;
            match result.status {
                StepStatus::Success => summary.successful_steps += 1,
                StepStatus::Failure => summary.failed_steps += 1,
                StepStatus::Timeout => summary.timed_out_steps += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failure => write!(f, "failure"),
            StepStatus::Timeout => write!(f, "timeout"),
        }
    }
}
