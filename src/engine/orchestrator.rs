// ABOUTME: Workflow engine driving runs through sequential, parallel, conditional and switch steps
// ABOUTME: Owns the run lifecycle, commits step results and assembles the run report

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::context::WorkflowContext;
use super::error::{ExecutionError, Result, StepError};
use super::executor::{StepExecutor, StepOutcome};
use super::result::{RunFailure, RunReport, StepResult};
use super::retry::{RetryPolicy, DEFAULT_MAX_RETRY_DELAY};
use super::state::{RunState, RunStatus};
use crate::capability::{CachingLocator, CapabilityLocator, Transport};
use crate::parser::{Branch, ErrorHandling, FailurePolicy, StepKind, WorkflowDefinition, WorkflowStep};
use crate::registry::{self, DefinitionKey, DefinitionRegistry};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on the delay between retry attempts.
    pub max_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

/// Executes workflow definitions against capability providers.
#[derive(Clone)]
pub struct WorkflowEngine {
    locator: Arc<dyn CapabilityLocator>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl WorkflowEngine {
    pub fn new(locator: Arc<dyn CapabilityLocator>, transport: Arc<dyn Transport>) -> Self {
        Self {
            locator,
            transport,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a definition to completion. Failures are reported, never raised.
    pub async fn run(&self, definition: &WorkflowDefinition, input: JsonValue) -> RunReport {
        self.run_with_cancellation(definition, input, CancellationToken::new())
            .await
    }

    /// Run a definition, stopping in-flight work when `cancel` fires.
    #[instrument(skip(self, definition, input, cancel), fields(workflow_id = %definition.metadata.id))]
    pub async fn run_with_cancellation(
        &self,
        definition: &WorkflowDefinition,
        input: JsonValue,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            "Starting workflow {} v{} (run_id: {})",
            definition.metadata.id, definition.metadata.version, run_id
        );

        // Discovery results are shared by every step of this run and no other.
        let locator: Arc<dyn CapabilityLocator> =
            Arc::new(CachingLocator::new(Arc::clone(&self.locator)));
        let driver = RunDriver {
            executor: Arc::new(StepExecutor::new(locator, Arc::clone(&self.transport))),
            error_handling: Arc::new(definition.error_handling.clone()),
            retry: RetryPolicy::from_settings(
                &definition.error_handling.retry,
                self.config.max_retry_delay,
            ),
            cancel,
        };

        let mut state = RunState::new();
        let mut context = WorkflowContext::new(input);
        let outcome = driver
            .run_workflow(&definition.steps, &mut context, &mut state)
            .await;

        let failure = match outcome {
            Ok(()) => {
                if let Err(e) = state.transition(RunStatus::Completed) {
                    error!("{}", e);
                }
                info!(
                    "Workflow {} completed with {} committed steps",
                    definition.metadata.id,
                    context.len()
                );
                None
            }
            Err(e) => {
                if let Err(transition) = state.transition(RunStatus::Failed) {
                    error!("{}", transition);
                }
                error!("Workflow {} failed: {}", definition.metadata.id, e);
                Some(RunFailure::from(&e))
            }
        };

        RunReport::new(
            run_id,
            definition.metadata.clone(),
            state.status(),
            context,
            failure,
            started_at,
        )
    }

    /// Fetch a definition from a registry and run it.
    pub async fn run_registered(
        &self,
        registry: &dyn DefinitionRegistry,
        key: &DefinitionKey,
        input: JsonValue,
    ) -> Result<RunReport> {
        let definition = registry::load_definition(registry, key).await?;
        Ok(self.run(&definition, input).await)
    }
}

/// Per-run execution state shared by every branch of the run.
#[derive(Clone)]
struct RunDriver {
    executor: Arc<StepExecutor>,
    error_handling: Arc<ErrorHandling>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

/// What a parallel branch produced, along with its private context.
struct BranchOutcome {
    branch_id: String,
    result: Result<JsonValue>,
    context: WorkflowContext,
    mark: usize,
}

impl RunDriver {
    async fn run_workflow(
        &self,
        steps: &[WorkflowStep],
        context: &mut WorkflowContext,
        state: &mut RunState,
    ) -> Result<()> {
        state.transition(RunStatus::Running)?;
        for step in steps {
            self.run_and_commit(step, context).await?;
        }
        Ok(())
    }

    /// Run steps in order, returning the last committed output.
    fn run_sequence<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        context: &'a mut WorkflowContext,
    ) -> BoxFuture<'a, Result<JsonValue>> {
        async move {
            let mut last = JsonValue::Null;
            for step in steps {
                last = self.run_and_commit(step, context).await?;
            }
            Ok(last)
        }
        .boxed()
    }

    async fn run_and_commit(&self, step: &WorkflowStep, context: &mut WorkflowContext) -> Result<JsonValue> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                step_id: Some(step.id.clone()),
            });
        }
        let result = self.run_step(step, context).await?;
        let output = result.output.clone();
        context.commit(result)?;
        Ok(output)
    }

    async fn run_step(&self, step: &WorkflowStep, context: &mut WorkflowContext) -> Result<StepResult> {
        match &step.kind {
            StepKind::Primitive { .. } => self.run_primitive(step, context).await,
            StepKind::Parallel {
                branches,
                failure_policy,
                escalate_failures,
            } => {
                self.run_parallel(step, branches, *failure_policy, *escalate_failures, context)
                    .await
            }
            StepKind::Conditional {
                condition,
                if_true,
                if_false,
            } => self.run_conditional(step, condition, if_true, if_false, context).await,
            StepKind::Switch {
                selector,
                cases,
                default,
            } => {
                self.run_switch(step, selector, cases, default.as_ref(), context)
                    .await
            }
        }
    }

    async fn run_primitive(&self, step: &WorkflowStep, context: &WorkflowContext) -> Result<StepResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let StepOutcome { result, inputs } = self.executor.execute(step, context, &self.cancel).await;
            let result = result.with_attempts(attempt);

            let error = match result.error.clone() {
                None => return Ok(result),
                Some(error) => error,
            };

            if error == StepError::Cancelled {
                return Err(ExecutionError::Cancelled {
                    step_id: Some(step.id.clone()),
                });
            }

            if self.retry.should_retry(attempt, &error) {
                let delay = self.retry.calculate_delay(attempt - 1);
                warn!(
                    "Step {} attempt {}/{} failed ({}), retrying in {:?}",
                    step.id, attempt, self.retry.max_attempts, error, delay
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return Err(ExecutionError::Cancelled {
                            step_id: Some(step.id.clone()),
                        })
                    }
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            if self.error_handling.is_ignorable(&step.id) {
                warn!("Step {} failed and is ignorable; committing absent output", step.id);
                return Ok(result);
            }

            return Err(ExecutionError::StepFailed {
                step_id: step.id.clone(),
                inputs,
                error,
            });
        }
    }

    async fn run_parallel(
        &self,
        step: &WorkflowStep,
        branches: &[Branch],
        failure_policy: FailurePolicy,
        escalate_failures: bool,
        context: &mut WorkflowContext,
    ) -> Result<StepResult> {
        let started_at = Utc::now();
        let group_cancel = self.cancel.child_token();
        let mut tasks = JoinSet::new();

        info!(
            "Step {} running {} branches ({:?})",
            step.id,
            branches.len(),
            failure_policy
        );

        for (index, branch) in branches.iter().enumerate() {
            let driver = RunDriver {
                cancel: group_cancel.clone(),
                ..self.clone()
            };
            let branch = branch.clone();
            let snapshot = context.clone();
            tasks.spawn(async move { (index, driver.run_branch(branch, snapshot).await) });
        }

        let mut outcomes: Vec<Option<BranchOutcome>> = branches.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(finished) => finished,
                Err(join_error) => {
                    group_cancel.cancel();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(join_error.into());
                }
            };

            match outcome.result {
                Err(error)
                    if failure_policy == FailurePolicy::FailFast || !error.is_collectible() =>
                {
                    warn!(
                        "Branch {} of step {} failed, cancelling siblings: {}",
                        outcome.branch_id, step.id, error
                    );
                    group_cancel.cancel();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(error);
                }
                result => outcomes[index] = Some(BranchOutcome { result, ..outcome }),
            }
        }

        // Branch-local commits become visible in declaration order, then the aggregate.
        let mut aggregate = Map::new();
        let mut first_failure = None;
        for outcome in outcomes.into_iter().flatten() {
            for committed in outcome.context.results_after(outcome.mark) {
                context.commit(committed.clone())?;
            }
            match outcome.result {
                Ok(output) => {
                    aggregate.insert(outcome.branch_id, output);
                }
                Err(error) => {
                    aggregate.insert(
                        outcome.branch_id,
                        json!({
                            "status": error.branch_status(),
                            "error": error.to_string(),
                        }),
                    );
                    first_failure.get_or_insert(error);
                }
            }
        }

        if escalate_failures {
            if let Some(error) = first_failure {
                return Err(error);
            }
        }

        Ok(StepResult::success(&step.id, JsonValue::Object(aggregate), started_at))
    }

    async fn run_branch(self, branch: Branch, mut context: WorkflowContext) -> BranchOutcome {
        let mark = context.len();
        let result = self.run_sequence(&branch.steps, &mut context).await;
        BranchOutcome {
            branch_id: branch.id,
            result,
            context,
            mark,
        }
    }

    async fn run_conditional(
        &self,
        step: &WorkflowStep,
        condition: &str,
        if_true: &Branch,
        if_false: &Branch,
        context: &mut WorkflowContext,
    ) -> Result<StepResult> {
        let started_at = Utc::now();
        let value = context
            .resolve(condition)
            .map_err(|source| ExecutionError::Resolution {
                step_id: step.id.clone(),
                source,
            })?;

        let Some(take_true) = condition_value(&value) else {
            return Err(ExecutionError::InvalidCondition {
                step_id: step.id.clone(),
                value,
            });
        };

        let branch = if take_true { if_true } else { if_false };
        info!("Step {} condition is {}, taking {}", step.id, take_true, branch.id);

        let output = self.run_sequence(&branch.steps, context).await?;
        Ok(StepResult::success(&step.id, output, started_at).with_branch(&branch.id))
    }

    async fn run_switch(
        &self,
        step: &WorkflowStep,
        selector: &str,
        cases: &IndexMap<String, Branch>,
        default: Option<&Branch>,
        context: &mut WorkflowContext,
    ) -> Result<StepResult> {
        let started_at = Utc::now();
        let value = context
            .resolve(selector)
            .map_err(|source| ExecutionError::Resolution {
                step_id: step.id.clone(),
                source,
            })?;

        if value.is_object() || value.is_array() {
            return Err(ExecutionError::InvalidSelector {
                step_id: step.id.clone(),
                value,
            });
        }
        // Only strings can name a case; other scalars fall through to the default.
        let matched = value.as_str().and_then(|label| cases.get_key_value(label));

        let (label, branch) = match (matched, default) {
            (Some((label, branch)), _) => (label.as_str(), branch),
            (None, Some(branch)) => ("default", branch),
            (None, None) => {
                return Err(ExecutionError::UnmatchedSwitch {
                    step_id: step.id.clone(),
                    selector: value,
                })
            }
        };
        info!("Step {} selector {} matched case {}", step.id, value, label);

        let output = self.run_sequence(&branch.steps, context).await?;
        Ok(StepResult::success(&step.id, output, started_at).with_branch(label))
    }
}

/// Booleans, absent values and the strings "true"/"false" (any case) decide a condition.
fn condition_value(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(flag) => Some(*flag),
        JsonValue::Null => Some(false),
        JsonValue::String(text) if text.eq_ignore_ascii_case("true") => Some(true),
        JsonValue::String(text) if text.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_values() {
        assert_eq!(condition_value(&json!(true)), Some(true));
        assert_eq!(condition_value(&json!(false)), Some(false));
        assert_eq!(condition_value(&JsonValue::Null), Some(false));
        assert_eq!(condition_value(&json!("TRUE")), Some(true));
        assert_eq!(condition_value(&json!("False")), Some(false));
        assert_eq!(condition_value(&json!("yes")), None);
        assert_eq!(condition_value(&json!(1)), None);
        assert_eq!(condition_value(&json!({"a": 1})), None);
    }
}
