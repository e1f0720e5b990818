// ABOUTME: Primitive step executor: resolve inputs, locate the provider, invoke with a deadline
// ABOUTME: Always yields a StepResult; failures are recorded on the result rather than raised

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::context::WorkflowContext;
use super::error::StepError;
use super::result::StepResult;
use crate::capability::{CapabilityError, CapabilityLocator, Transport};
use crate::parser::{StepKind, WorkflowStep};

/// A step's result together with the inputs it was invoked with.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    pub inputs: JsonValue,
}

pub struct StepExecutor {
    locator: Arc<dyn CapabilityLocator>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor").finish()
    }
}

impl StepExecutor {
    pub fn new(locator: Arc<dyn CapabilityLocator>, transport: Arc<dyn Transport>) -> Self {
        Self { locator, transport }
    }

    /// Run one primitive step against the current context.
    #[instrument(skip(self, step, context, cancel), fields(step_id = %step.id))]
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        context: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let started_at = Utc::now();

        let StepKind::Primitive {
            capability_id,
            inputs,
        } = &step.kind
        else {
            let error = StepError::Unsupported {
                step_type: step.type_name().to_string(),
            };
            return StepOutcome {
                result: StepResult::failure(&step.id, error, started_at),
                inputs: JsonValue::Null,
            };
        };

        let resolved = match context.resolve_inputs(inputs) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Step {} could not resolve its inputs: {}", step.id, e);
                return StepOutcome {
                    result: StepResult::failure(&step.id, e.into(), started_at),
                    inputs: inputs.clone(),
                };
            }
        };

        let result = match self.invoke(step, capability_id, &resolved, cancel).await {
            Ok(output) => {
                info!("Step {} completed via {}", step.id, capability_id);
                StepResult::success(&step.id, output, started_at)
            }
            Err(error) => {
                warn!("Step {} failed: {}", step.id, error);
                StepResult::failure(&step.id, error, started_at)
            }
        };

        StepOutcome {
            result,
            inputs: resolved,
        }
    }

    /// Discovery and invocation share one deadline of `step.timeout`.
    async fn invoke(
        &self,
        step: &WorkflowStep,
        capability_id: &str,
        payload: &JsonValue,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, StepError> {
        let deadline = Instant::now() + step.timeout;
        let timed_out = || StepError::Timeout {
            timeout: step.timeout,
        };

        let located = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            located = timeout_at(deadline, self.locator.locate(capability_id)) => {
                located.map_err(|_| timed_out())?
            }
        };

        let address = match located {
            Ok(Some(address)) => address,
            Ok(None) => {
                return Err(StepError::CapabilityNotFound {
                    capability_id: capability_id.to_string(),
                })
            }
            Err(e) => {
                return Err(StepError::Transport {
                    message: format!("discovery failed: {}", e),
                })
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        debug!(
            "Invoking {} at {} with {:?} of {:?} remaining",
            capability_id, address, remaining, step.timeout
        );

        let call = self
            .transport
            .invoke(&address, capability_id, payload, remaining);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            outcome = timeout_at(deadline, call) => match outcome {
                Err(_) | Ok(Err(CapabilityError::Timeout(_))) => Err(timed_out()),
                Ok(Err(e)) => Err(StepError::Transport {
                    message: e.to_string(),
                }),
                Ok(Ok(output)) => Ok(output),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityAddress, StaticLocator};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTransport {
        delay: Duration,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn invoke(
            &self,
            _address: &CapabilityAddress,
            capability_id: &str,
            payload: &JsonValue,
            _timeout: Duration,
        ) -> crate::capability::Result<JsonValue> {
            tokio::time::sleep(self.delay).await;
            if capability_id == "broken" {
                return Err(CapabilityError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(json!({ "echo": payload }))
        }
    }

    fn executor(delay: Duration) -> StepExecutor {
        let address = CapabilityAddress::parse("http://agent.local").unwrap();
        let locator = StaticLocator::new()
            .with_capability("echo", address.clone())
            .with_capability("broken", address);
        StepExecutor::new(Arc::new(locator), Arc::new(EchoTransport { delay }))
    }

    fn primitive(id: &str, skill: &str, inputs: JsonValue, timeout: Duration) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            timeout,
            kind: StepKind::Primitive {
                capability_id: skill.to_string(),
                inputs,
            },
        }
    }

    #[tokio::test]
    async fn test_successful_invocation_resolves_inputs() {
        let executor = executor(Duration::ZERO);
        let context = WorkflowContext::new(json!({"name": "pallet"}));
        let step = primitive(
            "greet",
            "echo",
            json!({"who": "{{ workflow.input.name }}"}),
            Duration::from_secs(5),
        );

        let outcome = executor.execute(&step, &context, &CancellationToken::new()).await;
        assert!(outcome.result.is_successful());
        assert_eq!(outcome.inputs, json!({"who": "pallet"}));
        assert_eq!(outcome.result.output, json!({"echo": {"who": "pallet"}}));
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let executor = executor(Duration::ZERO);
        let step = primitive("x", "missing", json!({}), Duration::from_secs(5));
        let outcome = executor
            .execute(&step, &WorkflowContext::default(), &CancellationToken::new())
            .await;
        assert_eq!(
            outcome.result.error,
            Some(StepError::CapabilityNotFound {
                capability_id: "missing".into()
            })
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded() {
        let executor = executor(Duration::ZERO);
        let step = primitive("x", "broken", json!({}), Duration::from_secs(5));
        let outcome = executor
            .execute(&step, &WorkflowContext::default(), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.result.error, Some(StepError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let executor = executor(Duration::from_secs(10));
        let step = primitive("slow", "echo", json!({}), Duration::from_millis(50));
        let started = std::time::Instant::now();
        let outcome = executor
            .execute(&step, &WorkflowContext::default(), &CancellationToken::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(outcome.result.error, Some(StepError::Timeout { .. })));
    }

    struct SlowLocator;

    #[async_trait]
    impl CapabilityLocator for SlowLocator {
        async fn locate(
            &self,
            _capability_id: &str,
        ) -> crate::capability::Result<Option<CapabilityAddress>> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(Some(CapabilityAddress::parse("http://agent.local")?))
        }
    }

    #[tokio::test]
    async fn test_deadline_covers_discovery() {
        let executor = StepExecutor::new(
            Arc::new(SlowLocator),
            Arc::new(EchoTransport {
                delay: Duration::ZERO,
            }),
        );
        let step = primitive("slow", "echo", json!({}), Duration::from_millis(100));
        let started = std::time::Instant::now();
        let outcome = executor
            .execute(&step, &WorkflowContext::default(), &CancellationToken::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            outcome.result.error,
            Some(StepError::Timeout {
                timeout: Duration::from_millis(100)
            })
        );
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_invocation() {
        let executor = executor(Duration::from_secs(10));
        let step = primitive("slow", "echo", json!({}), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = executor.execute(&step, &WorkflowContext::default(), &cancel).await;
        assert_eq!(outcome.result.error, Some(StepError::Cancelled));
    }

    #[tokio::test]
    async fn test_reference_to_uncommitted_step() {
        let executor = executor(Duration::ZERO);
        let step = primitive(
            "x",
            "echo",
            json!({"v": "{{ steps.later.outputs.value }}"}),
            Duration::from_secs(5),
        );
        let outcome = executor
            .execute(&step, &WorkflowContext::default(), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.result.error, Some(StepError::Reference { .. })));
        assert_eq!(outcome.inputs, json!({"v": "{{ steps.later.outputs.value }}"}));
    }
}
