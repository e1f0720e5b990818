// ABOUTME: Workflow execution engine module for pallet
// ABOUTME: Handles run lifecycle, step execution, retries and result aggregation

pub mod context;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod state;

pub use context::WorkflowContext;
pub use error::{ExecutionError, Result, StepError};
pub use executor::{StepExecutor, StepOutcome};
pub use orchestrator::{EngineConfig, WorkflowEngine};
pub use result::{RunFailure, RunReport, RunSummary, StepResult, StepStatus};
pub use retry::{RetryPolicy, DEFAULT_MAX_RETRY_DELAY};
pub use state::{RunState, RunStatus};
