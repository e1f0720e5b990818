// ABOUTME: Main library module for the pallet workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod capability;
pub mod cli;
pub mod engine;
pub mod parser;
pub mod registry;
pub mod template;

// Re-export commonly used types
pub use capability::{CapabilityAddress, CapabilityLocator, HttpTransport, StaticLocator, Transport};
pub use cli::{App, Args, Config};
pub use engine::{RunReport, RunStatus, StepResult, StepStatus, WorkflowContext, WorkflowEngine};
pub use parser::{WorkflowDefinition, WorkflowParser, WorkflowStep, WorkflowValidator};
pub use registry::{DefinitionKey, DefinitionRegistry, DirectoryRegistry, InMemoryRegistry};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
