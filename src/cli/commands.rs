// ABOUTME: Command implementations for the pallet CLI
// ABOUTME: Handles execution of the run, validate and skills commands

use anyhow::{Context, Result};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::args::Args;
use super::config::Config;
use crate::capability::{
    AgentCardLocator, CapabilityLocator, ChainLocator, HttpTransport, StaticLocator,
};
use crate::engine::{RunReport, WorkflowEngine};
use crate::parser::{WorkflowParser, WorkflowValidator};
use crate::registry::{self, DefinitionKey, DirectoryRegistry};

/// Where the definition for a run comes from.
#[derive(Debug, Clone)]
pub enum WorkflowSource {
    File(PathBuf),
    Registry(DefinitionKey),
}

/// Everything `pallet run` needs besides the configuration.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: WorkflowSource,
    pub input: Option<String>,
    pub input_file: Option<PathBuf>,
    pub vars: Vec<String>,
    pub output: Option<PathBuf>,
}

/// Execute a workflow command
pub async fn run_workflow(request: RunRequest, config: &Config) -> Result<()> {
    let input = build_input(
        request.input.as_deref(),
        request.input_file.as_deref(),
        &request.vars,
    )
    .await?;

    let definition = match &request.source {
        WorkflowSource::File(path) => {
            info!("Loading workflow from {}", path.display());
            WorkflowParser::new()
                .parse_file(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to parse workflow: {}", e))?
        }
        WorkflowSource::Registry(key) => {
            let root = config.registry.root.as_ref().ok_or_else(|| {
                anyhow::anyhow!("No registry root configured; set registry.root or PALLET_REGISTRY_DIR")
            })?;
            info!("Loading workflow {} from {}", key, root.display());
            registry::load_definition(&DirectoryRegistry::new(root), key)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load workflow: {}", e))?
        }
    };

    let locators = build_locator(config)?;
    let engine = WorkflowEngine::new(locators.chain, Arc::new(build_transport(config)?))
        .with_config(config.engine_config());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let report = engine
        .run_with_cancellation(&definition, input, cancel)
        .await;
    signal_task.abort();

    print_report(&report);

    if let Some(output_path) = request.output {
        let json_content = serde_json::to_string_pretty(&report)
            .context("Failed to serialize run report to JSON")?;
        tokio::fs::write(&output_path, json_content)
            .await
            .with_context(|| format!("Failed to write output file '{}'", output_path.display()))?;
        info!("Run report written to: {}", output_path.display());
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Workflow '{}' finished with status: {}",
            report.workflow.id,
            report.status
        ))
    }
}

/// Validate a workflow file
pub async fn validate_workflow(workflow_path: PathBuf, strict: bool, _config: &Config) -> Result<()> {
    info!("Validating workflow: {}", workflow_path.display());

    let definition = WorkflowParser::new()
        .parse_file(&workflow_path)
        .await
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;

    let report = WorkflowValidator::new()
        .with_strict_mode(strict)
        .validate(&definition)
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;

    for error in &report.errors {
        println!("  error: {}", error);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }

    if !report.is_valid {
        return Err(anyhow::anyhow!(
            "Workflow '{}' is invalid ({} errors, {} warnings)",
            definition.metadata.id,
            report.errors.len(),
            report.warnings.len()
        ));
    }

    println!("✓ Workflow '{}' is valid", definition.metadata.id);
    println!("  Steps: {}", definition.all_steps().len());
    println!("  Warnings: {}", report.warnings.len());
    Ok(())
}

/// List statically configured and discovered skills
pub async fn list_skills(config: &Config) -> Result<()> {
    let locators = build_locator(config)?;

    if locators.configured.is_empty() && locators.discovery.is_none() {
        println!("No capabilities or agents configured");
        return Ok(());
    }

    for (skill, address) in locators.configured.capabilities() {
        println!("{:<24} {}  (configured)", skill, address);
    }

    if let Some(discovery) = &locators.discovery {
        let skills = discovery
            .skills()
            .await
            .map_err(|e| anyhow::anyhow!("Skill discovery failed: {}", e))?;
        for (skill, found) in skills {
            let description = found.skill.description.as_deref().unwrap_or("");
            println!("{:<24} {}  ({}) {}", skill, found.address, found.agent, description);
        }
    }

    Ok(())
}

/// The locator chain handed to the engine plus its parts.
pub struct Locators {
    pub chain: Arc<dyn CapabilityLocator>,
    pub configured: Arc<StaticLocator>,
    pub discovery: Option<Arc<AgentCardLocator>>,
}

/// Static table first, then agent-card discovery when agents are configured.
pub fn build_locator(config: &Config) -> Result<Locators> {
    let configured = Arc::new(
        StaticLocator::from_table(&config.capabilities)
            .map_err(|e| anyhow::anyhow!("Invalid capability table: {}", e))?,
    );
    let mut chain = ChainLocator::new().with(configured.clone());

    let agents = config.agent_addresses()?;
    let discovery = if agents.is_empty() {
        None
    } else {
        let discovery = Arc::new(AgentCardLocator::new(agents));
        chain = chain.with(discovery.clone());
        Some(discovery)
    };

    Ok(Locators {
        chain: Arc::new(chain),
        configured,
        discovery,
    })
}

fn build_transport(config: &Config) -> Result<HttpTransport> {
    let transport = match config.transport.connect_timeout {
        Some(timeout) => HttpTransport::with_connect_timeout(timeout)?,
        None => HttpTransport::new(),
    };
    Ok(transport.with_execute_path(config.transport.execute_path.clone()))
}

/// Assemble the run input from `--input`, `--input-file` and `--var` overrides.
pub async fn build_input(
    inline: Option<&str>,
    file: Option<&Path>,
    vars: &[String],
) -> Result<JsonValue> {
    let mut input = match (inline, file) {
        (Some(text), _) => {
            serde_json::from_str(text).context("--input is not a valid JSON document")?
        }
        (None, Some(path)) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            // YAML is a superset of JSON so one parser covers both.
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid input file {}", path.display()))?
        }
        (None, None) => JsonValue::Null,
    };

    let variables = Args::parse_variables(vars)?;
    if variables.is_empty() {
        return Ok(input);
    }

    if input.is_null() {
        input = JsonValue::Object(Map::new());
    }
    let fields = input
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("--var requires the workflow input to be an object"))?;
    for (key, value) in variables {
        fields.insert(key, JsonValue::String(value));
    }
    Ok(input)
}

fn print_report(report: &RunReport) {
    println!(
        "Workflow '{}' (run {}) finished with status: {}",
        report.workflow.id, report.run_id, report.status
    );

    for result in report.context.results() {
        match &result.error {
            Some(error) => println!("  Step '{}': {} ({})", result.step_id, result.status, error),
            None => println!("  Step '{}': {}", result.step_id, result.status),
        }
    }

    if let Some(failure) = &report.failure {
        println!("  Failure: {}", failure.detail);
    }
    if let Some(output) = report.final_output() {
        println!("  Output: {}", output);
    }
}
