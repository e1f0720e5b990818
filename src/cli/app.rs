// ABOUTME: Main application orchestration for the pallet CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands::{self, RunRequest, WorkflowSource};
use super::{Args, Commands, Config};
use crate::registry::DefinitionKey;

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        // Logs go to stderr so stdout stays reserved for command output.
        match self.config.logging.format.as_str() {
            "json" => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            "compact" => {
                tracing_subscriber::fmt()
                    .compact()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .init();
            }
            _ => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .init();
            }
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting pallet v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        match args.command {
            Commands::Run {
                workflow,
                id,
                definition_version,
                namespace,
                input,
                input_file,
                vars,
                output,
            } => {
                let source = match (workflow, id) {
                    (Some(path), _) => WorkflowSource::File(path),
                    (None, Some(id)) => {
                        let namespace =
                            namespace.unwrap_or_else(|| self.config.registry.namespace.clone());
                        WorkflowSource::Registry(DefinitionKey::new(
                            namespace,
                            id,
                            definition_version,
                        ))
                    }
                    (None, None) => {
                        return Err(anyhow::anyhow!("Provide a workflow file or --id"));
                    }
                };
                let request = RunRequest {
                    source,
                    input,
                    input_file,
                    vars,
                    output,
                };
                commands::run_workflow(request, &self.config).await
            }

            Commands::Validate { workflow, strict } => {
                commands::validate_workflow(workflow, strict, &self.config).await
            }

            Commands::Skills => commands::list_skills(&self.config).await,
        }
    }

    /// Load configuration for already parsed arguments
    pub fn load(args: &Args) -> Result<Self> {
        let config = Config::load(args.config.clone())?;
        Ok(Self::new(config))
    }
}
