// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for pallet

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::registry::DEFAULT_VERSION;

#[derive(Parser)]
#[command(name = "pallet")]
#[command(about = "Run declarative workflows against capability providers")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow from a file or from the definition registry
    Run {
        #[arg(
            help = "Path to workflow YAML file",
            required_unless_present = "id",
            conflicts_with = "id"
        )]
        workflow: Option<PathBuf>,

        #[arg(long, help = "Workflow id to load from the registry")]
        id: Option<String>,

        #[arg(long = "version", default_value = DEFAULT_VERSION, help = "Registry version")]
        definition_version: String,

        #[arg(long, help = "Registry namespace (defaults to the configured namespace)")]
        namespace: Option<String>,

        #[arg(long, help = "Workflow input as a JSON document", conflicts_with = "input_file")]
        input: Option<String>,

        #[arg(long, help = "Read workflow input from a JSON or YAML file")]
        input_file: Option<PathBuf>,

        #[arg(
            short = 'V',
            long = "var",
            help = "Set a top-level input field (key=value)"
        )]
        vars: Vec<String>,

        #[arg(short, long, help = "Write the run report as JSON to this path")]
        output: Option<PathBuf>,
    },

    /// Validate a workflow file without executing
    Validate {
        #[arg(help = "Path to workflow YAML file")]
        workflow: PathBuf,

        #[arg(long, help = "Treat reference warnings as errors")]
        strict: bool,
    },

    /// List the skills offered by configured and discovered providers
    Skills,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse variables from key=value format
    pub fn parse_variables(vars: &[String]) -> anyhow::Result<HashMap<String, String>> {
        let mut variables = HashMap::new();

        for var in vars {
            match var.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    variables.insert(key.trim().to_string(), value.to_string());
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid variable format '{}'. Expected 'key=value'",
                        var
                    ));
                }
            }
        }

        Ok(variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variables() {
        let vars = vec![
            "env=production".to_string(),
            "query=a=b".to_string(),
            "debug=true".to_string(),
        ];

        let parsed = Args::parse_variables(&vars).unwrap();

        assert_eq!(parsed.get("env"), Some(&"production".to_string()));
        assert_eq!(parsed.get("query"), Some(&"a=b".to_string()));
        assert_eq!(parsed.get("debug"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_variables_invalid() {
        assert!(Args::parse_variables(&["invalid_format".to_string()]).is_err());
        assert!(Args::parse_variables(&["=value".to_string()]).is_err());
    }

    #[test]
    fn test_run_from_registry_id() {
        let args = Args::try_parse_from(["pallet", "run", "--id", "report", "--var", "a=1"]).unwrap();
        match args.command {
            Commands::Run {
                workflow,
                id,
                definition_version,
                namespace,
                vars,
                ..
            } => {
                assert!(workflow.is_none());
                assert_eq!(id.as_deref(), Some("report"));
                assert_eq!(definition_version, "v1");
                assert!(namespace.is_none());
                assert_eq!(vars, vec!["a=1".to_string()]);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_requires_a_source() {
        assert!(Args::try_parse_from(["pallet", "run"]).is_err());
        assert!(Args::try_parse_from(["pallet", "run", "flow.yaml", "--id", "x"]).is_err());
    }
}
