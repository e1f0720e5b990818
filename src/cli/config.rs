// ABOUTME: Configuration management for the pallet application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::capability::{CapabilityAddress, DEFAULT_EXECUTE_PATH};
use crate::engine::{EngineConfig, DEFAULT_MAX_RETRY_DELAY};
use crate::registry::DEFAULT_NAMESPACE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Static `skill id -> provider base url` table.
    #[serde(default)]
    pub capabilities: IndexMap<String, String>,

    /// Provider base urls whose agent cards are fetched for discovery.
    #[serde(default)]
    pub agents: Vec<String>,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub root: Option<PathBuf>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_execute_path")]
    pub execute_path: String,
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_retry_delay", with = "humantime_serde")]
    pub max_retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_execute_path() -> String {
    DEFAULT_EXECUTE_PATH.to_string()
}

fn default_max_retry_delay() -> Duration {
    DEFAULT_MAX_RETRY_DELAY
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: default_namespace(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            execute_path: default_execute_path(),
            connect_timeout: None,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retry_delay: default_max_retry_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid config {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.merge_env();
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("pallet.yaml"),
            PathBuf::from("pallet.yml"),
            PathBuf::from(".pallet.yaml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".pallet").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default path (may not exist)
        PathBuf::from("pallet.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) {
        if let Ok(root) = std::env::var("PALLET_REGISTRY_DIR") {
            self.registry.root = Some(PathBuf::from(root));
        }
        if let Ok(level) = std::env::var("PALLET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PALLET_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Parsed agent base urls.
    pub fn agent_addresses(&self) -> Result<Vec<CapabilityAddress>> {
        self.agents
            .iter()
            .map(|agent| {
                CapabilityAddress::parse(agent)
                    .with_context(|| format!("Invalid agent address '{}'", agent))
            })
            .collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_retry_delay: self.engine.max_retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.capabilities.is_empty());
        assert_eq!(config.registry.namespace, "workflows");
        assert_eq!(config.transport.execute_path, DEFAULT_EXECUTE_PATH);
        assert_eq!(config.engine.max_retry_delay, DEFAULT_MAX_RETRY_DELAY);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pallet.yaml");
        fs::write(
            &path,
            r#"
capabilities:
  summarize: http://localhost:8001
  translate: http://localhost:8002
agents:
  - http://localhost:9000
transport:
  connect_timeout: 2s
engine:
  max_retry_delay: 30s
"#,
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(
            config.capabilities.keys().collect::<Vec<_>>(),
            vec!["summarize", "translate"]
        );
        assert_eq!(config.agent_addresses().unwrap().len(), 1);
        assert_eq!(config.transport.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.transport.execute_path, DEFAULT_EXECUTE_PATH);
        assert_eq!(config.engine_config().max_retry_delay, Duration::from_secs(30));
        assert_eq!(config.registry.namespace, "workflows");
    }

    #[test]
    fn test_partial_logging_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pallet.yaml");
        fs::write(&path, "logging:\n  level: warn\n").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_invalid_agent_address() {
        let config = Config {
            agents: vec!["not a url".to_string()],
            ..Config::default()
        };
        assert!(config.agent_addresses().is_err());
    }
}
