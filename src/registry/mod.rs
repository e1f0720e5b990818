// ABOUTME: Workflow definition registries keyed by namespace, id and version
// ABOUTME: Exports the registry trait plus in-memory and directory-backed implementations

pub mod directory;
pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

pub use directory::DirectoryRegistry;
pub use error::{RegistryError, Result};

use crate::parser::WorkflowDefinition;

pub const DEFAULT_NAMESPACE: &str = "workflows";
pub const DEFAULT_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionKey {
    pub namespace: String,
    pub id: String,
    pub version: String,
}

impl DefinitionKey {
    pub fn new(
        namespace: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            version: version.into(),
        }
    }

    /// Key in the default namespace at the default version.
    pub fn latest(id: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, id, DEFAULT_VERSION)
    }

    /// Reject components that could escape a storage root.
    pub fn validate(&self) -> Result<()> {
        for component in [&self.namespace, &self.id, &self.version] {
            let valid = !component.is_empty()
                && component != "."
                && component != ".."
                && component
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
            if !valid {
                return Err(RegistryError::InvalidKey {
                    component: component.clone(),
                    reason: "use letters, digits, '_', '-' or '.'".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.id, self.version)
    }
}

/// Read access to stored workflow definitions.
#[async_trait]
pub trait DefinitionRegistry: Send + Sync {
    /// Raw definition bytes for `key`.
    async fn fetch(&self, key: &DefinitionKey) -> Result<Vec<u8>>;
}

/// Fetch and parse a definition.
pub async fn load_definition(
    registry: &dyn DefinitionRegistry,
    key: &DefinitionKey,
) -> Result<WorkflowDefinition> {
    let bytes = registry.fetch(key).await?;
    Ok(WorkflowDefinition::from_bytes(&bytes)?)
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<DefinitionKey, Vec<u8>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, key: DefinitionKey, bytes: impl Into<Vec<u8>>) -> Result<()> {
        key.validate()?;
        self.entries.write().await.insert(key, bytes.into());
        Ok(())
    }
}

#[async_trait]
impl DefinitionRegistry for InMemoryRegistry {
    async fn fetch(&self, key: &DefinitionKey) -> Result<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = "metadata: {id: hello, name: Hello, version: v1}\nsteps:\n  - id: greet\n    skill: greeter\n";

    #[test]
    fn test_key_display_and_defaults() {
        let key = DefinitionKey::latest("hello");
        assert_eq!(key.to_string(), "workflows/hello:v1");
    }

    #[test]
    fn test_key_validation() {
        assert!(DefinitionKey::new("workflows", "hello", "v1.2").validate().is_ok());
        assert!(DefinitionKey::new("workflows", "../etc", "v1").validate().is_err());
        assert!(DefinitionKey::new("workflows", "hello", "..").validate().is_err());
        assert!(DefinitionKey::new("", "hello", "v1").validate().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_publish_and_load() {
        let registry = InMemoryRegistry::new();
        let key = DefinitionKey::latest("hello");
        registry.publish(key.clone(), DEFINITION).await.unwrap();

        let definition = load_definition(&registry, &key).await.unwrap();
        assert_eq!(definition.metadata.id, "hello");

        let missing = DefinitionKey::new("workflows", "hello", "v2");
        let err = registry.fetch(&missing).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(k) if k == missing));
    }

    #[tokio::test]
    async fn test_invalid_definition_surfaces_as_definition_error() {
        let registry = InMemoryRegistry::new();
        let key = DefinitionKey::latest("broken");
        registry.publish(key.clone(), "metadata: {id: x}\n").await.unwrap();

        let err = load_definition(&registry, &key).await.unwrap_err();
        assert!(matches!(err, RegistryError::DefinitionError(_)));
    }
}
