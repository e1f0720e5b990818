// ABOUTME: Filesystem-backed definition registry
// ABOUTME: Stores definitions at <root>/<namespace>/<id>/<version>.yaml

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::error::{RegistryError, Result};
use super::{DefinitionKey, DefinitionRegistry};

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidate(&self, key: &DefinitionKey, extension: &str) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(&key.id)
            .join(format!("{}.{}", key.version, extension))
    }

    /// Write a definition, creating directories as needed.
    pub async fn publish(&self, key: &DefinitionKey, bytes: &[u8]) -> Result<PathBuf> {
        key.validate()?;
        let path = self.candidate(key, EXTENSIONS[0]);
        let io_error = |source| RegistryError::IoError {
            key: key.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&path, bytes).await.map_err(io_error)?;
        debug!("Published {} to {}", key, path.display());
        Ok(path)
    }
}

#[async_trait]
impl DefinitionRegistry for DirectoryRegistry {
    async fn fetch(&self, key: &DefinitionKey) -> Result<Vec<u8>> {
        key.validate()?;
        for extension in EXTENSIONS {
            let path = self.candidate(key, extension);
            match fs::read(&path).await {
                Ok(bytes) => {
                    debug!("Loaded {} from {}", key, path.display());
                    return Ok(bytes);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(RegistryError::IoError {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
        Err(RegistryError::NotFound(key.clone()))
    }
}
