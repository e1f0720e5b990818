// ABOUTME: Capability provider seams: locating a provider and invoking one of its skills
// ABOUTME: Exports the locator and transport traits plus the built-in HTTP implementations

pub mod error;
pub mod locator;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub use error::{CapabilityError, Result};
pub use locator::{
    AgentCard, AgentCardLocator, CachingLocator, ChainLocator, DiscoveredSkill, SkillCard,
    StaticLocator,
};
pub use transport::{HttpTransport, DEFAULT_EXECUTE_PATH};

/// Where a capability provider can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityAddress(Url);

impl CapabilityAddress {
    pub fn parse(address: &str) -> Result<Self> {
        let url = Url::parse(address.trim()).map_err(|e| CapabilityError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            other => Err(CapabilityError::InvalidAddress {
                address: address.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Append `path` to the address, keeping any path prefix the address already has.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.0.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| CapabilityError::InvalidAddress {
            address: joined,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CapabilityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CapabilityAddress {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CapabilityAddress {
    type Error = CapabilityError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CapabilityAddress> for String {
    fn from(address: CapabilityAddress) -> Self {
        address.0.into()
    }
}

/// Maps a capability id to the provider that serves it.
#[async_trait]
pub trait CapabilityLocator: Send + Sync {
    /// `Ok(None)` means no provider is known for the capability.
    async fn locate(&self, capability_id: &str) -> Result<Option<CapabilityAddress>>;
}

/// Delivers one request to a capability provider and returns its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(
        &self,
        address: &CapabilityAddress,
        capability_id: &str,
        payload: &JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let address = CapabilityAddress::parse("http://localhost:8001").unwrap();
        assert_eq!(address.url().port(), Some(8001));
        assert!(CapabilityAddress::parse("not a url").is_err());
        assert!(CapabilityAddress::parse("ftp://host/x").is_err());
    }

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let root = CapabilityAddress::parse("http://localhost:8001").unwrap();
        assert_eq!(
            root.endpoint("/execute").unwrap().as_str(),
            "http://localhost:8001/execute"
        );

        let nested = CapabilityAddress::parse("https://agents.example.com/planner/").unwrap();
        assert_eq!(
            nested.endpoint("execute").unwrap().as_str(),
            "https://agents.example.com/planner/execute"
        );
    }

    #[test]
    fn test_address_serde() {
        let address: CapabilityAddress = serde_json::from_str("\"http://127.0.0.1:9000\"").unwrap();
        assert_eq!(serde_json::to_string(&address).unwrap(), "\"http://127.0.0.1:9000/\"");
        assert!(serde_json::from_str::<CapabilityAddress>("\"nope\"").is_err());
    }
}
