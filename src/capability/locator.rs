// ABOUTME: Capability locators: static tables, agent-card discovery, chaining and per-run caching
// ABOUTME: Each resolves a capability id to the address of the provider that serves it

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::error::{CapabilityError, Result};
use super::{CapabilityAddress, CapabilityLocator};

/// Fixed capability table, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    entries: IndexMap<String, CapabilityAddress>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capability(mut self, capability_id: impl Into<String>, address: CapabilityAddress) -> Self {
        self.insert(capability_id, address);
        self
    }

    pub fn insert(&mut self, capability_id: impl Into<String>, address: CapabilityAddress) {
        self.entries.insert(capability_id.into(), address);
    }

    pub fn from_table<'a, I>(table: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut locator = Self::new();
        for (capability_id, address) in table {
            locator.insert(capability_id.clone(), CapabilityAddress::parse(address)?);
        }
        Ok(locator)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = (&str, &CapabilityAddress)> {
        self.entries.iter().map(|(id, address)| (id.as_str(), address))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CapabilityLocator for StaticLocator {
    async fn locate(&self, capability_id: &str) -> Result<Option<CapabilityAddress>> {
        Ok(self.entries.get(capability_id).cloned())
    }
}

/// Tries each locator in order; the first that knows the capability wins.
#[derive(Default)]
pub struct ChainLocator {
    locators: Vec<Arc<dyn CapabilityLocator>>,
}

impl ChainLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: Arc<dyn CapabilityLocator>) -> Self {
        self.locators.push(locator);
        self
    }
}

#[async_trait]
impl CapabilityLocator for ChainLocator {
    async fn locate(&self, capability_id: &str) -> Result<Option<CapabilityAddress>> {
        for locator in &self.locators {
            if let Some(address) = locator.locate(capability_id).await? {
                return Ok(Some(address));
            }
        }
        Ok(None)
    }
}

/// Memoizes successful lookups for the lifetime of one run.
pub struct CachingLocator {
    inner: Arc<dyn CapabilityLocator>,
    cache: RwLock<HashMap<String, CapabilityAddress>>,
}

impl CachingLocator {
    pub fn new(inner: Arc<dyn CapabilityLocator>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CapabilityLocator for CachingLocator {
    async fn locate(&self, capability_id: &str) -> Result<Option<CapabilityAddress>> {
        if let Some(address) = self.cache.read().await.get(capability_id) {
            return Ok(Some(address.clone()));
        }

        let located = self.inner.locate(capability_id).await?;
        if let Some(address) = &located {
            debug!("Caching provider {} for capability {}", address, capability_id);
            self.cache
                .write()
                .await
                .insert(capability_id.to_string(), address.clone());
        }
        Ok(located)
    }
}

/// Self-description served by a provider at `GET {base}/agent-card`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skills: Vec<SkillCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCard {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<JsonValue>,
    #[serde(default)]
    pub output_schema: Option<JsonValue>,
}

/// A skill found during discovery along with the agent that serves it.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredSkill {
    pub agent: String,
    pub address: CapabilityAddress,
    pub skill: SkillCard,
}

const AGENT_CARD_PATH: &str = "agent-card";
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovers capabilities by fetching the agent card of each configured provider once.
pub struct AgentCardLocator {
    client: reqwest::Client,
    agents: Vec<CapabilityAddress>,
    skills: OnceCell<IndexMap<String, DiscoveredSkill>>,
}

impl AgentCardLocator {
    pub fn new(agents: Vec<CapabilityAddress>) -> Self {
        Self::with_client(reqwest::Client::new(), agents)
    }

    pub fn with_client(client: reqwest::Client, agents: Vec<CapabilityAddress>) -> Self {
        Self {
            client,
            agents,
            skills: OnceCell::new(),
        }
    }

    pub fn agents(&self) -> &[CapabilityAddress] {
        &self.agents
    }

    async fn fetch_card(&self, agent: &CapabilityAddress) -> Result<AgentCard> {
        let url = agent.endpoint(AGENT_CARD_PATH)?;
        let response = self.client.get(url).timeout(DISCOVERY_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json::<AgentCard>().await?)
    }

    async fn discover(&self) -> Result<IndexMap<String, DiscoveredSkill>> {
        let mut skills = IndexMap::new();
        for agent in &self.agents {
            let card = match self.fetch_card(agent).await {
                Ok(card) => card,
                Err(e) => {
                    warn!("Skipping agent {}: {}", agent, e);
                    continue;
                }
            };

            // Cards may advertise a public url different from the one used to fetch them.
            let address = match card.url.as_deref().map(CapabilityAddress::parse) {
                Some(Ok(address)) => address,
                Some(Err(e)) => {
                    warn!("Agent {} advertises an invalid url, using {}: {}", card.name, agent, e);
                    agent.clone()
                }
                None => agent.clone(),
            };

            info!("Discovered agent {} with {} skills", card.name, card.skills.len());
            for skill in card.skills {
                skills.entry(skill.id.clone()).or_insert_with(|| DiscoveredSkill {
                    agent: card.name.clone(),
                    address: address.clone(),
                    skill,
                });
            }
        }

        if skills.is_empty() && !self.agents.is_empty() {
            return Err(CapabilityError::Discovery(
                "no skills discovered from any configured agent".to_string(),
            ));
        }
        Ok(skills)
    }

    /// All discovered skills, fetching agent cards on first use.
    pub async fn skills(&self) -> Result<&IndexMap<String, DiscoveredSkill>> {
        self.skills.get_or_try_init(|| self.discover()).await
    }
}

#[async_trait]
impl CapabilityLocator for AgentCardLocator {
    async fn locate(&self, capability_id: &str) -> Result<Option<CapabilityAddress>> {
        if self.agents.is_empty() {
            return Ok(None);
        }
        Ok(self
            .skills()
            .await?
            .get(capability_id)
            .map(|found| found.address.clone()))
    }
}
