//! Agent discovery client and capability registry
//!
//! Fetches each candidate endpoint's agent card from the well-known path,
//! validates it, and builds an in-memory capability → binding catalog.
//! One unreachable endpoint never fails discovery as a whole; it is
//! excluded and recorded as a warning.

use crate::error::OrchestrationError;
use crate::models::{
    AgentCard, CapabilityBinding, DiscoveryWarning, WELL_KNOWN_CARD_PATH,
};
use crate::Result;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bound on a single card fetch
pub const DEFAULT_CARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound applied to each task invocation of a discovered binding
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

//
// ================= Registry =================
//

/// Read-only catalog of discovered capabilities.
///
/// Supports multiple bindings per capability; the pipeline resolves to
/// the first binding in endpoint order. Rebuilt wholesale on
/// re-discovery, never patched in place.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Registry {
    bindings: HashMap<String, Vec<CapabilityBinding>>,
    warnings: Vec<DiscoveryWarning>,
}

impl Registry {
    /// Build a registry directly from known bindings (no discovery pass)
    pub fn with_bindings(bindings: impl IntoIterator<Item = CapabilityBinding>) -> Self {
        let mut registry = Self::default();
        for binding in bindings {
            registry.insert(binding);
        }
        registry
    }

    fn insert(&mut self, binding: CapabilityBinding) {
        self.bindings
            .entry(binding.capability_id.clone())
            .or_default()
            .push(binding);
    }

    fn warn(&mut self, endpoint: &str, reason: String) {
        warn!(endpoint = %endpoint, reason = %reason, "Endpoint excluded from discovery");
        self.warnings.push(DiscoveryWarning {
            endpoint: endpoint.to_string(),
            reason,
        });
    }

    /// First binding for a capability, in endpoint order
    pub fn resolve(&self, capability: &str) -> Option<&CapabilityBinding> {
        self.bindings.get(capability).and_then(|b| b.first())
    }

    /// All bindings for a capability
    pub fn bindings_for(&self, capability: &str) -> &[CapabilityBinding] {
        self.bindings
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sorted list of discovered capability identifiers
    pub fn capabilities(&self) -> Vec<&str> {
        let mut caps: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        caps.sort_unstable();
        caps
    }

    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Fail-fast check that every required capability has at least one
    /// binding; names every missing capability in the error.
    pub fn require_all(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|cap| self.resolve(cap).is_none())
            .copied()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestrationError::DiscoveryIncomplete(missing.join(", ")))
        }
    }
}

//
// ================= Shared Registry =================
//

/// Registry handle shared across concurrent pipeline runs.
///
/// Reads clone the inner `Arc` out, so the lock is held only for the
/// pointer swap; re-discovery replaces the whole registry atomically.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<Registry>>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub async fn load(&self) -> Arc<Registry> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, registry: Registry) {
        let mut guard = self.inner.write().await;
        *guard = Arc::new(registry);
    }
}

//
// ================= Discovery Client =================
//

/// Fetches agent cards and builds registries (connection-pooled)
pub struct DiscoveryClient {
    client: Client,
    card_timeout: Duration,
    task_timeout: Duration,
}

impl DiscoveryClient {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CARD_TIMEOUT, DEFAULT_TASK_TIMEOUT)
    }

    pub fn with_timeouts(card_timeout: Duration, task_timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            card_timeout,
            task_timeout,
        }
    }

    /// Discover all reachable endpoints and build a registry.
    ///
    /// Read-only against remote state; repeated calls against the same
    /// reachable endpoint set yield equal registries. Fetch and
    /// validation failures exclude the offending endpoint only.
    pub async fn discover(&self, endpoints: &[String]) -> Registry {
        let mut registry = Registry::default();

        for endpoint in endpoints {
            match self.fetch_card(endpoint).await {
                Ok(card) => {
                    debug!(
                        agent = %card.name,
                        endpoint = %card.endpoint,
                        capabilities = ?card.capabilities,
                        "Agent card fetched"
                    );
                    for capability in &card.capabilities {
                        registry.insert(CapabilityBinding {
                            capability_id: capability.clone(),
                            agent_name: card.name.clone(),
                            agent_endpoint: card.endpoint.clone(),
                            timeout: self.task_timeout,
                        });
                    }
                }
                Err(e) => registry.warn(endpoint, e.to_string()),
            }
        }

        info!(
            capabilities = ?registry.capabilities(),
            warnings = registry.warnings().len(),
            "Discovery pass complete"
        );

        registry
    }

    /// Fetch and validate one agent card
    pub async fn fetch_card(&self, endpoint: &str) -> Result<AgentCard> {
        let url = format!(
            "{}{}",
            endpoint.trim_end_matches('/'),
            WELL_KNOWN_CARD_PATH
        );

        let response = self
            .client
            .get(&url)
            .timeout(self.card_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestrationError::InvalidAgentCard(format!(
                "card fetch from {} returned {}",
                url, status
            )));
        }

        let card: AgentCard = response.json().await.map_err(|e| {
            OrchestrationError::InvalidAgentCard(format!("unparsable card from {}: {}", url, e))
        })?;

        card.validate()?;
        Ok(card)
    }
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new()
    }
}
