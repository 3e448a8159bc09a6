//! Provider capabilities, profiles, and the static registry
//!
//! The registry is built once at startup and injected into the engine. Its
//! capability data never changes after construction; only the liveness cache
//! (a separate component) is mutable at runtime.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::GenerationProvider;
use crate::error::{PoiesisError, Result};

/// Closed set of generation capabilities a phase can ask for.
///
/// The `agent` field of a phase config resolves to one of these at
/// validation time; unknown capability strings fail validation before any
/// execution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Background research and outline gathering
    Research,
    /// Prose generation (draft and refine phases)
    Content,
    /// Quality assessment producing a score and feedback
    Assess,
    /// Image generation
    Image,
    /// Final formatting for publication
    Publish,
}

impl Capability {
    /// All known capabilities
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Research,
            Capability::Content,
            Capability::Assess,
            Capability::Image,
            Capability::Publish,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Research => "research",
            Capability::Content => "content",
            Capability::Assess => "assess",
            Capability::Image => "image",
            Capability::Publish => "publish",
        }
    }
}

impl FromStr for Capability {
    type Err = PoiesisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "research" => Ok(Capability::Research),
            "content" => Ok(Capability::Content),
            "assess" => Ok(Capability::Assess),
            "image" => Ok(Capability::Image),
            "publish" => Ok(Capability::Publish),
            other => Err(PoiesisError::Configuration(format!(
                "unknown agent capability: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptor of a generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Unique provider identifier
    pub provider_id: String,

    /// Capabilities this provider serves well
    pub capabilities: HashSet<Capability>,

    /// Relative cost (0.0 = free, higher = more expensive per call)
    pub cost_weight: f32,

    /// Relative latency (0.0 = instant, higher = slower)
    pub latency_weight: f32,

    /// Zero-cost local inference vs. metered remote
    pub is_local: bool,
}

impl ModelProfile {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            capabilities: HashSet::new(),
            cost_weight: 0.5,
            latency_weight: 0.5,
            is_local: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_cost_weight(mut self, cost: f32) -> Self {
        self.cost_weight = cost.max(0.0);
        self
    }

    pub fn with_latency_weight(mut self, latency: f32) -> Self {
        self.latency_weight = latency.max(0.0);
        self
    }

    pub fn local(mut self) -> Self {
        self.is_local = true;
        self.cost_weight = 0.0;
        self
    }

    /// Whether this provider serves the given capability
    pub fn serves(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Static catalog of providers, their profiles, and their handles.
///
/// Read-mostly and shared across all concurrent executions. Built once,
/// injected into the router at construction.
pub struct ProviderRegistry {
    profiles: HashMap<String, ModelProfile>,
    handles: HashMap<String, Arc<dyn GenerationProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.profiles.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    /// Register a provider with its profile.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider with the same id is already registered
    /// or the profile declares no capabilities.
    pub fn register(
        &mut self,
        profile: ModelProfile,
        provider: Arc<dyn GenerationProvider>,
    ) -> Result<()> {
        if profile.capabilities.is_empty() {
            return Err(PoiesisError::Configuration(format!(
                "provider '{}' declares no capabilities",
                profile.provider_id
            )));
        }
        if self.profiles.contains_key(&profile.provider_id) {
            return Err(PoiesisError::Configuration(format!(
                "provider '{}' already registered",
                profile.provider_id
            )));
        }

        self.handles.insert(profile.provider_id.clone(), provider);
        self.profiles.insert(profile.provider_id.clone(), profile);
        Ok(())
    }

    /// Look up a profile by provider id
    pub fn profile(&self, provider_id: &str) -> Option<&ModelProfile> {
        self.profiles.get(provider_id)
    }

    /// Look up a provider handle by id
    pub fn handle(&self, provider_id: &str) -> Option<Arc<dyn GenerationProvider>> {
        self.handles.get(provider_id).cloned()
    }

    /// Provider ids serving a capability
    pub fn providers_for(&self, capability: Capability) -> Vec<&ModelProfile> {
        self.profiles
            .values()
            .filter(|p| p.serves(capability))
            .collect()
    }

    /// Whether any registered provider serves a capability
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.profiles.values().any(|p| p.serves(capability))
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// All registered provider ids
    pub fn provider_ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
