//! Provider selection with prioritized fallback chains
//!
//! Selection walks a capability's priority tiers in order; within a tier,
//! live providers are ranked by a weighted score (success rate, capability
//! match, latency, cost). Priority order is the primary key; the score only
//! breaks ties inside one tier.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::liveness::LivenessCache;
use super::profile::{Capability, ModelProfile, ProviderRegistry};
use super::{GenerationOutput, GenerationProvider, GenerationRequest};
use crate::config::{RoutingConfig, ScoringWeights};
use crate::error::{PoiesisError, ProviderFailure, Result};
use crate::events::{EngineEvent, EventSink, TracingSink};

/// Priority-ordered fallback chain for one capability.
///
/// Each tier holds provider ids of equal priority; earlier tiers are tried
/// first. Typically the zero-cost local provider sits alone in tier 0 with
/// increasingly capable remote providers behind it.
#[derive(Debug, Clone, Default)]
pub struct FallbackChain {
    tiers: Vec<Vec<String>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Append a priority tier
    pub fn tier(mut self, provider_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tiers
            .push(provider_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|t| t.is_empty())
    }

    pub fn tiers(&self) -> &[Vec<String>] {
        &self.tiers
    }
}

/// A liveness-confirmed provider choice
#[derive(Clone)]
pub struct ProviderHandle {
    /// Provider id the handle resolves to
    pub provider_id: String,
    /// Priority tier the provider was found in
    pub tier: usize,
    /// Tie-break score at selection time
    pub score: f32,
    provider: Arc<dyn GenerationProvider>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("provider_id", &self.provider_id)
            .field("tier", &self.tier)
            .field("score", &self.score)
            .finish()
    }
}

/// Routes generation requests to providers through fallback chains
pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
    liveness: Arc<LivenessCache>,
    chains: HashMap<Capability, FallbackChain>,
    scoring: ScoringWeights,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("registry", &self.registry)
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRouter {
    /// Create a router builder
    pub fn builder(registry: Arc<ProviderRegistry>) -> ModelRouterBuilder {
        ModelRouterBuilder::new(registry)
    }

    /// Select a provider for a capability.
    ///
    /// Walks the chain tier by tier; the first tier with at least one live
    /// eligible provider wins, the highest-scoring candidate within it is
    /// chosen. Liveness is always confirmed before a handle is returned.
    ///
    /// # Errors
    ///
    /// Returns `NoProviderAvailable` when no live provider serves the
    /// capability.
    pub async fn select(&self, execution_id: &str, capability: Capability) -> Result<ProviderHandle> {
        self.select_excluding(execution_id, capability, &HashSet::new())
            .await
    }

    async fn select_excluding(
        &self,
        execution_id: &str,
        capability: Capability,
        exclude: &HashSet<String>,
    ) -> Result<ProviderHandle> {
        let chain = self.chain_for(capability);

        for (tier_index, tier) in chain.tiers().iter().enumerate() {
            let mut best: Option<ProviderHandle> = None;

            for provider_id in tier {
                if exclude.contains(provider_id) {
                    continue;
                }
                let Some(profile) = self.registry.profile(provider_id) else {
                    continue;
                };
                if !profile.serves(capability) {
                    continue;
                }
                let Some(provider) = self.registry.handle(provider_id) else {
                    continue;
                };
                if !self.liveness.is_alive(provider_id, provider.as_ref()).await {
                    continue;
                }

                let score = self.score(profile, capability);
                let candidate = ProviderHandle {
                    provider_id: provider_id.clone(),
                    tier: tier_index,
                    score,
                    provider,
                };

                match &best {
                    Some(current) if current.score >= score => {}
                    _ => best = Some(candidate),
                }
            }

            if let Some(handle) = best {
                self.sink.emit(&EngineEvent::ProviderSelected {
                    execution_id: execution_id.to_string(),
                    capability: capability.to_string(),
                    provider_id: handle.provider_id.clone(),
                    tier: handle.tier,
                    score: handle.score,
                });
                return Ok(handle);
            }
        }

        Err(PoiesisError::NoProviderAvailable(capability.to_string()))
    }

    /// Invoke a previously selected provider, recording call statistics.
    ///
    /// A failure drops the provider's cached probe so the next selection
    /// re-checks health instead of trusting a stale "alive" entry. A provider
    /// that failed transiently stays eligible for later retries.
    pub async fn generate(
        &self,
        handle: &ProviderHandle,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput> {
        let stats = self.liveness.stats(&handle.provider_id);

        match handle.provider.generate(request).await {
            Ok(output) => {
                stats.record_success();
                Ok(output)
            }
            Err(e) => {
                stats.record_failure();
                self.liveness.invalidate(&handle.provider_id);
                Err(PoiesisError::Provider {
                    provider_id: handle.provider_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run one generation through the full fallback chain.
    ///
    /// Providers are tried in chain order until one succeeds; each failure is
    /// recorded. When every eligible provider has failed, the accumulated
    /// per-provider reasons come back in `ChainExhausted`.
    ///
    /// A call that exceeds `call_timeout` consumes the whole attempt: the
    /// hung provider is marked down for the liveness TTL so the caller's next
    /// attempt selects elsewhere, and the error returns immediately instead
    /// of falling through the chain.
    pub async fn execute(
        &self,
        execution_id: &str,
        capability: Capability,
        request: &GenerationRequest,
        call_timeout: Option<Duration>,
    ) -> Result<GenerationOutput> {
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let mut tried: HashSet<String> = HashSet::new();

        loop {
            let handle = match self
                .select_excluding(execution_id, capability, &tried)
                .await
            {
                Ok(handle) => handle,
                Err(PoiesisError::NoProviderAvailable(_)) if !failures.is_empty() => {
                    return Err(PoiesisError::ChainExhausted {
                        capability: capability.to_string(),
                        failures,
                    });
                }
                Err(e) => return Err(e),
            };

            tried.insert(handle.provider_id.clone());

            let outcome = match call_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.generate(&handle, request)).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            self.liveness.stats(&handle.provider_id).record_failure();
                            self.liveness.mark_down(&handle.provider_id);
                            tracing::warn!(
                                execution_id,
                                provider_id = %handle.provider_id,
                                timeout = ?limit,
                                "provider call timed out, marking it down"
                            );
                            return Err(PoiesisError::Provider {
                                provider_id: handle.provider_id.clone(),
                                reason: format!("timed out after {:?}", limit),
                            });
                        }
                    }
                }
                None => self.generate(&handle, request).await,
            };

            match outcome {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tracing::warn!(
                        execution_id,
                        provider_id = %handle.provider_id,
                        error = %e,
                        "provider failed, falling through chain"
                    );
                    failures.push(ProviderFailure {
                        provider_id: handle.provider_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Tie-break score for a profile, given the configured weights.
    fn score(&self, profile: &ModelProfile, capability: Capability) -> f32 {
        let stats = self.liveness.stats(&profile.provider_id);
        let capability_match = if profile.serves(capability) { 1.0 } else { 0.0 };
        let inverse_latency = 1.0 / (1.0 + profile.latency_weight);
        let inverse_cost = 1.0 / (1.0 + profile.cost_weight);

        stats.success_rate() * self.scoring.success_rate
            + capability_match * self.scoring.capability_match
            + inverse_latency * self.scoring.inverse_latency
            + inverse_cost * self.scoring.inverse_cost
    }

    fn chain_for(&self, capability: Capability) -> FallbackChain {
        if let Some(chain) = self.chains.get(&capability) {
            return chain.clone();
        }

        // Default chain: local providers first, metered remote behind them
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for profile in self.registry.providers_for(capability) {
            if profile.is_local {
                local.push(profile.provider_id.clone());
            } else {
                remote.push(profile.provider_id.clone());
            }
        }
        local.sort();
        remote.sort();

        let mut chain = FallbackChain::new();
        if !local.is_empty() {
            chain = chain.tier(local);
        }
        if !remote.is_empty() {
            chain = chain.tier(remote);
        }
        chain
    }

    /// Probe every registered provider concurrently, priming the liveness
    /// cache so the first selections do not pay probe latency.
    pub async fn warm_up(&self) {
        let probes = self.registry.provider_ids().into_iter().filter_map(|id| {
            let provider = self.registry.handle(&id)?;
            let liveness = self.liveness.clone();
            Some(async move {
                let alive = liveness.is_alive(&id, provider.as_ref()).await;
                tracing::debug!(provider_id = %id, alive, "warm-up probe");
            })
        });
        futures::future::join_all(probes).await;
    }

    /// Access the shared liveness cache
    pub fn liveness(&self) -> &Arc<LivenessCache> {
        &self.liveness
    }

    /// Access the provider registry
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

/// Builder for [`ModelRouter`]
pub struct ModelRouterBuilder {
    registry: Arc<ProviderRegistry>,
    routing: RoutingConfig,
    chains: HashMap<Capability, FallbackChain>,
    sink: Option<Arc<dyn EventSink>>,
}

impl ModelRouterBuilder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            routing: RoutingConfig::default(),
            chains: HashMap::new(),
            sink: None,
        }
    }

    /// Set the routing configuration (scoring weights, liveness TTL)
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Override the fallback chain for a capability
    pub fn chain(mut self, capability: Capability, chain: FallbackChain) -> Self {
        self.chains.insert(capability, chain);
        self
    }

    /// Set the event sink
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the router
    pub fn build(self) -> ModelRouter {
        let liveness = Arc::new(LivenessCache::new(
            self.routing.liveness_ttl,
            self.routing.probe_timeout,
        ));

        ModelRouter {
            registry: self.registry,
            liveness,
            chains: self.chains,
            scoring: self.routing.scoring,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        }
    }
}
