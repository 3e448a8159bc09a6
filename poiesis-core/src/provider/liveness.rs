//! Provider liveness cache and call statistics
//!
//! The only mutable state shared across concurrent executions. Probe results
//! are cached for a short TTL so selection does not hit every backend on
//! every call; success/failure counters feed the router's tie-break score.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::GenerationProvider;

/// Rolling success/failure counters for one provider
#[derive(Debug, Default)]
pub struct ProviderStats {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl ProviderStats {
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Historical success rate in [0, 1]. Providers with no history score a
    /// neutral 0.5 so a new provider is neither favored nor punished.
    pub fn success_rate(&self) -> f32 {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total = successes + failures;
        if total == 0 {
            0.5
        } else {
            successes as f32 / total as f32
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.successes.load(Ordering::Relaxed) + self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct ProbeEntry {
    alive: bool,
    probed_at: Instant,
}

/// TTL'd cache of provider reachability plus per-provider call statistics.
///
/// Internally synchronized; safe to share across executions. Lock scope is
/// the probe map only, never the registry's capability data.
pub struct LivenessCache {
    ttl: Duration,
    probe_timeout: Duration,
    probes: RwLock<HashMap<String, ProbeEntry>>,
    stats: RwLock<HashMap<String, Arc<ProviderStats>>>,
}

impl std::fmt::Debug for LivenessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessCache")
            .field("ttl", &self.ttl)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl LivenessCache {
    pub fn new(ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            ttl,
            probe_timeout,
            probes: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether a provider is alive, probing it if the cached result is
    /// stale or absent.
    pub async fn is_alive(&self, provider_id: &str, provider: &dyn GenerationProvider) -> bool {
        if let Some(entry) = self.cached(provider_id) {
            return entry;
        }

        let alive = tokio::time::timeout(self.probe_timeout, provider.health_check())
            .await
            .unwrap_or(false);

        if let Ok(mut probes) = self.probes.write() {
            probes.insert(
                provider_id.to_string(),
                ProbeEntry {
                    alive,
                    probed_at: Instant::now(),
                },
            );
        }

        alive
    }

    fn cached(&self, provider_id: &str) -> Option<bool> {
        let probes = self.probes.read().ok()?;
        let entry = probes.get(provider_id)?;
        if entry.probed_at.elapsed() < self.ttl {
            Some(entry.alive)
        } else {
            None
        }
    }

    /// Mark a provider down immediately (after a timed-out generation call,
    /// where a health probe would still report it alive). The next probe
    /// happens once the TTL expires.
    pub fn mark_down(&self, provider_id: &str) {
        if let Ok(mut probes) = self.probes.write() {
            probes.insert(
                provider_id.to_string(),
                ProbeEntry {
                    alive: false,
                    probed_at: Instant::now(),
                },
            );
        }
    }

    /// Drop a cached probe result, forcing a fresh probe on next check.
    pub fn invalidate(&self, provider_id: &str) {
        if let Ok(mut probes) = self.probes.write() {
            probes.remove(provider_id);
        }
    }

    /// Statistics handle for a provider, created on first access.
    pub fn stats(&self, provider_id: &str) -> Arc<ProviderStats> {
        if let Ok(stats) = self.stats.read() {
            if let Some(entry) = stats.get(provider_id) {
                return entry.clone();
            }
        }

        let entry = Arc::new(ProviderStats::default());
        if let Ok(mut stats) = self.stats.write() {
            return stats
                .entry(provider_id.to_string())
                .or_insert_with(|| entry.clone())
                .clone();
        }
        entry
    }
}
