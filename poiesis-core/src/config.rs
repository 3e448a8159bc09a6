//! Configuration types for the orchestration engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PoiesisError, Result};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Provider routing configuration
    pub routing: RoutingConfig,

    /// Phase retry defaults
    pub retry: RetrySettings,

    /// Workflow-level limits
    pub limits: LimitsConfig,
}

/// Provider routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Tie-break scoring weights (priority tier order remains primary)
    pub scoring: ScoringWeights,

    /// How long a liveness probe result stays fresh
    #[serde(with = "humantime_serde")]
    pub liveness_ttl: Duration,

    /// Timeout for a single liveness probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringWeights::default(),
            liveness_ttl: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Weights for the provider tie-break score.
///
/// Applied only among live providers within the same priority tier:
/// `success_rate * w1 + capability_match * w2 + inverse_latency * w3 +
/// inverse_cost * w4`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub success_rate: f32,
    pub capability_match: f32,
    pub inverse_latency: f32,
    pub inverse_cost: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.4,
            capability_match: 0.3,
            inverse_latency: 0.15,
            inverse_cost: 0.15,
        }
    }
}

/// Retry settings applied between phase attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Initial delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Add jitter to avoid thundering-herd retries on a degraded provider
    pub add_jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Workflow-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Ceiling for a whole workflow execution (None = unbounded).
    ///
    /// A definition-level ceiling, when present, takes precedence.
    #[serde(default, with = "humantime_serde::option")]
    pub workflow_timeout: Option<Duration>,

    /// Default cap for the self-critique refine loop
    pub max_refine_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            workflow_timeout: None,
            max_refine_iterations: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (poiesis.toml or path from POIESIS_CONFIG_PATH)
    /// 3. Environment variable overrides (POIESIS_ prefix)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("poiesis.toml"))
            .merge(Env::prefixed("POIESIS_").split("__"));

        if let Ok(path) = std::env::var("POIESIS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: EngineConfig = figment.extract().map_err(|e| {
            PoiesisError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            providers::{Format, Serialized, Toml},
            Figment,
        };

        let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                PoiesisError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let w = &self.routing.scoring;
        for (name, value) in [
            ("success_rate", w.success_rate),
            ("capability_match", w.capability_match),
            ("inverse_latency", w.inverse_latency),
            ("inverse_cost", w.inverse_cost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoiesisError::Configuration(format!(
                    "scoring weight '{}' must be in [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(PoiesisError::Configuration(
                "retry backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        if self.limits.max_refine_iterations == 0 {
            return Err(PoiesisError::Configuration(
                "max_refine_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for [`EngineConfig`]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set the scoring weights
    pub fn scoring(mut self, scoring: ScoringWeights) -> Self {
        self.config.routing.scoring = scoring;
        self
    }

    /// Set the liveness probe TTL
    pub fn liveness_ttl(mut self, ttl: Duration) -> Self {
        self.config.routing.liveness_ttl = ttl;
        self
    }

    /// Set retry settings
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the workflow-level timeout ceiling
    pub fn workflow_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.workflow_timeout = Some(timeout);
        self
    }

    /// Set the refine-loop iteration cap
    pub fn max_refine_iterations(mut self, max: u32) -> Self {
        self.config.limits.max_refine_iterations = max.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.scoring.success_rate, 0.4);
        assert_eq!(config.limits.max_refine_iterations, 3);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let mut config = EngineConfig::default();
        config.routing.scoring.success_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let mut config = EngineConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .workflow_timeout(Duration::from_secs(120))
            .max_refine_iterations(5)
            .liveness_ttl(Duration::from_secs(10))
            .build();

        assert_eq!(config.limits.workflow_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.limits.max_refine_iterations, 5);
        assert_eq!(config.routing.liveness_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = EngineConfig::default();
        let toml = toml_like_json(&config);
        assert!(toml.get("routing").is_some());
        assert!(toml.get("limits").is_some());
    }

    fn toml_like_json(config: &EngineConfig) -> serde_json::Value {
        serde_json::to_value(config).unwrap()
    }
}
