//! Generation provider abstraction and routing
//!
//! Providers expose a uniform `generate` capability regardless of the backing
//! service. The [`router::ModelRouter`] picks one per phase attempt by walking
//! a priority-tiered fallback chain; ties within a tier are broken by a
//! weighted score over liveness statistics and profile metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod backends;
pub mod liveness;
pub mod profile;
pub mod retry;
pub mod router;

pub use liveness::{LivenessCache, ProviderStats};
pub use profile::{Capability, ModelProfile, ProviderRegistry};
pub use retry::RetryConfig;
pub use router::{FallbackChain, ModelRouter, ProviderHandle};

/// Generation constraints passed with every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConstraints {
    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConstraints {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(2000),
            stop_sequences: Vec::new(),
        }
    }
}

/// Request to a generation provider
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System prompt for context
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// Generation constraints
    pub constraints: GenerationConstraints,
}

impl GenerationRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            constraints: GenerationConstraints::default(),
        }
    }

    /// Create a request with a system prompt
    pub fn with_system(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            prompt: prompt.into(),
            constraints: GenerationConstraints::default(),
        }
    }

    /// Override the constraints
    pub fn constraints(mut self, constraints: GenerationConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Response from a generation provider
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Generated content
    pub content: String,

    /// Token usage, when the backend reports it
    pub usage: Option<TokenUsage>,
}

impl GenerationOutput {
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Trait for generation provider implementations.
///
/// Implementors handle the actual backend calls (local runtime, hosted API).
/// The router treats every implementation uniformly.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate content for a request.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;

    /// Cheap reachability check, used by the liveness cache.
    ///
    /// Must be fast; the result is cached for a short TTL so this is not
    /// called on every selection.
    async fn health_check(&self) -> bool {
        true
    }

    /// Identifier and model information
    fn info(&self) -> ProviderInfo;
}

/// Provider identity and model information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub provider_id: String,
    pub model_name: String,
}
