//! Error types for Poiesis operations

use std::time::Duration;

/// Result type for Poiesis operations
pub type Result<T> = std::result::Result<T, PoiesisError>;

/// A single failed provider attempt, kept when a fallback chain is exhausted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderFailure {
    /// Provider that failed
    pub provider_id: String,
    /// Failure reason (network, rate limit, timeout, malformed response)
    pub reason: String,
}

/// Error types for the orchestration engine
#[derive(Debug, thiserror::Error)]
pub enum PoiesisError {
    /// A single generation call failed
    #[error("Provider '{provider_id}' failed: {reason}")]
    Provider { provider_id: String, reason: String },

    /// Every provider in the fallback chain failed for one attempt
    #[error("Fallback chain exhausted for capability '{capability}' ({} providers tried)", failures.len())]
    ChainExhausted {
        capability: String,
        failures: Vec<ProviderFailure>,
    },

    /// No provider in the registry serves the requested capability
    #[error("No provider available for capability '{0}'")]
    NoProviderAvailable(String),

    /// Generated output scored below the configured quality threshold
    #[error("Quality gate failed: score {score:.2} below threshold {threshold:.2}")]
    QualityGate { score: f32, threshold: f32 },

    /// A workflow definition is structurally invalid
    #[error("Workflow definition invalid: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    /// Aggregate execution exceeded its ceiling
    #[error("Workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    /// A single phase attempt exceeded its timeout
    #[error("Phase '{phase}' timed out after {timeout:?}")]
    PhaseTimeout { phase: String, timeout: Duration },

    /// Execution was cancelled by an external signal
    #[error("Execution cancelled")]
    Cancelled,

    /// Task lookup failed
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Task store error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider response could not be parsed
    #[error("Failed to parse provider output: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for PoiesisError {
    fn from(s: String) -> Self {
        PoiesisError::Other(s)
    }
}

impl From<&str> for PoiesisError {
    fn from(s: &str) -> Self {
        PoiesisError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for PoiesisError {
    fn from(err: anyhow::Error) -> Self {
        PoiesisError::Other(err.to_string())
    }
}

impl PoiesisError {
    /// Whether this error is recoverable by retrying the phase attempt.
    ///
    /// Phase-local failures (provider, chain, quality) retry transparently;
    /// workflow-level failures always surface.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoiesisError::Provider { .. }
                | PoiesisError::ChainExhausted { .. }
                | PoiesisError::QualityGate { .. }
                | PoiesisError::PhaseTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let e = PoiesisError::Provider {
            provider_id: "local".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(e.is_retryable());

        let e = PoiesisError::QualityGate {
            score: 0.4,
            threshold: 0.8,
        };
        assert!(e.is_retryable());

        let e = PoiesisError::WorkflowTimeout(Duration::from_secs(10));
        assert!(!e.is_retryable());

        assert!(!PoiesisError::Cancelled.is_retryable());
    }

    #[test]
    fn test_chain_exhausted_display() {
        let e = PoiesisError::ChainExhausted {
            capability: "content".to_string(),
            failures: vec![
                ProviderFailure {
                    provider_id: "local".to_string(),
                    reason: "timeout".to_string(),
                },
                ProviderFailure {
                    provider_id: "remote".to_string(),
                    reason: "429".to_string(),
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("content"));
        assert!(msg.contains("2 providers"));
    }
}
