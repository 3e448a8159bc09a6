//! Phase configuration and results

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::provider::Capability;

/// Allowed range for a phase timeout, in seconds
pub const TIMEOUT_SECONDS_RANGE: std::ops::RangeInclusive<u64> = 10..=3600;

/// Maximum retries a single phase may declare
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Declarative description of one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Phase name, unique within a definition
    pub name: String,

    /// Capability this phase needs from a provider
    pub agent: Capability,

    /// Per-attempt timeout in seconds (10-3600)
    pub timeout_seconds: u64,

    /// Retries after the initial attempt (0-10)
    pub max_retries: u32,

    /// On terminal failure, record `skipped` and continue
    pub skip_on_error: bool,

    /// A terminal failure aborts the remaining phases
    pub required: bool,

    /// Minimum acceptable quality score in [0, 1]; None disables the gate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f32>,
}

impl PhaseConfig {
    /// Create a phase with engine defaults (120s timeout, 2 retries, required).
    pub fn new(name: impl Into<String>, agent: Capability) -> Self {
        Self {
            name: name.into(),
            agent,
            timeout_seconds: 120,
            max_retries: 2,
            skip_on_error: false,
            required: true,
            quality_threshold: None,
        }
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn skip_on_error(mut self) -> Self {
        self.skip_on_error = true;
        self.required = false;
        self
    }

    pub fn quality_threshold(mut self, threshold: f32) -> Self {
        self.quality_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    /// Per-attempt timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Terminal outcome of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one phase, recorded in the workflow context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase name
    pub phase_name: String,

    /// Terminal outcome
    pub status: PhaseStatus,

    /// Phase output (Null when failed or skipped without output)
    pub output: serde_json::Value,

    /// Quality score when a gate or assessment ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,

    /// Total attempts made (initial + retries)
    pub attempts: u32,

    /// Wall time across all attempts
    pub duration_ms: u64,

    /// Error message on failure or skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseResult {
    /// Create a succeeded result
    pub fn succeeded(
        phase_name: impl Into<String>,
        output: serde_json::Value,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            phase_name: phase_name.into(),
            status: PhaseStatus::Succeeded,
            output,
            quality_score: None,
            attempts,
            duration_ms,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failed(
        phase_name: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            phase_name: phase_name.into(),
            status: PhaseStatus::Failed,
            output: serde_json::Value::Null,
            quality_score: None,
            attempts,
            duration_ms,
            error: Some(error.into()),
        }
    }

    /// Create a skipped result
    pub fn skipped(
        phase_name: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            phase_name: phase_name.into(),
            status: PhaseStatus::Skipped,
            output: serde_json::Value::Null,
            quality_score: None,
            attempts,
            duration_ms,
            error: Some(error.into()),
        }
    }

    /// Attach a quality score
    pub fn with_quality_score(mut self, score: f32) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PhaseStatus::Succeeded
    }
}
