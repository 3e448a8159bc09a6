//! Workflow definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::phase::PhaseConfig;

/// Configuration for the workflow-level self-critique loop.
///
/// Names three phases of the definition: the draft being improved, the
/// assessment producing a score and feedback, and the refine phase that
/// rewrites the draft with that feedback. Distinct from per-phase retries;
/// the loop iterates over named phases with its own bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineLoopConfig {
    /// Phase whose output is being improved
    pub draft_phase: String,

    /// Phase producing a score and structured feedback
    pub assess_phase: String,

    /// Phase that rewrites the draft using the feedback
    pub refine_phase: String,

    /// Accept once the score reaches this threshold
    pub quality_threshold: f32,

    /// Iteration cap; hitting it keeps the best-scoring draft, not a failure.
    /// `None` uses the engine's configured `limits.max_refine_iterations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

/// An ordered list of phases owned by a user or built-in template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Ordered phases
    pub phases: Vec<PhaseConfig>,

    /// Owning user, when user-authored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Built-in template vs. user-authored
    #[serde(default)]
    pub is_template: bool,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Self-critique loop, when the workflow uses one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_loop: Option<RefineLoopConfig>,

    /// Ceiling for the whole execution; overrides the engine default
    #[serde(default, with = "humantime_serde::option")]
    pub workflow_timeout: Option<Duration>,
}

impl WorkflowDefinition {
    /// Create a definition with the given phases.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phases: Vec<PhaseConfig>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phases,
            owner_id: None,
            is_template: false,
            tags: Vec::new(),
            refine_loop: None,
            workflow_timeout: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_refine_loop(mut self, refine_loop: RefineLoopConfig) -> Self {
        self.refine_loop = Some(refine_loop);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = Some(timeout);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.name == name)
    }
}
