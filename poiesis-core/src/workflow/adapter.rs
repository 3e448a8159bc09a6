//! User-authored workflow support
//!
//! Bridges free-form workflow definitions to the engine: a fixed catalog of
//! known phases with defaults, pure construction of phase lists from catalog
//! names, and structural validation that collects every problem instead of
//! stopping at the first.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PoiesisError, Result};
use crate::provider::{Capability, ProviderRegistry};

use super::definition::WorkflowDefinition;
use super::phase::{PhaseConfig, MAX_RETRIES_LIMIT, TIMEOUT_SECONDS_RANGE};

/// One entry in the catalog of phases users may reference by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Catalog name
    pub name: String,
    /// Capability the phase requires
    pub agent: Capability,
    /// Human-readable description
    pub description: String,
    /// Default per-attempt timeout in seconds
    pub default_timeout_seconds: u64,
    /// Default retry budget
    pub default_max_retries: u32,
}

/// Validates and builds user-authored workflow definitions
pub struct WorkflowAdapter {
    registry: Arc<ProviderRegistry>,
}

impl WorkflowAdapter {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Catalog of phases a user-authored workflow may reference.
    pub fn available_phases() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec {
                name: "research".to_string(),
                agent: Capability::Research,
                description: "Gather background material and an outline".to_string(),
                default_timeout_seconds: 180,
                default_max_retries: 2,
            },
            PhaseSpec {
                name: "draft".to_string(),
                agent: Capability::Content,
                description: "Write the main content".to_string(),
                default_timeout_seconds: 240,
                default_max_retries: 2,
            },
            PhaseSpec {
                name: "assess".to_string(),
                agent: Capability::Assess,
                description: "Score the draft and produce feedback".to_string(),
                default_timeout_seconds: 120,
                default_max_retries: 1,
            },
            PhaseSpec {
                name: "refine".to_string(),
                agent: Capability::Content,
                description: "Rewrite the draft using assessment feedback".to_string(),
                default_timeout_seconds: 240,
                default_max_retries: 2,
            },
            PhaseSpec {
                name: "image".to_string(),
                agent: Capability::Image,
                description: "Generate an accompanying image".to_string(),
                default_timeout_seconds: 300,
                default_max_retries: 1,
            },
            PhaseSpec {
                name: "publish".to_string(),
                agent: Capability::Publish,
                description: "Format the final content for publication".to_string(),
                default_timeout_seconds: 60,
                default_max_retries: 2,
            },
        ]
    }

    /// Build phase configs from catalog names, applying catalog defaults.
    ///
    /// Pure construction; no provider or liveness checks happen here.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when a name is not in the catalog.
    pub fn build_phases(names: &[impl AsRef<str>]) -> Result<Vec<PhaseConfig>> {
        let catalog = Self::available_phases();
        let mut phases = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();

        for name in names {
            let name = name.as_ref();
            match catalog.iter().find(|spec| spec.name == name) {
                Some(spec) => {
                    phases.push(
                        PhaseConfig::new(&spec.name, spec.agent)
                            .timeout_seconds(spec.default_timeout_seconds)
                            .max_retries(spec.default_max_retries),
                    );
                }
                None => unknown.push(format!("unknown phase '{}'", name)),
            }
        }

        if unknown.is_empty() {
            Ok(phases)
        } else {
            Err(PoiesisError::Validation { reasons: unknown })
        }
    }

    /// Validate a definition structurally and against the provider registry.
    ///
    /// Collects every problem found; a definition is rejected as a whole, so
    /// a failed validation never leaves a partially created task behind.
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        let mut reasons = Vec::new();

        if definition.phases.is_empty() {
            reasons.push("workflow has no phases".to_string());
        }

        let mut seen = HashSet::new();
        for phase in &definition.phases {
            if !seen.insert(phase.name.as_str()) {
                reasons.push(format!("duplicate phase name '{}'", phase.name));
            }

            if !TIMEOUT_SECONDS_RANGE.contains(&phase.timeout_seconds) {
                reasons.push(format!(
                    "phase '{}': timeout {}s outside allowed range {}-{}s",
                    phase.name,
                    phase.timeout_seconds,
                    TIMEOUT_SECONDS_RANGE.start(),
                    TIMEOUT_SECONDS_RANGE.end()
                ));
            }

            if phase.max_retries > MAX_RETRIES_LIMIT {
                reasons.push(format!(
                    "phase '{}': max_retries {} exceeds limit {}",
                    phase.name, phase.max_retries, MAX_RETRIES_LIMIT
                ));
            }

            if let Some(threshold) = phase.quality_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    reasons.push(format!(
                        "phase '{}': quality threshold {} outside [0, 1]",
                        phase.name, threshold
                    ));
                }
            }

            if !self.registry.has_capability(phase.agent) {
                reasons.push(format!(
                    "phase '{}': no registered provider serves '{}'",
                    phase.name, phase.agent
                ));
            }
        }

        if let Some(refine) = &definition.refine_loop {
            for (role, name) in [
                ("draft", &refine.draft_phase),
                ("assess", &refine.assess_phase),
                ("refine", &refine.refine_phase),
            ] {
                if definition.phase(name).is_none() {
                    reasons.push(format!(
                        "refine loop: {} phase '{}' not defined in workflow",
                        role, name
                    ));
                }
            }

            if !(0.0..=1.0).contains(&refine.quality_threshold) {
                reasons.push(format!(
                    "refine loop: quality threshold {} outside [0, 1]",
                    refine.quality_threshold
                ));
            }

            if refine.max_iterations == Some(0) {
                reasons.push("refine loop: max_iterations must be at least 1".to_string());
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(PoiesisError::Validation { reasons })
        }
    }
}
