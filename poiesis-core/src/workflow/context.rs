//! Execution-scoped workflow state
//!
//! A [`WorkflowContext`] is owned exclusively by the coroutine executing its
//! task; it is never shared across concurrent executions, so no locking is
//! needed inside one execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::phase::PhaseResult;

/// Mutable state for one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Definition this execution was built from
    pub workflow_id: String,

    /// Unique execution (task) id
    pub execution_id: String,

    /// Input payload the execution started with
    pub initial_input: serde_json::Value,

    /// Results of completed phases, by phase name
    pub phase_results: HashMap<String, PhaseResult>,

    /// Index of the phase currently executing
    pub current_phase_index: usize,

    /// Refine-loop iterations consumed so far (visible state, restartable)
    pub refine_iterations: u32,

    /// Tags carried from the definition
    pub tags: Vec<String>,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        initial_input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            initial_input,
            phase_results: HashMap::new(),
            current_phase_index: 0,
            refine_iterations: 0,
            tags: Vec::new(),
        }
    }

    /// Record a phase result under its phase name.
    pub fn record(&mut self, result: PhaseResult) {
        self.phase_results.insert(result.phase_name.clone(), result);
    }

    /// Result of an earlier phase, if recorded.
    pub fn result_for(&self, phase_name: &str) -> Option<&PhaseResult> {
        self.phase_results.get(phase_name)
    }

    /// Input for the next phase: the most recent successful phase output,
    /// falling back to the initial input at the start of the workflow.
    pub fn input_for_next_phase(&self, previous_phase: Option<&str>) -> serde_json::Value {
        previous_phase
            .and_then(|name| self.phase_results.get(name))
            .filter(|r| r.is_success())
            .map(|r| r.output.clone())
            .unwrap_or_else(|| self.initial_input.clone())
    }

    /// Aggregate output: every recorded phase result keyed by phase name.
    pub fn aggregate_output(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .phase_results
            .iter()
            .map(|(name, result)| (name.clone(), result.output.clone()))
            .collect();
        serde_json::Value::Object(map)
    }
}
