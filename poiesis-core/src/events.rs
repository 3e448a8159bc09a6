//! Engine observability events
//!
//! The router and engine emit events through an [`EventSink`] rather than
//! mutating task state directly. The default sink forwards to `tracing`;
//! tests use [`RecordingSink`] to assert on ordering.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// An observable engine event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The router picked a provider for a phase attempt
    ProviderSelected {
        execution_id: String,
        capability: String,
        provider_id: String,
        tier: usize,
        score: f32,
    },
    /// A phase attempt began
    PhaseStarted {
        execution_id: String,
        phase_name: String,
        attempt: u32,
    },
    /// A phase reached a terminal outcome
    PhaseFinished {
        execution_id: String,
        phase_name: String,
        attempts: u32,
        success: bool,
    },
    /// A retry was scheduled after a failed attempt
    RetryScheduled {
        execution_id: String,
        phase_name: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// The task moved to a new status
    TaskTransition {
        execution_id: String,
        status: TaskStatus,
    },
    /// One refine-loop iteration finished
    RefineIteration {
        execution_id: String,
        iteration: u32,
        score: f32,
    },
}

/// Sink for engine events
pub trait EventSink: Send + Sync {
    /// Receive one event. Must not block.
    fn emit(&self, event: &EngineEvent);
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ProviderSelected {
                execution_id,
                capability,
                provider_id,
                tier,
                score,
            } => {
                tracing::debug!(
                    execution_id,
                    capability,
                    provider_id,
                    tier,
                    score,
                    "provider selected"
                );
            }
            EngineEvent::PhaseStarted {
                execution_id,
                phase_name,
                attempt,
            } => {
                tracing::info!(execution_id, phase_name, attempt, "phase started");
            }
            EngineEvent::PhaseFinished {
                execution_id,
                phase_name,
                attempts,
                success,
            } => {
                tracing::info!(execution_id, phase_name, attempts, success, "phase finished");
            }
            EngineEvent::RetryScheduled {
                execution_id,
                phase_name,
                attempt,
                delay_ms,
            } => {
                tracing::warn!(execution_id, phase_name, attempt, delay_ms, "retry scheduled");
            }
            EngineEvent::TaskTransition {
                execution_id,
                status,
            } => {
                tracing::info!(execution_id, status = %status, "task transition");
            }
            EngineEvent::RefineIteration {
                execution_id,
                iteration,
                score,
            } => {
                tracing::info!(execution_id, iteration, score, "refine iteration");
            }
        }
    }
}

/// Sink that records events in memory, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Provider ids from `ProviderSelected` events, in emission order
    pub fn selected_providers(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ProviderSelected { provider_id, .. } => Some(provider_id),
                _ => None,
            })
            .collect()
    }

    /// Status sequence from `TaskTransition` events
    pub fn status_sequence(&self) -> Vec<TaskStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::TaskTransition { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Sink that fans out to multiple sinks
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for CompositeSink {
    fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
