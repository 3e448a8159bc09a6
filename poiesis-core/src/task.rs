//! Task entity and status state machine
//!
//! A [`Task`] is the persisted record of one workflow execution. Status
//! transitions are monotonic: `pending → processing → {completed | failed |
//! cancelled}`, with no transitions out of a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PoiesisError, Result};

/// Externally observable task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, not yet claimed by an engine
    Pending,
    /// Claimed; some phase is in progress
    Processing,
    /// All phases succeeded or were skipped
    Completed,
    /// A required phase failed, validation failed, or the ceiling fired
    Failed,
    /// External cancellation took effect
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a transition to `next` is valid.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Processing) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Processing, TaskStatus::Processing) => true,
            (TaskStatus::Processing, TaskStatus::Completed) => true,
            (TaskStatus::Processing, TaskStatus::Failed) => true,
            (TaskStatus::Processing, TaskStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Kind discriminator for a structured task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// A required phase exhausted its retries
    PhaseFailed,
    /// Every provider in a fallback chain failed
    ChainExhausted,
    /// Output never reached the quality threshold
    QualityGate,
    /// The workflow definition was structurally invalid
    Validation,
    /// The workflow-level ceiling fired
    WorkflowTimeout,
    /// Anything else
    Internal,
}

/// Structured failure payload attached to a failed task.
///
/// Callers always receive this instead of a bare error chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase_name: None,
            attempts: None,
        }
    }

    pub fn with_phase(mut self, phase_name: impl Into<String>) -> Self {
        self.phase_name = Some(phase_name.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Derive a task error from an engine error.
    pub fn from_error(err: &PoiesisError) -> Self {
        let kind = match err {
            PoiesisError::ChainExhausted { .. } => TaskErrorKind::ChainExhausted,
            PoiesisError::QualityGate { .. } => TaskErrorKind::QualityGate,
            PoiesisError::Validation { .. } => TaskErrorKind::Validation,
            PoiesisError::WorkflowTimeout(_) => TaskErrorKind::WorkflowTimeout,
            PoiesisError::Provider { .. } | PoiesisError::PhaseTimeout { .. } => {
                TaskErrorKind::PhaseFailed
            }
            _ => TaskErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

/// A unit of orchestrated work: one workflow execution and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier (also the execution id)
    pub id: String,
    /// Current status
    pub status: TaskStatus,
    /// Definition this execution was built from
    pub workflow_id: String,
    /// Structured input payload
    pub input: serde_json::Value,
    /// When the execution request was accepted
    pub created_at: DateTime<Utc>,
    /// When an engine claimed the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set if and only if the status is terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Total phase attempts beyond the first, across all phases
    pub retry_count: u32,
    /// Structured output on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Structured failure detail on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Task {
    /// Create a new pending task for a workflow execution.
    pub fn new(workflow_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            workflow_id: workflow_id.into(),
            input,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
            error: None,
        }
    }

    /// Transition to a new status, enforcing the state machine.
    ///
    /// Sets `started_at` on the claim transition and `completed_at` on any
    /// terminal transition.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PoiesisError::Other(format!(
                "invalid task transition: {} -> {}",
                self.status, next
            )));
        }

        if self.status == TaskStatus::Pending && next == TaskStatus::Processing {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}
