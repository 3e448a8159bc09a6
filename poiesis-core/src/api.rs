//! Narrow async API over the engine
//!
//! The [`Orchestrator`] is the single entry point embedders use: register
//! workflow definitions, create executions, query status, cancel. Creation
//! returns as soon as the task is persisted; the execution itself runs on a
//! spawned task owned by the orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PoiesisError, Result};
use crate::store::TaskStore;
use crate::task::{TaskError, TaskStatus};
use crate::workflow::{
    PhaseResult, PhaseSpec, WorkflowAdapter, WorkflowDefinition, WorkflowEngine,
};

/// Acknowledgement returned by [`Orchestrator::create_execution`].
///
/// Returned before any phase runs; the status is always `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub execution_id: String,
    pub status: TaskStatus,
}

/// Point-in-time view of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: TaskStatus,
    /// Phase most recently reported, while the task is processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    /// Latest result per phase, in the order phases first reported
    pub phases: Vec<PhaseResult>,
    /// Rough completion estimate over the definition's phase count
    pub progress_percent: u8,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Single entry point for embedders
pub struct Orchestrator {
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn TaskStore>,
    adapter: WorkflowAdapter,
    workflows: Mutex<HashMap<String, WorkflowDefinition>>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn TaskStore>,
        adapter: WorkflowAdapter,
    ) -> Self {
        Self {
            engine,
            store,
            adapter,
            workflows: Mutex::new(HashMap::new()),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a workflow definition, validating it first.
    ///
    /// # Errors
    ///
    /// Returns `Validation` with every problem found; an invalid definition
    /// is never partially registered.
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        self.adapter.validate(&definition)?;
        if let Ok(mut workflows) = self.workflows.lock() {
            workflows.insert(definition.id.clone(), definition);
        }
        Ok(())
    }

    /// Validate a definition without registering it.
    pub fn validate_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        self.adapter.validate(definition)
    }

    /// Catalog of phases available to user-authored workflows.
    pub fn available_phases(&self) -> Vec<PhaseSpec> {
        WorkflowAdapter::available_phases()
    }

    /// Create and start an execution of a registered workflow.
    ///
    /// The task is persisted as `pending` and the receipt returned before
    /// any phase runs; the execution proceeds on a spawned task.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unknown workflow id and store errors
    /// from task creation.
    pub async fn create_execution(
        &self,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<ExecutionReceipt> {
        let definition = self
            .workflows
            .lock()
            .ok()
            .and_then(|w| w.get(workflow_id).cloned())
            .ok_or_else(|| {
                PoiesisError::Configuration(format!("unknown workflow '{}'", workflow_id))
            })?;

        let task = crate::task::Task::new(workflow_id, input);
        let execution_id = task.id.clone();
        self.store.create_task(&task).await?;

        let cancel = CancellationToken::new();
        if let Ok(mut cancellations) = self.cancellations.lock() {
            cancellations.insert(execution_id.clone(), cancel.clone());
        }

        let engine = self.engine.clone();
        let cancellations = self.cancellations.clone();
        let running = self.running.clone();
        let id = execution_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.execute(&id, &definition, cancel).await {
                tracing::error!(execution_id = %id, error = %e, "execution failed to run");
            }
            if let Ok(mut cancellations) = cancellations.lock() {
                cancellations.remove(&id);
            }
            // Drop our own handle unless a waiter already claimed it
            if let Ok(mut running) = running.lock() {
                running.remove(&id);
            }
        });

        if let Ok(mut running) = self.running.lock() {
            running.insert(execution_id.clone(), handle);
        }

        Ok(ExecutionReceipt {
            execution_id,
            status: TaskStatus::Pending,
        })
    }

    /// Current status of an execution.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown execution id.
    pub async fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let task = self.store.get_task(execution_id).await?;

        // Latest attempt per phase, keeping first-seen phase order
        let attempts = self.store.phase_attempts(execution_id).await?;
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, PhaseResult> = HashMap::new();
        for record in attempts {
            if !latest.contains_key(&record.phase_name) {
                order.push(record.phase_name.clone());
            }
            latest.insert(record.phase_name.clone(), record.result);
        }
        let phases: Vec<PhaseResult> = order
            .iter()
            .filter_map(|name| latest.remove(name))
            .collect();

        let current_phase = if task.status == TaskStatus::Processing {
            order.last().cloned()
        } else {
            None
        };
        let progress_percent = self.progress(&task, phases.len());

        Ok(ExecutionStatus {
            execution_id: task.id,
            workflow_id: task.workflow_id,
            status: task.status,
            current_phase,
            phases,
            progress_percent,
            retry_count: task.retry_count,
            result: task.result,
            error: task.error,
            created_at: task.created_at,
            completed_at: task.completed_at,
        })
    }

    /// Request cancellation of an execution.
    ///
    /// Cooperative: a running phase attempt is interrupted at its next
    /// cancellation point. A live execution acknowledges with `cancelled`
    /// even though the task record catches up asynchronously. Idempotent;
    /// cancelling a finished execution leaves it unchanged and reports its
    /// terminal status.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown execution id.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<TaskStatus> {
        let task = self.store.get_task(execution_id).await?;
        if task.status.is_terminal() {
            return Ok(task.status);
        }

        if let Ok(cancellations) = self.cancellations.lock() {
            if let Some(token) = cancellations.get(execution_id) {
                token.cancel();
            }
        }
        Ok(TaskStatus::Cancelled)
    }

    /// Wait for an execution's spawned task to finish and return its status.
    ///
    /// Intended for embedders that need a completion barrier; ordinary
    /// callers poll [`Orchestrator::execution_status`] instead.
    pub async fn wait_for_completion(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let handle = self
            .running
            .lock()
            .ok()
            .and_then(|mut running| running.remove(execution_id));

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(execution_id, error = %e, "execution task panicked");
            }
        }
        self.execution_status(execution_id).await
    }

    fn progress(&self, task: &crate::task::Task, phases_seen: usize) -> u8 {
        if task.status == TaskStatus::Completed {
            return 100;
        }
        let total = self
            .workflows
            .lock()
            .ok()
            .and_then(|w| w.get(&task.workflow_id).map(|d| d.phases.len()))
            .unwrap_or(0);
        if total == 0 {
            return 0;
        }
        ((phases_seen.min(total) * 100) / total) as u8
    }
}
