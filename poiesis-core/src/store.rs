//! Task persistence
//!
//! The store is the only externally-owned dependency: the engine consumes
//! this interface and never keeps a shadow copy of task state beyond the one
//! in-flight [`crate::workflow::WorkflowContext`]. Concurrency control for
//! the records themselves is the storage layer's responsibility.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PoiesisError, Result};
use crate::task::Task;
use crate::workflow::PhaseResult;

/// Audit record of one phase attempt, keyed by
/// `(execution_id, phase_name, attempt)`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PhaseAttemptRecord {
    pub execution_id: String,
    pub phase_name: String,
    pub attempt: u32,
    pub result: PhaseResult,
}

/// Persistence interface for tasks and phase attempt audit records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a newly accepted task.
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Fetch a task by id.
    async fn get_task(&self, task_id: &str) -> Result<Task>;

    /// Persist the current state of a task.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Record one phase attempt for audit/debugging.
    async fn record_phase_attempt(&self, record: PhaseAttemptRecord) -> Result<()>;

    /// All attempt records for an execution, in recording order.
    async fn phase_attempts(&self, execution_id: &str) -> Result<Vec<PhaseAttemptRecord>>;
}

/// In-memory task store for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    attempts: RwLock<Vec<PhaseAttemptRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shareable handle
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(PoiesisError::Store(format!(
                "task '{}' already exists",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| PoiesisError::TaskNotFound(task_id.to_string()))
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(PoiesisError::TaskNotFound(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn record_phase_attempt(&self, record: PhaseAttemptRecord) -> Result<()> {
        self.attempts.write().await.push(record);
        Ok(())
    }

    async fn phase_attempts(&self, execution_id: &str) -> Result<Vec<PhaseAttemptRecord>> {
        Ok(self
            .attempts
            .read()
            .await
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect())
    }
}
