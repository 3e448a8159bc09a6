//! Workflow execution engine
//!
//! Runs one task through its definition's phases in order, persisting state
//! through the [`TaskStore`] after every phase. The engine owns a task for
//! the whole execution; nothing else mutates a claimed task, so the store
//! needs no cross-phase locking for it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{PoiesisError, Result};
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::provider::ModelRouter;
use crate::store::TaskStore;
use crate::task::{Task, TaskError, TaskErrorKind, TaskStatus};

use super::context::WorkflowContext;
use super::definition::WorkflowDefinition;
use super::executor::PhaseExecutor;
use super::phase::PhaseStatus;
use super::quality::{Assessor, RouterAssessor};
use super::refine::RefineLoop;

/// Orchestrates one workflow execution per call
pub struct WorkflowEngine {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    executor: Arc<PhaseExecutor>,
    assessor: Arc<dyn Assessor>,
    sink: Arc<dyn EventSink>,
}

impl WorkflowEngine {
    /// Create an engine builder
    pub fn builder(router: Arc<ModelRouter>, store: Arc<dyn TaskStore>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new(router, store)
    }

    /// Run a previously created task to a terminal state.
    ///
    /// Claims the task (`pending -> processing`), executes the definition's
    /// phases in order under the workflow timeout ceiling, and persists the
    /// terminal state. Always returns the final task record; execution
    /// failures land in `task.error`, not in `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures or when the task is missing.
    pub async fn execute(
        &self,
        task_id: &str,
        definition: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<Task> {
        let mut task = self.store.get_task(task_id).await?;

        if task.status.is_terminal() {
            return Ok(task);
        }
        if cancel.is_cancelled() {
            self.transition(&mut task, TaskStatus::Cancelled).await?;
            return Ok(task);
        }

        self.transition(&mut task, TaskStatus::Processing).await?;

        let ceiling = definition
            .workflow_timeout
            .or(self.config.limits.workflow_timeout);

        let body = self.run_phases(&mut task, definition, &cancel);
        let outcome = match ceiling {
            Some(limit) => match tokio::time::timeout(limit, body).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PoiesisError::WorkflowTimeout(limit)),
            },
            None => body.await,
        };

        match outcome {
            Ok((ctx, None)) => {
                task.result = Some(ctx.aggregate_output());
                self.transition(&mut task, TaskStatus::Completed).await?;
            }
            Ok((_, Some(error))) => {
                task.error = Some(error);
                self.transition(&mut task, TaskStatus::Failed).await?;
            }
            Err(PoiesisError::Cancelled) => {
                self.transition(&mut task, TaskStatus::Cancelled).await?;
            }
            Err(e) => {
                task.error = Some(TaskError::from_error(&e));
                self.transition(&mut task, TaskStatus::Failed).await?;
            }
        }

        Ok(task)
    }

    /// Run the definition's phases in order.
    ///
    /// Returns the final context and, when a required phase failed, the
    /// structured failure. Cancellation propagates as `Err`.
    async fn run_phases(
        &self,
        task: &mut Task,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<(WorkflowContext, Option<TaskError>)> {
        let mut ctx = WorkflowContext::new(&definition.id, &task.id, task.input.clone());
        ctx.tags = definition.tags.clone();

        let mut previous_success: Option<String> = None;

        for (index, phase) in definition.phases.iter().enumerate() {
            ctx.current_phase_index = index;

            if let Some(loop_cfg) = &definition.refine_loop {
                // The loop consumes the assess and refine phases itself
                if phase.name == loop_cfg.refine_phase {
                    continue;
                }
                if phase.name == loop_cfg.assess_phase {
                    let refine = RefineLoop::new(
                        self.executor.clone(),
                        self.assessor.clone(),
                        self.sink.clone(),
                    )
                    .iteration_default(self.config.limits.max_refine_iterations);
                    let result = refine.run(&mut ctx, definition, loop_cfg, cancel).await?;
                    task.retry_count += result.attempts.saturating_sub(1);
                    self.store.update_task(task).await?;

                    if !result.is_success() {
                        let message = result.error.clone().unwrap_or_default();
                        let error = TaskError::new(TaskErrorKind::PhaseFailed, message)
                            .with_phase(&result.phase_name)
                            .with_attempts(result.attempts);
                        return Ok((ctx, Some(error)));
                    }
                    previous_success = Some(loop_cfg.draft_phase.clone());
                    continue;
                }
            }

            let input = ctx.input_for_next_phase(previous_success.as_deref());
            let result = self
                .executor
                .execute(&task.id, phase, &input, cancel)
                .await?;

            task.retry_count += result.attempts.saturating_sub(1);
            let status = result.status;
            let attempts = result.attempts;
            let message = result.error.clone().unwrap_or_default();
            ctx.record(result);
            self.store.update_task(task).await?;

            match status {
                PhaseStatus::Succeeded => {
                    previous_success = Some(phase.name.clone());
                }
                PhaseStatus::Skipped => {
                    // Next phase falls back to the last good output
                }
                PhaseStatus::Failed => {
                    if phase.required {
                        let error = TaskError::new(TaskErrorKind::PhaseFailed, message)
                            .with_phase(&phase.name)
                            .with_attempts(attempts);
                        return Ok((ctx, Some(error)));
                    }
                }
            }
        }

        Ok((ctx, None))
    }

    async fn transition(&self, task: &mut Task, status: TaskStatus) -> Result<()> {
        task.transition(status)?;
        self.store.update_task(task).await?;
        self.sink.emit(&EngineEvent::TaskTransition {
            execution_id: task.id.clone(),
            status,
        });
        Ok(())
    }
}

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    router: Arc<ModelRouter>,
    store: Arc<dyn TaskStore>,
    config: EngineConfig,
    assessor: Option<Arc<dyn Assessor>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl WorkflowEngineBuilder {
    pub fn new(router: Arc<ModelRouter>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            router,
            store,
            config: EngineConfig::default(),
            assessor: None,
            sink: None,
        }
    }

    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the assessor (defaults to routing through `assess` providers)
    pub fn assessor(mut self, assessor: Arc<dyn Assessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    /// Set the event sink
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the engine
    pub fn build(self) -> WorkflowEngine {
        let sink: Arc<dyn EventSink> = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let assessor: Arc<dyn Assessor> = self
            .assessor
            .unwrap_or_else(|| Arc::new(RouterAssessor::new(self.router.clone())));

        let executor = Arc::new(
            PhaseExecutor::new(self.router, self.config.retry.clone())
                .with_store(self.store.clone())
                .with_sink(sink.clone())
                .with_assessor(assessor.clone()),
        );

        WorkflowEngine {
            config: self.config,
            store: self.store,
            executor,
            assessor,
            sink,
        }
    }
}
