//! Phase execution with timeout, retry, and quality gating
//!
//! One [`PhaseExecutor::execute`] call runs a single phase to a terminal
//! outcome: up to `max_retries + 1` attempts, each bounded by the phase
//! timeout, with exponential backoff between attempts. A quality gate below
//! threshold counts as a failed attempt and retries the same way a provider
//! failure does.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::RetrySettings;
use crate::error::{PoiesisError, Result};
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::provider::retry::RetryConfig;
use crate::provider::{GenerationRequest, ModelRouter};
use crate::store::{PhaseAttemptRecord, TaskStore};

use super::phase::{PhaseConfig, PhaseResult};
use super::quality::Assessor;

/// Executes a single phase to a terminal outcome
pub struct PhaseExecutor {
    router: Arc<ModelRouter>,
    retry_settings: RetrySettings,
    assessor: Option<Arc<dyn Assessor>>,
    store: Option<Arc<dyn TaskStore>>,
    sink: Arc<dyn EventSink>,
}

impl PhaseExecutor {
    pub fn new(router: Arc<ModelRouter>, retry_settings: RetrySettings) -> Self {
        Self {
            router,
            retry_settings,
            assessor: None,
            store: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Set the assessor used for per-phase quality gates.
    pub fn with_assessor(mut self, assessor: Arc<dyn Assessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    /// Set the store receiving per-attempt audit records.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run one phase to completion.
    ///
    /// Returns a terminal [`PhaseResult`]: `succeeded` when an attempt passed
    /// (including its quality gate), `failed` when every attempt failed, and
    /// `skipped` when the phase declares `skip_on_error`. Every attempt lands
    /// in the audit store, the terminal outcome included. Cancellation is the
    /// only `Err` path; it is checked before each attempt and during backoff.
    pub async fn execute(
        &self,
        execution_id: &str,
        phase: &PhaseConfig,
        input: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<PhaseResult> {
        let retry = RetryConfig::from_settings(&self.retry_settings, phase.max_retries);
        let request = build_request(input);
        let started = Instant::now();

        let mut last_error = String::new();
        let mut attempts_used = 0;

        for attempt in 1..=retry.max_attempts {
            attempts_used = attempt;
            if cancel.is_cancelled() {
                return Err(PoiesisError::Cancelled);
            }

            self.sink.emit(&EngineEvent::PhaseStarted {
                execution_id: execution_id.to_string(),
                phase_name: phase.name.clone(),
                attempt,
            });

            match self.attempt(execution_id, phase, input, &request, cancel).await {
                Ok((output, score)) => {
                    let mut result = PhaseResult::succeeded(
                        &phase.name,
                        output,
                        attempt,
                        started.elapsed().as_millis() as u64,
                    );
                    if let Some(score) = score {
                        result = result.with_quality_score(score);
                    }
                    self.record_attempt(execution_id, phase, attempt, &result)
                        .await;
                    self.emit_finished(execution_id, phase, attempt, true);
                    return Ok(result);
                }
                Err(PoiesisError::Cancelled) => return Err(PoiesisError::Cancelled),
                Err(e) => {
                    last_error = e.to_string();

                    if !e.is_retryable() {
                        tracing::warn!(
                            execution_id,
                            phase_name = %phase.name,
                            error = %e,
                            "phase failed with non-retryable error"
                        );
                        break;
                    }

                    if attempt < retry.max_attempts {
                        // The terminal record after the loop covers the final
                        // attempt; interim records cover the retried ones
                        let interim = PhaseResult::failed(
                            &phase.name,
                            &last_error,
                            attempt,
                            started.elapsed().as_millis() as u64,
                        );
                        self.record_attempt(execution_id, phase, attempt, &interim)
                            .await;

                        let delay = retry.delay_for_attempt(attempt - 1);
                        self.sink.emit(&EngineEvent::RetryScheduled {
                            execution_id: execution_id.to_string(),
                            phase_name: phase.name.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        });

                        tokio::select! {
                            _ = cancel.cancelled() => return Err(PoiesisError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit_finished(execution_id, phase, attempts_used, false);

        let result = if phase.skip_on_error {
            PhaseResult::skipped(&phase.name, &last_error, attempts_used, duration_ms)
        } else {
            PhaseResult::failed(&phase.name, &last_error, attempts_used, duration_ms)
        };
        self.record_attempt(execution_id, phase, attempts_used, &result)
            .await;
        Ok(result)
    }

    /// One attempt: route, generate within the phase timeout, gate quality.
    ///
    /// The router enforces the timeout per provider call and sidelines a hung
    /// provider, so the retrying attempt selects a different one.
    async fn attempt(
        &self,
        execution_id: &str,
        phase: &PhaseConfig,
        input: &serde_json::Value,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<(serde_json::Value, Option<f32>)> {
        let generation =
            self.router
                .execute(execution_id, phase.agent, request, Some(phase.timeout()));

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(PoiesisError::Cancelled),
            outcome = generation => outcome?,
        };

        let output = serde_json::Value::String(output.content);

        let score = match (phase.quality_threshold, &self.assessor) {
            (Some(threshold), Some(assessor)) => {
                let assessment = tokio::time::timeout(
                    phase.timeout(),
                    assessor.assess(execution_id, input, &output),
                )
                .await
                .map_err(|_| PoiesisError::PhaseTimeout {
                    phase: phase.name.clone(),
                    timeout: phase.timeout(),
                })??;
                if !assessment.meets(threshold) {
                    return Err(PoiesisError::QualityGate {
                        score: assessment.score,
                        threshold,
                    });
                }
                Some(assessment.score)
            }
            _ => None,
        };

        Ok((output, score))
    }

    async fn record_attempt(
        &self,
        execution_id: &str,
        phase: &PhaseConfig,
        attempt: u32,
        result: &PhaseResult,
    ) {
        if let Some(store) = &self.store {
            let record = PhaseAttemptRecord {
                execution_id: execution_id.to_string(),
                phase_name: phase.name.clone(),
                attempt,
                result: result.clone(),
            };
            if let Err(e) = store.record_phase_attempt(record).await {
                tracing::warn!(execution_id, error = %e, "failed to record phase attempt");
            }
        }
    }

    fn emit_finished(&self, execution_id: &str, phase: &PhaseConfig, attempts: u32, success: bool) {
        self.sink.emit(&EngineEvent::PhaseFinished {
            execution_id: execution_id.to_string(),
            phase_name: phase.name.clone(),
            attempts,
            success,
        });
    }
}

fn build_request(input: &serde_json::Value) -> GenerationRequest {
    match input {
        serde_json::Value::String(s) => GenerationRequest::from_prompt(s.clone()),
        other => GenerationRequest::from_prompt(
            serde_json::to_string_pretty(other).unwrap_or_default(),
        ),
    }
}
