//! Self-critique refine loop
//!
//! Iterates draft -> assess -> refine until the assessment clears the quality
//! threshold or the iteration cap is reached. Hitting the cap is not a
//! failure: the best-scoring draft seen so far wins. A required refine phase
//! that fails hard is a failure, and propagates as that phase's result.
//! Distinct from per-phase retries, which re-run one phase on error; this
//! loop spans three phases and has its own bound.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{PoiesisError, Result};
use crate::events::{EngineEvent, EventSink};

use super::context::WorkflowContext;
use super::definition::{RefineLoopConfig, WorkflowDefinition};
use super::executor::PhaseExecutor;
use super::phase::PhaseResult;
use super::quality::Assessor;

/// Drives the draft/assess/refine cycle for one execution
pub struct RefineLoop {
    executor: Arc<PhaseExecutor>,
    assessor: Arc<dyn Assessor>,
    sink: Arc<dyn EventSink>,
    default_iterations: u32,
}

impl RefineLoop {
    pub fn new(
        executor: Arc<PhaseExecutor>,
        assessor: Arc<dyn Assessor>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            assessor,
            sink,
            default_iterations: 3,
        }
    }

    /// Iteration cap used when the loop config leaves `max_iterations` unset.
    pub fn iteration_default(mut self, cap: u32) -> Self {
        self.default_iterations = cap.max(1);
        self
    }

    /// Run the loop over an already-completed draft phase.
    ///
    /// Returns the final draft result, re-recorded under the draft phase name
    /// with its winning quality score. The assess phase result is recorded in
    /// the context on every iteration so callers can see the score history.
    /// When a required refine phase fails terminally, its failed result comes
    /// back instead; only the iteration cap keeps the best draft.
    pub async fn run(
        &self,
        ctx: &mut WorkflowContext,
        definition: &WorkflowDefinition,
        config: &RefineLoopConfig,
        cancel: &CancellationToken,
    ) -> Result<PhaseResult> {
        let draft_result = ctx
            .result_for(&config.draft_phase)
            .filter(|r| r.is_success())
            .cloned()
            .ok_or_else(|| {
                PoiesisError::Other(format!(
                    "refine loop requires a successful '{}' phase",
                    config.draft_phase
                ))
            })?;

        let refine_phase = definition.phase(&config.refine_phase).ok_or_else(|| {
            PoiesisError::Other(format!(
                "refine loop references unknown phase '{}'",
                config.refine_phase
            ))
        })?;
        let assess_phase = definition.phase(&config.assess_phase).ok_or_else(|| {
            PoiesisError::Other(format!(
                "refine loop references unknown phase '{}'",
                config.assess_phase
            ))
        })?;

        let max_iterations = config.max_iterations.unwrap_or(self.default_iterations);
        let mut current = draft_result.output.clone();
        let mut best: Option<(serde_json::Value, f32)> = None;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Err(PoiesisError::Cancelled);
            }

            let assess_started = Instant::now();
            let assessment = tokio::time::timeout(
                assess_phase.timeout(),
                self.assessor
                    .assess(&ctx.execution_id, &ctx.initial_input, &current),
            )
            .await
            .map_err(|_| PoiesisError::PhaseTimeout {
                phase: config.assess_phase.clone(),
                timeout: assess_phase.timeout(),
            })??;

            ctx.record(
                PhaseResult::succeeded(
                    &config.assess_phase,
                    serde_json::to_value(&assessment)?,
                    1,
                    assess_started.elapsed().as_millis() as u64,
                )
                .with_quality_score(assessment.score),
            );
            ctx.refine_iterations = iteration;

            self.sink.emit(&EngineEvent::RefineIteration {
                execution_id: ctx.execution_id.clone(),
                iteration,
                score: assessment.score,
            });

            if assessment.meets(config.quality_threshold) {
                return Ok(self.finish(ctx, config, current, assessment.score));
            }

            match &best {
                Some((_, score)) if *score >= assessment.score => {}
                _ => best = Some((current.clone(), assessment.score)),
            }

            if iteration == max_iterations {
                break;
            }

            let refine_input = serde_json::json!({
                "original_request": ctx.initial_input,
                "draft": current,
                "feedback": assessment.as_feedback_text(),
            });

            let refined = self
                .executor
                .execute(&ctx.execution_id, refine_phase, &refine_input, cancel)
                .await?;

            if !refined.is_success() {
                if refine_phase.required {
                    ctx.record(refined.clone());
                    return Ok(refined);
                }
                tracing::warn!(
                    execution_id = %ctx.execution_id,
                    iteration,
                    "optional refine phase failed, keeping best draft so far"
                );
                break;
            }
            current = refined.output;
        }

        // Cap reached (or an optional refine failed): best-scoring draft wins
        let (output, score) = best.unwrap_or((current, 0.0));
        Ok(self.finish(ctx, config, output, score))
    }

    fn finish(
        &self,
        ctx: &mut WorkflowContext,
        config: &RefineLoopConfig,
        output: serde_json::Value,
        score: f32,
    ) -> PhaseResult {
        let result = PhaseResult::succeeded(&config.draft_phase, output, 1, 0)
            .with_quality_score(score);
        ctx.record(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::error::Result;
    use crate::events::RecordingSink;
    use crate::provider::{
        Capability, GenerationOutput, GenerationProvider, GenerationRequest, ModelProfile,
        ModelRouter, ProviderInfo, ProviderRegistry,
    };
    use crate::workflow::phase::PhaseConfig;
    use crate::workflow::quality::FnAssessor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns "draft v1", "draft v2", ... on successive calls
    struct VersionedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationProvider for VersionedProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationOutput::from_text(format!("draft v{}", call + 2)))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                provider_id: "versioned".to_string(),
                model_name: "test".to_string(),
            }
        }
    }

    /// Refuses every generation call
    struct BrokenProvider;

    #[async_trait]
    impl GenerationProvider for BrokenProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
            Err(PoiesisError::Provider {
                provider_id: "broken".to_string(),
                reason: "model overloaded".to_string(),
            })
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                provider_id: "broken".to_string(),
                model_name: "broken".to_string(),
            }
        }
    }

    fn scripted_assessor(scores: Vec<f32>) -> Arc<FnAssessor<impl Fn(&serde_json::Value) -> (f32, String) + Send + Sync>> {
        let remaining = Mutex::new(scores);
        Arc::new(FnAssessor::new(move |_| {
            let mut scores = remaining.lock().unwrap();
            let score = if scores.is_empty() { 0.0 } else { scores.remove(0) };
            (score, "needs work".to_string())
        }))
    }

    fn fast_settings() -> RetrySettings {
        RetrySettings {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    fn refine_loop_with_failing_refine(scores: Vec<f32>) -> RefineLoop {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ModelProfile::new("broken").with_capabilities(Capability::all().iter().copied()),
                Arc::new(BrokenProvider),
            )
            .unwrap();
        let router = Arc::new(ModelRouter::builder(Arc::new(registry)).build());
        let executor = Arc::new(PhaseExecutor::new(router, fast_settings()));

        let sink = Arc::new(RecordingSink::new());
        RefineLoop::new(executor, scripted_assessor(scores), sink)
    }

    fn refine_loop_with_scores(scores: Vec<f32>) -> (RefineLoop, Arc<RecordingSink>) {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ModelProfile::new("versioned")
                    .with_capabilities(Capability::all().iter().copied()),
                Arc::new(VersionedProvider {
                    calls: AtomicUsize::new(0),
                }),
            )
            .unwrap();
        let router = Arc::new(ModelRouter::builder(Arc::new(registry)).build());
        let executor = Arc::new(PhaseExecutor::new(router, fast_settings()));

        let sink = Arc::new(RecordingSink::new());
        (
            RefineLoop::new(executor, scripted_assessor(scores), sink.clone()),
            sink,
        )
    }

    fn loop_fixture() -> (WorkflowContext, WorkflowDefinition, RefineLoopConfig) {
        let definition = WorkflowDefinition::new(
            "wf",
            "Post",
            vec![
                PhaseConfig::new("draft", Capability::Content),
                PhaseConfig::new("assess", Capability::Assess),
                PhaseConfig::new("refine", Capability::Content),
            ],
        );
        let config = RefineLoopConfig {
            draft_phase: "draft".to_string(),
            assess_phase: "assess".to_string(),
            refine_phase: "refine".to_string(),
            quality_threshold: 0.8,
            max_iterations: Some(3),
        };

        let mut ctx = WorkflowContext::new("wf", "e1", serde_json::json!("topic"));
        ctx.record(PhaseResult::succeeded(
            "draft",
            serde_json::json!("draft v1"),
            1,
            10,
        ));
        (ctx, definition, config)
    }

    #[tokio::test]
    async fn test_threshold_met_first_pass_skips_refine() {
        let (refine, sink) = refine_loop_with_scores(vec![0.9]);
        let (mut ctx, definition, config) = loop_fixture();

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.output, serde_json::json!("draft v1"));
        assert_eq!(result.quality_score, Some(0.9));
        assert_eq!(ctx.refine_iterations, 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_refines_until_threshold() {
        let (refine, _sink) = refine_loop_with_scores(vec![0.5, 0.7, 0.85]);
        let (mut ctx, definition, config) = loop_fixture();

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        // Two refine rounds produced v2 then v3, which cleared the bar
        assert_eq!(result.output, serde_json::json!("draft v3"));
        assert_eq!(result.quality_score, Some(0.85));
        assert_eq!(ctx.refine_iterations, 3);
    }

    #[tokio::test]
    async fn test_cap_keeps_best_draft() {
        let (refine, _sink) = refine_loop_with_scores(vec![0.5, 0.7, 0.6]);
        let (mut ctx, definition, config) = loop_fixture();

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        // Never cleared 0.8; the 0.7 draft (v2) is the best seen
        assert!(result.is_success());
        assert_eq!(result.output, serde_json::json!("draft v2"));
        assert_eq!(result.quality_score, Some(0.7));
        assert_eq!(ctx.refine_iterations, 3);
    }

    #[tokio::test]
    async fn test_required_refine_failure_propagates() {
        let refine = refine_loop_with_failing_refine(vec![0.5]);
        let (mut ctx, definition, config) = loop_fixture();

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        // The refine phase exhausted its retries; its failure is the outcome
        assert!(!result.is_success());
        assert_eq!(result.phase_name, "refine");
        assert_eq!(result.attempts, 3);
        assert!(ctx.result_for("refine").is_some());
    }

    #[tokio::test]
    async fn test_optional_refine_failure_keeps_best_draft() {
        let refine = refine_loop_with_failing_refine(vec![0.5]);
        let (mut ctx, mut definition, config) = loop_fixture();
        definition.phases[2] = PhaseConfig::new("refine", Capability::Content)
            .max_retries(0)
            .optional();

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.output, serde_json::json!("draft v1"));
        assert_eq!(result.quality_score, Some(0.5));
    }

    #[tokio::test]
    async fn test_engine_default_cap_applies() {
        let (refine, _sink) = refine_loop_with_scores(vec![0.5, 0.6, 0.7]);
        let refine = refine.iteration_default(2);
        let (mut ctx, definition, mut config) = loop_fixture();
        config.max_iterations = None;

        let result = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap();

        // Only two iterations ran; the second draft was the best seen
        assert_eq!(ctx.refine_iterations, 2);
        assert_eq!(result.output, serde_json::json!("draft v2"));
        assert_eq!(result.quality_score, Some(0.6));
    }

    /// Assessor that never answers
    struct StalledAssessor;

    #[async_trait]
    impl Assessor for StalledAssessor {
        async fn assess(
            &self,
            _execution_id: &str,
            _input: &serde_json::Value,
            _output: &serde_json::Value,
        ) -> Result<crate::workflow::quality::Assessment> {
            tokio::time::sleep(Duration::from_secs(86400)).await;
            Ok(crate::workflow::quality::Assessment::new(1.0, "late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_assessment_times_out() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ModelProfile::new("versioned")
                    .with_capabilities(Capability::all().iter().copied()),
                Arc::new(VersionedProvider {
                    calls: AtomicUsize::new(0),
                }),
            )
            .unwrap();
        let router = Arc::new(ModelRouter::builder(Arc::new(registry)).build());
        let executor = Arc::new(PhaseExecutor::new(router, fast_settings()));
        let refine = RefineLoop::new(
            executor,
            Arc::new(StalledAssessor),
            Arc::new(RecordingSink::new()),
        );

        let (mut ctx, mut definition, config) = loop_fixture();
        definition.phases[1] =
            PhaseConfig::new("assess", Capability::Assess).timeout_seconds(10);

        let err = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::PhaseTimeout { .. }));
    }

    #[tokio::test]
    async fn test_requires_successful_draft() {
        let (refine, _sink) = refine_loop_with_scores(vec![0.9]);
        let (_, definition, config) = loop_fixture();

        let mut ctx = WorkflowContext::new("wf", "e1", serde_json::json!("topic"));
        let err = refine
            .run(&mut ctx, &definition, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("draft"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let (refine, _sink) = refine_loop_with_scores(vec![0.5, 0.5, 0.5]);
        let (mut ctx, definition, config) = loop_fixture();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = refine
            .run(&mut ctx, &definition, &config, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::Cancelled));
    }
}
