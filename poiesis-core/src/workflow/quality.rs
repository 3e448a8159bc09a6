//! Quality assessment
//!
//! Scoring generated output is itself a provider call against the `assess`
//! capability. The executor uses an [`Assessor`] for per-phase quality gates;
//! the refine loop uses the same trait for its workflow-level iterations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PoiesisError, Result};
use crate::provider::{Capability, GenerationRequest, ModelRouter};

/// Assessment result with score and structured feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    /// Quality score (0.0 to 1.0)
    pub score: f32,
    /// Feedback for improvement
    pub feedback: String,
    /// Specific issues found
    pub issues: Vec<String>,
}

impl Assessment {
    pub fn new(score: f32, feedback: impl Into<String>) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            feedback: feedback.into(),
            issues: Vec::new(),
        }
    }

    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues = issues;
        self
    }

    /// Whether the score clears a threshold
    pub fn meets(&self, threshold: f32) -> bool {
        self.score >= threshold
    }

    /// Render as feedback text for a refine prompt
    pub fn as_feedback_text(&self) -> String {
        let mut text = format!("Score: {:.2}\nFeedback: {}", self.score, self.feedback);
        if !self.issues.is_empty() {
            text.push_str(&format!("\nIssues: {}", self.issues.join(", ")));
        }
        text
    }
}

/// Trait for output assessment
#[async_trait]
pub trait Assessor: Send + Sync {
    /// Score generated output against the original input.
    async fn assess(
        &self,
        execution_id: &str,
        input: &serde_json::Value,
        output: &serde_json::Value,
    ) -> Result<Assessment>;
}

const ASSESS_SYSTEM_PROMPT: &str = r#"You are an expert content evaluator. Evaluate the given content and provide:
1. A score from 0.0 to 1.0
2. Specific feedback for improvement
3. A list of issues found

Respond in JSON format:
{
  "score": 0.8,
  "feedback": "Overall good but...",
  "issues": ["issue1", "issue2"]
}"#;

/// Assessor backed by the router's `assess` capability
pub struct RouterAssessor {
    router: std::sync::Arc<ModelRouter>,
}

impl RouterAssessor {
    pub fn new(router: std::sync::Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Assessor for RouterAssessor {
    async fn assess(
        &self,
        execution_id: &str,
        input: &serde_json::Value,
        output: &serde_json::Value,
    ) -> Result<Assessment> {
        let output_str = match output {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        };

        let prompt = format!(
            "Original request:\n{}\n\nGenerated content:\n{}",
            serde_json::to_string_pretty(input).unwrap_or_default(),
            output_str
        );

        let request = GenerationRequest::with_system(ASSESS_SYSTEM_PROMPT, prompt);
        // Callers bound the assessment with the relevant phase timeout
        let response = self
            .router
            .execute(execution_id, Capability::Assess, &request, None)
            .await?;

        #[derive(Deserialize)]
        struct AssessResponse {
            score: f32,
            feedback: String,
            issues: Option<Vec<String>>,
        }

        let parsed: AssessResponse = serde_json::from_str(&response.content)
            .map_err(|e| PoiesisError::Parse(format!("invalid assessment: {}", e)))?;

        Ok(Assessment::new(parsed.score, parsed.feedback)
            .with_issues(parsed.issues.unwrap_or_default()))
    }
}

/// Function-backed assessor, mostly for tests and deterministic gates
pub struct FnAssessor<F>
where
    F: Fn(&serde_json::Value) -> (f32, String) + Send + Sync,
{
    scorer: F,
}

impl<F> FnAssessor<F>
where
    F: Fn(&serde_json::Value) -> (f32, String) + Send + Sync,
{
    pub fn new(scorer: F) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl<F> Assessor for FnAssessor<F>
where
    F: Fn(&serde_json::Value) -> (f32, String) + Send + Sync,
{
    async fn assess(
        &self,
        _execution_id: &str,
        _input: &serde_json::Value,
        output: &serde_json::Value,
    ) -> Result<Assessment> {
        let (score, feedback) = (self.scorer)(output);
        Ok(Assessment::new(score, feedback))
    }
}
