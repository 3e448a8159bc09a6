//! Ollama backend (local, free, runs on your machine)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PoiesisError, Result};
use crate::provider::{
    GenerationOutput, GenerationProvider, GenerationRequest, ProviderInfo, TokenUsage,
};

/// Ollama-compatible local generation backend.
pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend.
    ///
    /// # Arguments
    ///
    /// * `model` - Model name (e.g., "qwen3:14b")
    /// * `base_url` - Base URL for the Ollama API (defaults to "http://localhost:11434")
    pub fn new(model: impl Into<String>, base_url: Option<impl Into<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url
                .map(|u| u.into())
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads `OLLAMA_MODEL` (default "qwen3:14b") and `OLLAMA_BASE_URL`
    /// (default "http://localhost:11434").
    pub fn from_env() -> Self {
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "qwen3:14b".to_string());
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self::new(model, Some(base_url))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: Option<f32>,
    num_predict: Option<usize>,
    stop: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl GenerationProvider for OllamaBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OllamaMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let body = OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: request.constraints.temperature,
                num_predict: request.constraints.max_tokens,
                stop: if request.constraints.stop_sequences.is_empty() {
                    None
                } else {
                    Some(request.constraints.stop_sequences.clone())
                },
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PoiesisError::Provider {
                provider_id: "ollama".to_string(),
                reason: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(PoiesisError::Provider {
                provider_id: "ollama".to_string(),
                reason: format!("HTTP {}: {}", status, text),
            });
        }

        let parsed: OllamaResponse = response.json().await.map_err(|e| PoiesisError::Provider {
            provider_id: "ollama".to_string(),
            reason: format!("malformed response: {}", e),
        })?;

        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(p), Some(c)) => Some(TokenUsage {
                prompt_tokens: p,
                completion_tokens: c,
                total_tokens: p + c,
            }),
            _ => None,
        };

        Ok(GenerationOutput {
            content: parsed.message.content,
            usage,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_id: "ollama".to_string(),
            model_name: self.model.clone(),
        }
    }
}
