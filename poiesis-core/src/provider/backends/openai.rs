//! OpenAI-compatible remote backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PoiesisError, Result};
use crate::provider::{
    GenerationOutput, GenerationProvider, GenerationRequest, ProviderInfo, TokenUsage,
};

/// OpenAI-compatible chat completion backend (metered remote).
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    /// Create a new backend against api.openai.com.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    /// Create against a custom OpenAI-compatible endpoint.
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (required), `OPENAI_MODEL` (default "gpt-4o"),
    /// and `OPENAI_BASE_URL` (optional).
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            PoiesisError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        match std::env::var("OPENAI_BASE_URL") {
            Ok(base_url) => Ok(Self::with_base_url(api_key, model, base_url)),
            Err(_) => Ok(Self::new(api_key, model)),
        }
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl GenerationProvider for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.constraints.temperature,
            max_tokens: request.constraints.max_tokens,
            stop: if request.constraints.stop_sequences.is_empty() {
                None
            } else {
                Some(request.constraints.stop_sequences.clone())
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PoiesisError::Provider {
                provider_id: "openai".to_string(),
                reason: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());

            let reason = match serde_json::from_str::<ApiError>(&text) {
                Ok(parsed) => format!("HTTP {}: {}", status, parsed.error.message),
                Err(_) => format!("HTTP {}: {}", status, text),
            };
            return Err(PoiesisError::Provider {
                provider_id: "openai".to_string(),
                reason,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| PoiesisError::Provider {
            provider_id: "openai".to_string(),
            reason: format!("malformed response: {}", e),
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| PoiesisError::Provider {
                provider_id: "openai".to_string(),
                reason: "response contained no choices".to_string(),
            })?;

        let usage = parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(GenerationOutput { content, usage })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        self.client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_id: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}
