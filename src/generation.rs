//! Hosted LLM generation.
//!
//! [`GenerationProvider`] is the seam to the model service; [`GenerationClient`]
//! wraps a provider with argument validation and maps transport failures into
//! [`CarelineError::Generation`]. There is exactly one attempt per call.
//!
//! The shipped provider, [`ChatCompletionsProvider`], speaks the
//! OpenAI-compatible `POST {base_url}/chat/completions` protocol, which covers
//! Groq (the default), OpenAI, and Ollama's `/v1` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::GenerationConfig;
use crate::error::{CarelineError, Result};

/// Maximum accepted user prompt length, in characters.
pub const MAX_USER_PROMPT_CHARS: usize = 10_000;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("no choices in response")]
    EmptyResponse,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

// ============ Chat completions provider ============

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatCompletionsProvider {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    client: Client,
}

impl ChatCompletionsProvider {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CarelineError::Initialization(format!("HTTP client: {}", e)))?;

        let provider = provider.into();
        let model = model.into();
        info!(provider = %provider, model = %model, "generation provider initialized");

        Ok(Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature,
            client,
        })
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the configured provider.
///
/// | Provider | Default base URL | Credential |
/// |----------|------------------|------------|
/// | `"groq"` | `https://api.groq.com/openai/v1` | required |
/// | `"openai"` | `https://api.openai.com/v1` | required |
/// | `"ollama"` | `http://localhost:11434/v1` | not used |
///
/// # Errors
///
/// [`CarelineError::Initialization`] when the credential environment variable
/// is unset for a provider that needs one, or the provider name is unknown.
pub fn create_provider(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    let (default_url, needs_key) = match config.provider.as_str() {
        "groq" => ("https://api.groq.com/openai/v1", true),
        "openai" => ("https://api.openai.com/v1", true),
        "ollama" => ("http://localhost:11434/v1", false),
        other => {
            return Err(CarelineError::Initialization(format!(
                "unknown generation provider: '{}'. Must be groq, openai, or ollama",
                other
            )))
        }
    };

    let api_key = match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ if needs_key => {
            return Err(CarelineError::Initialization(format!(
                "{} not found in environment variables",
                config.api_key_env
            )))
        }
        _ => None,
    };

    let provider = ChatCompletionsProvider::new(
        config.provider.clone(),
        config.base_url.as_deref().unwrap_or(default_url),
        api_key,
        config.model.clone(),
        config.temperature,
        Duration::from_secs(config.timeout_secs),
    )?;
    Ok(Arc::new(provider))
}

// ============ Client ============

/// Validating front for a [`GenerationProvider`]. Cheap to clone.
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if system_prompt.trim().is_empty() || user_prompt.trim().is_empty() {
            return Err(CarelineError::invalid(
                "both system prompt and user prompt are required",
            ));
        }
        if user_prompt.chars().count() > MAX_USER_PROMPT_CHARS {
            return Err(CarelineError::invalid(format!(
                "user prompt exceeds maximum length of {} characters",
                MAX_USER_PROMPT_CHARS
            )));
        }

        self.provider
            .complete(system_prompt, user_prompt)
            .await
            .map_err(|e| {
                error!(
                    provider = self.provider.provider_name(),
                    error = %e,
                    "LLM generation failed"
                );
                CarelineError::Generation(e.to_string())
            })
    }
}
