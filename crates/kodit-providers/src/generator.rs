//! Text generation contract and OpenAI-compatible implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use kodit_config::EndpointConfig;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::{with_retries, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Usage,
}

/// Chat completion contract used for enrichment
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> ProviderResult<ChatCompletion>;

    /// Startup round-trip check
    async fn validate(&self) -> ProviderResult<()> {
        self.chat_completion(&[ChatMessage::user("ping")], Some(1), Some(0.0))
            .await
            .map(drop)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAiTextGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl OpenAiTextGenerator {
    /// Build from an endpoint configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &EndpointConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            retry: RetryConfig {
                max_retries: config.max_retries,
                initial: Duration::from_secs(2),
                factor: 2.0,
            },
        })
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> ProviderResult<ChatCompletion> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages,
                max_tokens,
                temperature,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?;

        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> ProviderResult<ChatCompletion> {
        with_retries(&self.retry, "chat_completion", || {
            self.request(messages, max_tokens, temperature)
        })
        .await
    }
}
