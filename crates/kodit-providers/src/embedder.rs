//! Embedding provider contract and OpenAI-compatible implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use kodit_config::EndpointConfig;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::{with_retries, RetryConfig};

/// Embedding generation contract
///
/// Implementations accept batches up to the configured character budget
/// and return vectors in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>>;

    /// Character budget a single batch must stay under
    fn max_batch_chars(&self) -> usize;

    /// One tiny round-trip to prove the endpoint works at startup
    async fn validate(&self) -> ProviderResult<()> {
        self.embed(&["ping".to_string()]).await.map(drop)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client (OpenAI, vLLM, Ollama, ...)
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_batch_chars: usize,
    retry: RetryConfig,
}

impl OpenAiEmbedder {
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
            max_batch_chars: config.max_batch_chars,
            retry: RetryConfig {
                max_retries: config.max_retries,
                initial: Duration::from_secs(2),
                factor: 2.0,
            },
        })
    }

    async fn request(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                },
                code => ProviderError::from_status(code, body),
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Providers may stream results out of order; the index field is
        // authoritative
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retries(&self.retry, "embeddings", || self.request(texts)).await
    }

    fn max_batch_chars(&self) -> usize {
        self.max_batch_chars
    }
}
