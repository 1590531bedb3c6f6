//! In-memory provider fakes for tests
//!
//! Deterministic and offline: the mock embedder derives a vector from a
//! hash of the text, so equal inputs embed equally across runs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::embedder::Embedder;
use crate::error::{ProviderError, ProviderResult};
use crate::generator::{ChatCompletion, ChatMessage, TextGenerator, Usage};

/// Deterministic embedder; optionally fails batches containing marked
/// texts so batch-failure paths can be exercised
pub struct MockEmbedder {
    dimension: usize,
    max_batch_chars: usize,
    poison: HashSet<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_batch_chars: 32_768,
            poison: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_batch_chars(mut self, max_batch_chars: usize) -> Self {
        self.max_batch_chars = max_batch_chars;
        self
    }

    /// Any batch containing `text` will fail with a transient error
    pub fn poison(mut self, text: impl Into<String>) -> Self {
        self.poison.insert(text.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // Cheap deterministic pseudo-embedding from a rolling hash
        let mut state: u64 = 1469598103934665603;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(1099511628211);
        }
        (0..self.dimension)
            .map(|i| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(i as u64);
                ((state >> 33) as f32 / u32::MAX as f32) - 0.5
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if texts.iter().any(|t| self.poison.contains(t)) {
            return Err(ProviderError::Transient {
                status: 500,
                message: "poisoned batch".into(),
            });
        }

        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn max_batch_chars(&self) -> usize {
        self.max_batch_chars
    }
}

/// Canned text generator that records its prompts
pub struct MockTextGenerator {
    pub prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl MockTextGenerator {
    pub const fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub const fn failing() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _max_tokens: Option<u32>,
        _temperature: Option<f32>,
    ) -> ProviderResult<ChatCompletion> {
        if self.fail {
            return Err(ProviderError::Transient {
                status: 500,
                message: "generator down".into(),
            });
        }

        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().expect("mock lock").push(user.clone());

        let gist: String = user.chars().take(48).collect();
        Ok(ChatCompletion {
            content: format!("Summary: {gist}"),
            usage: Usage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(8);
        let a = embedder.embed(&["hello".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello".to_string()]).await.unwrap();
        let c = embedder.embed(&["world".to_string()]).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0].len(), 8);
        assert_eq!(embedder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_poisoned_batch_fails() {
        let embedder = MockEmbedder::new(4).poison("bad");
        let err = embedder
            .embed(&["ok".to_string(), "bad".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_mock_generator_summarises_user_message() {
        let generator = MockTextGenerator::new();
        let completion = generator
            .chat_completion(
                &[
                    ChatMessage::system("You summarise code."),
                    ChatMessage::user("fn add(a: i32, b: i32) -> i32 { a + b }"),
                ],
                None,
                None,
            )
            .await
            .unwrap();

        assert!(completion.content.starts_with("Summary: fn add"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }
}
