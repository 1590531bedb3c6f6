//! Retry loop for provider calls
//!
//! Exponential backoff `initial * factor^n`, capped; only retryable
//! errors (429, 5xx, timeouts) re-enter the loop.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(2),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(secs).min(MAX_BACKOFF)
    }
}

/// Run `operation` with retries; non-retryable errors short-circuit
pub async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    description: &str,
    operation: F,
) -> ProviderResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < config.max_retries => {
                let backoff = match &error {
                    ProviderError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => Duration::from_secs(*secs).min(MAX_BACKOFF),
                    _ => config.backoff(attempt),
                };
                attempt += 1;
                tracing::warn!(
                    description,
                    attempt,
                    max = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) if error.is_retryable() => {
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial: Duration::from_millis(1),
            factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&fast_config(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Transient {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = with_retries(&fast_config(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected {
                status: 401,
                message: "bad key".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let result: ProviderResult<()> = with_retries(&fast_config(2), "test", || async {
            Err(ProviderError::Transient {
                status: 500,
                message: "down".into(),
            })
        })
        .await;

        match result {
            Err(ProviderError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
