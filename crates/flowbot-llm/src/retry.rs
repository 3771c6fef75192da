use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use flowbot_core::config::{ModelConfig, RetryConfig};
use flowbot_core::error::{FlowbotError, Result};

use crate::client::{ChatClient, ChatMessage};

/// A chat client that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    primary: Box<dyn ChatClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn ChatClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn ChatClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn ChatClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &FlowbotError) -> bool {
    match e {
        FlowbotError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ChatClient for RetryingClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.complete(&config, messages.clone()).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.complete(fb_config, messages.clone()).await {
                    Ok(text) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| FlowbotError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails with the given error `failures` times, then answers "ok".
    struct Flaky {
        failures: usize,
        error: String,
        calls: Arc<AtomicUsize>,
    }

    impl ChatClient for Flaky {
        fn complete(&self, _: &ModelConfig, _: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if n < self.failures {
                Err(FlowbotError::LlmRequest(self.error.clone()))
            } else {
                Ok("ok".to_string())
            };
            Box::pin(async move { result })
        }
    }

    fn model() -> ModelConfig {
        toml::from_str("model_id = \"m\"").unwrap()
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&FlowbotError::LlmRequest("HTTP 429 Too Many Requests: slow down".into())));
        assert!(is_retryable(&FlowbotError::LlmRequest("timeout: operation timed out".into())));
        assert!(!is_retryable(&FlowbotError::LlmRequest("HTTP 401 Unauthorized: bad key".into())));
        assert!(!is_retryable(&FlowbotError::LlmParse("garbage".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 2,
                error: "HTTP 503 Service Unavailable: busy".into(),
                calls: calls.clone(),
            }),
            vec![],
            fast_retry(3),
        );
        assert_eq!(client.complete(&model(), vec![]).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_goes_to_fallback() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: usize::MAX,
                error: "HTTP 401 Unauthorized".into(),
                calls: primary_calls.clone(),
            }),
            vec![(
                model(),
                Box::new(Flaky {
                    failures: 0,
                    error: String::new(),
                    calls: fallback_calls.clone(),
                }) as Box<dyn ChatClient>,
            )],
            fast_retry(3),
        );
        assert_eq!(client.complete(&model(), vec![]).await.unwrap(), "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_everything_fails() {
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: usize::MAX,
                error: "HTTP 500 Internal Server Error".into(),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            vec![],
            fast_retry(1),
        );
        let err = client.complete(&model(), vec![]).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
