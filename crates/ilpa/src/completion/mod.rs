//! Completion gateways
//!
//! The coach only needs "prompt in, text out". Providers:
//! - `OpenAiGateway`: any OpenAI-compatible chat completions endpoint
//! - `AnthropicGateway`: the Anthropic messages API

pub mod anthropic;
pub mod openai;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::warn;

use crate::config::{CompletionConfig, CompletionProvider};

pub use anthropic::AnthropicGateway;
pub use openai::OpenAiGateway;

/// Failures from a completion provider. Callers treat every variant the same.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("completion timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("gateway configuration error: {0}")]
    Config(String),
}

/// Sampling parameters sent with every generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl SamplingParams {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// Text-completion capability
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Generate a reply for `prompt`. The text is trimmed and never empty.
    async fn generate(&self, prompt: &str, params: SamplingParams)
    -> Result<String, GatewayError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Build the gateway selected in config
pub fn build_gateway(
    config: &CompletionConfig,
) -> Result<Arc<dyn CompletionGateway>, GatewayError> {
    let gateway: Arc<dyn CompletionGateway> = match config.provider {
        CompletionProvider::OpenAi => Arc::new(OpenAiGateway::new(config)?),
        CompletionProvider::Anthropic => Arc::new(AnthropicGateway::new(config)?),
    };
    Ok(gateway)
}

pub(crate) fn api_key_from_env(config: &CompletionConfig) -> Result<String, GatewayError> {
    env::var(&config.api_key_env).map_err(|_| {
        GatewayError::Config(format!("API key env var '{}' not set", config.api_key_env))
    })
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GatewayError::Config(e.to_string()))
}

/// Send a request, retrying 429s and transport errors with exponential backoff.
///
/// `max_retries` counts retries after the first attempt. Non-429 error statuses
/// fail immediately.
pub(crate) async fn send_with_retry<F>(
    provider: &str,
    max_retries: u32,
    initial_backoff: Duration,
    build: F,
) -> Result<Response, GatewayError>
where
    F: Fn() -> RequestBuilder,
{
    let mut delay = initial_backoff;
    let mut last_error = GatewayError::Provider("no request attempted".to_string());

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(
                        "{provider} rate limited on attempt {}/{}",
                        attempt + 1,
                        max_retries + 1
                    );
                    last_error = GatewayError::RateLimited(format!(
                        "{provider} returned 429 after {} attempts",
                        attempt + 1
                    ));
                    continue;
                }

                if !status.is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(GatewayError::Provider(format!(
                        "{provider} returned {status}: {error_text}"
                    )));
                }

                return Ok(response);
            }
            Err(e) => {
                warn!(
                    "{provider} request failed on attempt {}/{}: {e}",
                    attempt + 1,
                    max_retries + 1
                );
                last_error = if e.is_timeout() {
                    GatewayError::Timeout(e.to_string())
                } else {
                    GatewayError::Provider(e.to_string())
                };
            }
        }
    }

    Err(last_error)
}

/// Trim generated text, rejecting empty output
pub(crate) fn non_empty(provider: &str, text: &str) -> Result<String, GatewayError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Provider(format!(
            "{provider} returned an empty completion"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_params_from_config() {
        let config = CompletionConfig {
            max_tokens: 256,
            temperature: 0.2,
            ..CompletionConfig::default()
        };
        let params = SamplingParams::from_config(&config);
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.temperature, 0.2);
        assert_eq!(
            SamplingParams::default(),
            SamplingParams::from_config(&CompletionConfig::default())
        );
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty("test", "  hello \n").unwrap(), "hello");
        assert!(matches!(
            non_empty("test", " \n\t "),
            Err(GatewayError::Provider(_))
        ));
    }

    #[test]
    fn test_build_gateway_missing_key() {
        let config = CompletionConfig {
            api_key_env: "ILPA_TEST_MISSING_KEY".to_string(),
            ..CompletionConfig::default()
        };
        unsafe { env::remove_var("ILPA_TEST_MISSING_KEY") };

        let err = build_gateway(&config).err().unwrap();
        assert!(matches!(err, GatewayError::Config(ref msg) if msg.contains("ILPA_TEST_MISSING_KEY")));
    }
}
