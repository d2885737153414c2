//! OpenAI-compatible chat completions gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::completion::{
    CompletionGateway, GatewayError, SamplingParams, api_key_from_env, http_client, non_empty,
    send_with_retry,
};
use crate::config::CompletionConfig;

/// Gateway for any endpoint speaking the OpenAI chat completions protocol
#[derive(Debug)]
pub struct OpenAiGateway {
    client: Client,
    config: CompletionConfig,
    api_key: String,
    initial_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGateway {
    /// Create a gateway reading the API key from `config.api_key_env`
    pub fn new(config: &CompletionConfig) -> Result<Self, GatewayError> {
        let api_key = api_key_from_env(config)?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &CompletionConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let client = http_client(config.timeout_secs)?;

        info!(
            "OpenAI gateway initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Change the first retry delay (doubles on each retry)
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    async fn generate(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, GatewayError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Calling completion API at: {}", url);

        let response = send_with_retry(
            self.name(),
            self.config.max_retries,
            self.initial_backoff,
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            },
        )
        .await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("Failed to parse response: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        non_empty(self.name(), &content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(api_url: String, max_retries: u32) -> OpenAiGateway {
        let config = CompletionConfig {
            api_url,
            max_retries,
            timeout_secs: 5,
            ..CompletionConfig::default()
        };
        OpenAiGateway::with_api_key(&config, "test-key")
            .unwrap()
            .with_backoff(Duration::from_millis(10))
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": content }
            }]
        })
    }

    #[tokio::test]
    async fn test_generate_sends_prompt_and_sampling() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 500,
                "messages": [{ "role": "user", "content": "How was your day?" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Great question!  ")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = gateway(mock_server.uri(), 0)
            .generate("How was your day?", SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "Great question!");
    }

    #[tokio::test]
    async fn test_trailing_slash_in_api_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&mock_server)
            .await;

        let reply = gateway(format!("{}/", mock_server.uri()), 0)
            .generate("hi", SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = gateway(mock_server.uri(), 2)
            .generate("hi", SamplingParams::default())
            .await;
        assert!(matches!(result, Err(GatewayError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = gateway(mock_server.uri(), 3)
            .generate("hi", SamplingParams::default())
            .await;
        assert!(matches!(result, Err(GatewayError::Provider(ref msg)) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_empty_completion_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let result = gateway(mock_server.uri(), 0)
            .generate("hi", SamplingParams::default())
            .await;
        assert!(matches!(result, Err(GatewayError::Provider(_))));
    }
}
