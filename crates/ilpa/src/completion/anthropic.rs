//! Anthropic messages API gateway

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicGateway {
    client: Client,
    config: CompletionConfig,
    api_key: String,
    initial_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGateway {
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
            "Anthropic gateway initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            initial_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }
}

#[async_trait]
impl CompletionGateway for AnthropicGateway {
    async fn generate(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, GatewayError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.config.api_url.trim_end_matches('/'));
        debug!("Calling completion API at: {}", url);

        let response = send_with_retry(
            self.name(),
            self.config.max_retries,
            self.initial_backoff,
            || {
                self.client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request)
            },
        )
        .await?;

        let message: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("Failed to parse response: {e}")))?;

        let text: String = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        non_empty(self.name(), &text)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
