use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::telemetry::add_metric;

use super::types::{Completion, CompletionRequest, LlmClient, LlmConfig, Message};

/// Client for OpenAI-compatible chat completion APIs
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    /// Configuration for the client
    config: LlmConfig,

    /// HTTP client for making requests
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    fn chat_messages(messages: &[Message]) -> Vec<ChatMessage<'_>> {
        messages
            .iter()
            .map(|msg| ChatMessage {
                role: msg.role.as_str(),
                content: &msg.content,
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let start = std::time::Instant::now();

        let api_url = format!("{}/v1/chat/completions", self.config.api_url.trim_end_matches('/'));
        debug!("Sending request to {}", api_url);

        let body = ChatRequest {
            model: request.provider_model(),
            messages: Self::chat_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut http = self.client.post(&api_url).json(&body);
        if let Some(key) = request.api_key.as_ref().or(self.config.api_key.as_ref()) {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response.text().await?;
            error!("Completion API error ({}): {}", status, error_text);
            return Err(anyhow!("Completion API error ({}): {}", status, error_text));
        }

        let chat: ChatResponse = response.json().await?;
        let duration = start.elapsed();

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Completion API returned no choices"))?;

        add_metric(
            "llm_request_duration_ms",
            duration.as_millis() as f64,
            &[("model", request.model.clone()), ("provider", "openai".to_string())],
        );

        let total_tokens = chat.usage.and_then(|u| u.total_tokens);
        if let Some(tokens) = total_tokens {
            add_metric(
                "llm_tokens_total",
                tokens as f64,
                &[("model", request.model.clone()), ("provider", "openai".to_string())],
            );
        }

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: chat.model,
            finish_reason: choice.finish_reason,
            total_tokens,
        })
    }
}

impl OpenAiClient {
    /// Whether the models endpoint answers
    pub async fn is_available(&self) -> bool {
        let api_url = format!("{}/v1/models", self.config.api_url.trim_end_matches('/'));
        debug!("Checking completion API availability: {}", api_url);

        let mut http = self.client.get(&api_url);
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }

        match http.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Completion API not available: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with LLM_API_KEY set and network access
    async fn test_openai_basic_completion() {
        let config = LlmConfig {
            api_key: std::env::var("LLM_API_KEY").ok(),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::new(config).unwrap();

        if !client.is_available().await {
            return;
        }

        let completion = client
            .complete(CompletionRequest::prompt("openai/gpt-4o-mini", "Say hello"))
            .await
            .unwrap();
        assert!(!completion.content.is_empty());
    }
}
