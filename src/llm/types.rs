//! Request and response types shared by reasoning-service clients

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions framing the conversation
    System,
    /// Prompt text
    User,
    /// Earlier model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Author
    pub role: MessageRole,
    /// Text
    pub content: String,
}

impl Message {
    /// A prompt message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Configuration for the reasoning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model used to produce research content
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used by the agentic loop
    #[serde(default = "default_agent_model")]
    pub agent_model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key for authentication. Never written to the durability log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature for the agentic loop
    #[serde(default = "default_agent_temperature")]
    pub agent_temperature: f32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "openai/gpt-4o".to_string()
}

fn default_agent_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_api_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_agent_temperature() -> f32 {
    0.1
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            agent_model: default_agent_model(),
            api_url: default_api_url(),
            api_key: None,
            agent_temperature: default_agent_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// A completion request to the reasoning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use, optionally with a provider prefix (`openai/gpt-4o`)
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature for sampling (higher = more random)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Per-request API key overriding the client's
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl CompletionRequest {
    /// A single-prompt request
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            max_tokens: None,
            temperature: None,
            api_key: None,
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the API key for this request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Text of the last user message
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Model name without its provider prefix
    pub fn provider_model(&self) -> &str {
        self.model
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.model)
    }
}

/// Text generated by the reasoning service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub content: String,

    /// Model that answered, as reported by the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Why generation stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Prompt plus completion tokens, if reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

impl Completion {
    /// A completion with only text
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Reasoning-service client the activities call through
#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug + 'static {
    /// Generate a completion. May fail transiently.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}
