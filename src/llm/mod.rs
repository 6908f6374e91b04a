//! Reasoning-service clients.
//!
//! `LlmClient` is the seam the activities call through. An OpenAI-compatible
//! HTTP client is available with the `llm-http` feature; the scripted client
//! backs offline runs and tests.

#[cfg(feature = "llm-http")]
pub mod openai;
/// Scripted client for offline runs and tests
pub mod scripted;
/// Common types for LLM integrations
pub mod types;

#[cfg(feature = "llm-http")]
pub use openai::OpenAiClient;
pub use scripted::ScriptedLlmClient;
pub use types::{Completion, CompletionRequest, LlmClient, LlmConfig, Message, MessageRole};
