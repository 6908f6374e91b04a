use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use super::types::{Completion, CompletionRequest, LlmClient};

type Responder = Box<dyn Fn(&CompletionRequest) -> String + Send + Sync>;

/// Reasoning client that answers from a script.
///
/// Queued answers are returned in order; a queued `Err` simulates a
/// transient service failure. Once the queue is empty the fallback
/// responder (if any) answers. Every prompt is recorded.
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl fmt::Debug for ScriptedLlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLlmClient")
            .field("queued", &self.responses.lock().map(|q| q.len()).unwrap_or(0))
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmClient {
    /// A client with an empty script
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A client answering the given texts in order
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for response in responses {
            client.push_response(response);
        }
        client
    }

    /// Answer with `responder` once the queue is exhausted
    pub fn with_fallback<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> String + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(responder));
        self
    }

    /// Queue an answer
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response.into()));
        }
    }

    /// Queue a transient failure
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(message.into()));
        }
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of completions requested
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let prompt = request.last_user_message().unwrap_or_default().to_string();
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompt log poisoned"))?
            .push(prompt);

        let next = self
            .responses
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front();

        let content = match next {
            Some(Ok(text)) => text,
            Some(Err(message)) => return Err(anyhow!(message)),
            None => match &self.fallback {
                Some(responder) => responder(&request),
                None => return Err(anyhow!("no scripted response left")),
            },
        };

        debug!("Scripted completion for {}: {} chars", request.model, content.len());
        Ok(Completion {
            model: Some(request.model.clone()),
            ..Completion::text(content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let client = ScriptedLlmClient::with_responses(["first"])
            .with_fallback(|req| format!("echo: {}", req.last_user_message().unwrap_or("")));
        client.push_failure("503 Service Unavailable");

        let first = client
            .complete(CompletionRequest::prompt("m", "a"))
            .await
            .unwrap();
        assert_eq!(first.content, "first");

        let err = client
            .complete(CompletionRequest::prompt("m", "b"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));

        let third = client
            .complete(CompletionRequest::prompt("m", "c"))
            .await
            .unwrap();
        assert_eq!(third.content, "echo: c");
        assert_eq!(client.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let client = ScriptedLlmClient::new();
        assert!(client.complete(CompletionRequest::prompt("m", "x")).await.is_err());
        assert_eq!(client.calls(), 1);
    }
}
