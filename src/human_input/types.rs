use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A question put to the reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInputRequest {
    /// Correlates the answer with the question
    pub request_id: String,

    /// Text shown right before the cursor
    pub prompt: String,

    /// Block printed above the prompt, e.g. the review menu
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Workflow instance the answer is for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl HumanInputRequest {
    /// A request with a fresh id
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            description: None,
            instance_id: None,
        }
    }

    /// Print `description` above the prompt
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Tag the request with the instance it belongs to
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }
}

/// The reviewer's answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInputResponse {
    /// Id of the request answered
    pub request_id: String,

    /// Answer text, trimmed
    pub response: String,
}

impl HumanInputResponse {
    /// Answer `request_id` with `response`
    pub fn new(request_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            response: response.into(),
        }
    }
}

/// Source of reviewer answers
#[async_trait]
pub trait HumanInputHandler: Send + Sync {
    /// Ask one question and wait for the answer
    async fn handle_request(
        &self,
        request: HumanInputRequest,
    ) -> anyhow::Result<HumanInputResponse>;
}

/// Menu choice in the interactive review loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewChoice {
    /// Approve the content and render it
    Keep,
    /// Regenerate with extra instructions
    Edit,
    /// Show the latest content
    Query,
}

impl ReviewChoice {
    /// Parse a console answer; accepts the word or the menu number
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "keep" | "1" => Some(Self::Keep),
            "edit" | "2" => Some(Self::Edit),
            "query" | "3" => Some(Self::Query),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HumanInputRequest::new("Your decision (keep/edit/query):")
            .with_description("Research is complete!")
            .with_instance_id("review-123");

        assert_eq!(request.prompt, "Your decision (keep/edit/query):");
        assert_eq!(request.description.as_deref(), Some("Research is complete!"));
        assert_eq!(request.instance_id.as_deref(), Some("review-123"));
        assert_ne!(request.request_id, HumanInputRequest::new("x").request_id);
    }

    #[test]
    fn test_review_choice_parsing() {
        assert_eq!(ReviewChoice::parse("keep"), Some(ReviewChoice::Keep));
        assert_eq!(ReviewChoice::parse(" 2 "), Some(ReviewChoice::Edit));
        assert_eq!(ReviewChoice::parse("QUERY"), Some(ReviewChoice::Query));
        assert_eq!(ReviewChoice::parse("wait"), None);
        assert_eq!(ReviewChoice::parse(""), None);
    }
}
