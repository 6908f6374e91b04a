//! Reasoning tasks of the agentic loop: request validation and tool selection

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::llm::{CompletionRequest, LlmClient};
use crate::workflow::{TaskContext, TaskHandler};
use crate::workflows::models::{
    AgentGoal, SelectToolInput, ToolDecision, ToolParams, ToolValue, ValidateRequestInput,
    ValidationResult,
};

/// Shared reasoning settings of the agent tasks
#[derive(Clone)]
pub struct AgentLlm {
    client: Arc<dyn LlmClient>,
    default_model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl fmt::Debug for AgentLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLlm")
            .field("client", &self.client)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl AgentLlm {
    /// Create the settings
    pub fn new(client: Arc<dyn LlmClient>, default_model: impl Into<String>) -> Self {
        Self {
            client,
            default_model: default_model.into(),
            api_key: None,
            temperature: 0.1,
        }
    }

    /// Set the API key sent with every request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn ask(&self, model: Option<&str>, prompt: String) -> Result<String> {
        let model = model.unwrap_or(&self.default_model);
        let request = CompletionRequest::prompt(model, prompt)
            .with_temperature(self.temperature)
            .with_api_key(self.api_key.clone());
        let completion = self.client.complete(request).await?;
        Ok(completion.content)
    }
}

/// Prompt asking whether the agent can fulfil `user_prompt`
pub fn validation_prompt(goal: &AgentGoal, user_prompt: &str) -> String {
    let mut capabilities = format!(
        "Agent: {}\nPurpose: {}\nAvailable tools:\n",
        goal.agent_name, goal.description
    );
    for tool in &goal.tools {
        capabilities.push_str(&format!("  - {}: {}\n", tool.name, tool.description));
    }

    format!(
        "Given this agent's capabilities:\n{}\n\nAnd this user request:\n\"{}\"\n\n\
         Can this agent fulfill this request with its available tools? \n\
         Respond with only YES or NO.",
        capabilities, user_prompt
    )
}

/// Prompt asking for the next tool given the accumulated `context`
pub fn selection_prompt(goal: &AgentGoal, context: &str) -> String {
    let tools_text = goal
        .tools
        .iter()
        .map(|tool| {
            let arguments = tool
                .arguments
                .iter()
                .map(|arg| format!("{} ({}): {}", arg.name, arg.arg_type, arg.description))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Tool: {}\nDescription: {}\nArguments: {}",
                tool.name, tool.description, arguments
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let agent_name = if goal.agent_name.is_empty() {
        "an AI agent"
    } else {
        goal.agent_name.as_str()
    };
    let examples = match goal.example_conversation_history.as_deref() {
        Some(history) if !history.is_empty() => format!("Example interactions: {}", history),
        _ => String::new(),
    };
    let context = if context.is_empty() {
        "Just starting - no actions taken yet"
    } else {
        context
    };

    format!(
        "{}\n\nYou are {}.\nGoal: {}\n\n{}\n\nAvailable tools:\n{}\n\nCurrent context:\n{}\n\n\
         Based on the goal and context, decide the next action.\n\
         Return a JSON object with:\n\
         - \"tool\": the tool name to use (or \"DONE\" if complete)  \n\
         - \"parameters\": an object with the required parameters\n\n\
         Return ONLY the JSON object.",
        goal.starter_prompt, agent_name, goal.description, examples, tools_text, context
    )
}

/// Parse the model's answer into a decision.
///
/// Non-JSON answers fall back to `DONE` when they mention it, otherwise the
/// whole answer is taken as a tool name with no parameters.
pub fn parse_decision(answer: &str) -> ToolDecision {
    let text = answer.trim();

    let parsed = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        serde_json::from_str(text.get(start..=end)?).ok()
    });

    match parsed {
        Some(Value::Object(map)) => {
            let tool = map
                .get("tool")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let parameters: ToolParams = match map.get("parameters") {
                Some(Value::Object(params)) => params
                    .iter()
                    .map(|(k, v)| (k.clone(), ToolValue::from_json(v)))
                    .collect(),
                _ => ToolParams::new(),
            };
            ToolDecision { tool, parameters }
        }
        _ if text.to_uppercase().contains("DONE") => ToolDecision::done(),
        _ => {
            warn!("Selection answer is not JSON, using it as a tool name");
            ToolDecision {
                tool: text.to_string(),
                parameters: ToolParams::new(),
            }
        }
    }
}

/// `validate_request` task
#[derive(Debug, Clone)]
pub struct ValidateRequestTask {
    llm: AgentLlm,
}

impl ValidateRequestTask {
    /// Create the task
    pub fn new(llm: AgentLlm) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskHandler for ValidateRequestTask {
    #[instrument(skip(self, ctx, input), fields(instance_id = %ctx.instance_id))]
    async fn execute(&self, ctx: TaskContext, input: Value) -> Result<Value> {
        let input: ValidateRequestInput =
            serde_json::from_value(input).context("invalid validate_request input")?;

        let prompt = validation_prompt(&input.agent_goal, &input.user_prompt);
        let answer = self.llm.ask(input.model.as_deref(), prompt).await?;
        let valid = answer.trim().to_uppercase().contains("YES");

        info!("Request validation: {}", if valid { "accepted" } else { "rejected" });
        Ok(serde_json::to_value(ValidationResult { valid, answer })?)
    }
}

/// `select_tool` task
#[derive(Debug, Clone)]
pub struct SelectToolTask {
    llm: AgentLlm,
}

impl SelectToolTask {
    /// Create the task
    pub fn new(llm: AgentLlm) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskHandler for SelectToolTask {
    #[instrument(skip(self, ctx, input), fields(instance_id = %ctx.instance_id))]
    async fn execute(&self, ctx: TaskContext, input: Value) -> Result<Value> {
        let input: SelectToolInput =
            serde_json::from_value(input).context("invalid select_tool input")?;

        let prompt = selection_prompt(&input.agent_goal, &input.context);
        let answer = self.llm.ask(input.model.as_deref(), prompt).await?;
        debug!("Selection answer: {}", answer);

        let decision = parse_decision(&answer);
        info!("Selected tool: {}", decision.tool);
        Ok(serde_json::to_value(decision)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::tools::ToolRegistry;
    use crate::llm::ScriptedLlmClient;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn goal() -> AgentGoal {
        AgentGoal {
            agent_name: "Travel Booking Assistant".into(),
            tools: ToolRegistry::flight_booking().definitions().to_vec(),
            description: "Book a flight from NYC to London for tomorrow".into(),
            starter_prompt: "You are an expert travel agent.".into(),
            example_conversation_history: None,
            llm_model: None,
        }
    }

    fn ctx(name: &str) -> TaskContext {
        TaskContext {
            instance_id: "agent-1".into(),
            task_name: name.into(),
            task_seq: 1,
            attempt: 1,
            cancellation: CancellationToken::new(),
        }
    }

    #[test]
    fn test_parse_decision() {
        let decision =
            parse_decision(r#"{"tool": "book_flight", "parameters": {"flight_id": "UA456", "passengers": 2}}"#);
        assert_eq!(decision.tool, "book_flight");
        assert_eq!(decision.parameters["passengers"], ToolValue::Int(2));

        let fenced = parse_decision("```json\n{\"tool\": \"DONE\"}\n```");
        assert!(fenced.is_done());

        let odd = parse_decision(r#"{"tool": 5, "parameters": "x"}"#);
        assert_eq!(odd.tool, "");
        assert!(odd.parameters.is_empty());

        assert!(parse_decision("I think we are done here").is_done());
        assert_eq!(parse_decision(" search_flights ").tool, "search_flights");
    }

    #[test]
    fn test_selection_prompt_layout() {
        let prompt = selection_prompt(&goal(), "");
        assert!(prompt.starts_with("You are an expert travel agent.\n\nYou are Travel Booking Assistant.\n"));
        assert!(prompt.contains("Tool: search_flights\nDescription: Search for flights"));
        assert!(prompt.contains("passengers (integer): Number of passengers (default: 1)"));
        assert!(prompt.contains("Current context:\nJust starting - no actions taken yet"));
        assert!(prompt.ends_with("Return ONLY the JSON object."));

        let mut anonymous = goal();
        anonymous.agent_name.clear();
        anonymous.example_conversation_history = Some("User: hi".into());
        let prompt = selection_prompt(&anonymous, "\n\nExecuted: search_flights");
        assert!(prompt.contains("You are an AI agent."));
        assert!(prompt.contains("Example interactions: User: hi"));
        assert!(prompt.contains("Executed: search_flights"));
    }

    #[tokio::test]
    async fn test_validation_task() {
        let client = Arc::new(ScriptedLlmClient::with_responses(["yes.", "NO"]));
        let task = ValidateRequestTask::new(AgentLlm::new(client.clone(), "openai/gpt-4o-mini"));
        let input = json!({"agent_goal": goal(), "user_prompt": "Book me a flight"});

        let accepted: ValidationResult =
            serde_json::from_value(task.execute(ctx("validate_request"), input.clone()).await.unwrap()).unwrap();
        assert!(accepted.valid);

        let rejected: ValidationResult =
            serde_json::from_value(task.execute(ctx("validate_request"), input).await.unwrap()).unwrap();
        assert!(!rejected.valid);

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("  - book_flight: Book a specific flight\n"));
        assert!(prompt.contains("\"Book me a flight\""));
    }

    #[tokio::test]
    async fn test_selection_task() {
        let client = Arc::new(ScriptedLlmClient::with_responses([
            r#"{"tool": "search_flights", "parameters": {"origin": "NYC"}}"#,
        ]));
        let task = SelectToolTask::new(AgentLlm::new(client, "openai/gpt-4o-mini"));

        let output = task
            .execute(ctx("select_tool"), json!({"agent_goal": goal(), "context": ""}))
            .await
            .unwrap();
        let decision: ToolDecision = serde_json::from_value(output).unwrap();
        assert_eq!(decision.tool, "search_flights");
        assert_eq!(decision.parameters["origin"], ToolValue::Text("NYC".into()));
    }
}
