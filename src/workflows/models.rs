//! Inputs, outputs and signal payloads of the bundled workflows

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signal carrying a human decision in the review workflow
pub const USER_DECISION_SIGNAL: &str = "user_decision_signal";

/// Query returning the latest produced research content
pub const GET_RESEARCH_RESULT_QUERY: &str = "get_research_result";

/// Query returning the agentic loop's step log
pub const GET_STEPS_QUERY: &str = "get_steps";

/// Decision sent by the reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserDecision {
    /// Approve the content
    Keep,
    /// Regenerate the content
    Edit,
    /// No decision yet
    Wait,
}

/// Payload of [`USER_DECISION_SIGNAL`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDecisionSignal {
    /// The decision
    pub decision: UserDecision,
    /// Instructions appended to the prompt on EDIT
    #[serde(default)]
    pub additional_prompt: String,
}

impl UserDecisionSignal {
    /// Approve the current content
    pub fn keep() -> Self {
        Self {
            decision: UserDecision::Keep,
            additional_prompt: String::new(),
        }
    }

    /// Regenerate with extra instructions
    pub fn edit(additional_prompt: impl Into<String>) -> Self {
        Self {
            decision: UserDecision::Edit,
            additional_prompt: additional_prompt.into(),
        }
    }

    /// A no-op decision
    pub fn wait() -> Self {
        Self {
            decision: UserDecision::Wait,
            additional_prompt: String::new(),
        }
    }
}

fn default_research_model() -> String {
    "openai/gpt-4o".to_string()
}

/// Input of the report and review workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReportInput {
    /// Research topic or question
    pub prompt: String,
    /// Model used to produce the content
    #[serde(default = "default_research_model")]
    pub llm_research_model: String,
    /// File name of the rendered report, relative to the output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl GenerateReportInput {
    /// Input with the default model and file name
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            llm_research_model: default_research_model(),
            filename: None,
        }
    }
}

/// Output of the report and review workflows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReportOutput {
    /// Human readable summary naming the artifact
    pub result: String,
}

/// Input of the `produce_content` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceContentInput {
    /// Prompt sent to the reasoning service
    pub prompt: String,
    /// Model to use
    pub model: String,
}

/// Input of the `render_document` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDocumentInput {
    /// Text to render
    pub content: String,
    /// Target file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One typed argument of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArgument {
    /// Argument name
    pub name: String,
    /// Type name shown to the model (`string`, `integer`)
    #[serde(rename = "type")]
    pub arg_type: String,
    /// What the argument means
    pub description: String,
}

impl ToolArgument {
    /// A string argument
    pub fn string(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            arg_type: "string".to_string(),
            description: description.to_string(),
        }
    }

    /// An integer argument
    pub fn integer(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            arg_type: "integer".to_string(),
            description: description.to_string(),
        }
    }
}

/// A tool the agent may select
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, also the task name it is dispatched under
    pub name: String,
    /// What the tool does
    pub description: String,
    /// Ordered arguments
    pub arguments: Vec<ToolArgument>,
    /// Whether a successful run of this tool achieves the goal
    #[serde(default)]
    pub completes_goal: bool,
}

/// Goal and capabilities of an agentic run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGoal {
    /// Agent display name
    pub agent_name: String,
    /// Tools in the order shown to the model
    pub tools: Vec<ToolDefinition>,
    /// The user's goal
    pub description: String,
    /// Persona prompt placed at the top of the selection prompt
    #[serde(default)]
    pub starter_prompt: String,
    /// Optional example conversation shown to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_conversation_history: Option<String>,
    /// Model override for the loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

impl AgentGoal {
    /// Look up a tool by exact name
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Resolve a name chosen by the model against the goal's tools
    pub fn resolve(&self, name: &str) -> ToolResolution<'_> {
        if name.trim().eq_ignore_ascii_case("DONE") {
            return ToolResolution::Done;
        }
        match self.tool(name) {
            Some(definition) => ToolResolution::Tool(definition),
            None => ToolResolution::Unknown(name.to_string()),
        }
    }
}

/// What a selected tool name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResolution<'a> {
    /// The model declared the goal complete
    Done,
    /// A tool of the goal
    Tool(&'a ToolDefinition),
    /// A name outside the goal's tool set
    Unknown(String),
}

/// A tool argument value; tools take strings or integers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    /// Integer argument
    Int(i64),
    /// String argument
    Text(String),
}

impl ToolValue {
    /// Coerce an arbitrary JSON value
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Text(n.to_string()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// The value as text
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// The value as an integer, parsing text if needed
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ToolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Tool parameters by argument name
pub type ToolParams = BTreeMap<String, ToolValue>;

/// Render parameters as `k=v, k=v`
pub fn format_params(params: &ToolParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The model's next action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDecision {
    /// Selected tool name or `DONE`
    pub tool: String,
    /// Extracted parameters
    #[serde(default)]
    pub parameters: ToolParams,
}

impl ToolDecision {
    /// The terminating decision
    pub fn done() -> Self {
        Self {
            tool: "DONE".to_string(),
            parameters: ToolParams::new(),
        }
    }

    /// Whether the model declared the goal complete
    pub fn is_done(&self) -> bool {
        self.tool.eq_ignore_ascii_case("DONE")
    }
}

/// Input of the `validate_request` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequestInput {
    /// Agent capabilities
    pub agent_goal: AgentGoal,
    /// The user's request
    pub user_prompt: String,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Output of the `validate_request` task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the agent can fulfil the request
    pub valid: bool,
    /// Raw answer of the model
    pub answer: String,
}

/// Input of the `select_tool` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectToolInput {
    /// Goal and tool set
    pub agent_goal: AgentGoal,
    /// Accumulated context of previous steps
    pub context: String,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Outcome of one executed tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The tool returned a result
    Succeeded {
        /// Tool output
        result: String,
    },
    /// The tool failed
    Failed {
        /// Raw error text
        error: String,
    },
}

/// One executed tool in the agentic loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Tool name
    pub tool: String,
    /// Parameters it ran with
    pub parameters: ToolParams,
    /// Structured outcome
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// Whether the tool is a goal-completing action
    pub completes_goal: bool,
}

impl StepRecord {
    /// Whether this step completed the goal
    pub fn achieved_goal(&self) -> bool {
        self.completes_goal && matches!(self.outcome, StepOutcome::Succeeded { .. })
    }

    /// One-line description for the step log
    pub fn describe(&self) -> String {
        match &self.outcome {
            StepOutcome::Succeeded { result } => {
                let mut desc = self.tool.clone();
                if !self.parameters.is_empty() {
                    desc.push_str(&format!(" ({})", format_params(&self.parameters)));
                }
                let preview: String = result.chars().take(80).collect();
                format!("{}: {}...", desc, preview)
            }
            StepOutcome::Failed { error } => format!("{} failed: {}", self.tool, error),
        }
    }
}

/// Output of the agentic workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingResult {
    /// Summary of what was accomplished
    pub message: String,
    /// Human readable step log
    pub steps_taken: Vec<String>,
    /// Structured step log
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// Whether a goal-completing action succeeded
    pub success: bool,
}
