//! The bundled workflows.
//!
//! - [`ReportWorkflow`]: produce content, render it.
//! - [`ReviewWorkflow`]: produce content and loop on reviewer decisions.
//! - [`AgentWorkflow`]: validate a goal, then run a bounded tool-selection loop.

pub mod agentic;
pub mod models;
pub mod report;
pub mod review;

pub use agentic::{AgentWorkflow, AGENT_WORKFLOW, DEFAULT_MAX_ITERATIONS};
pub use models::{
    AgentGoal, BookingResult, GenerateReportInput, GenerateReportOutput, StepOutcome, StepRecord,
    ToolArgument, ToolDecision, ToolDefinition, ToolParams, ToolValue, UserDecision,
    UserDecisionSignal, GET_RESEARCH_RESULT_QUERY, GET_STEPS_QUERY, USER_DECISION_SIGNAL,
};
pub use report::{ReportWorkflow, REPORT_WORKFLOW};
pub use review::{ReviewWorkflow, REVIEW_WORKFLOW};
