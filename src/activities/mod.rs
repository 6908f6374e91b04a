//! Task handlers used by the bundled workflows.
//!
//! Everything here is side-effecting glue: reasoning-service calls, report
//! rendering and the flight-booking tool stubs. Workflows only reach these
//! through the engine's task dispatcher.

pub mod agent;
pub mod research;
pub mod tools;

use std::sync::Arc;

use crate::workflow::TaskHandler;

pub use agent::{parse_decision, AgentLlm, SelectToolTask, ValidateRequestTask};
pub use research::{ProduceContentTask, RenderDocumentTask, DEFAULT_REPORT_FILENAME};
pub use tools::ToolRegistry;

/// Task producing research content
pub const PRODUCE_CONTENT_TASK: &str = "produce_content";
/// Task rendering the report artifact
pub const RENDER_DOCUMENT_TASK: &str = "render_document";
/// Task checking a request against the agent's capabilities
pub const VALIDATE_REQUEST_TASK: &str = "validate_request";
/// Task asking the model for the next tool
pub const SELECT_TOOL_TASK: &str = "select_tool";

/// Handlers of the report and review workflows
pub fn research_tasks(
    produce: ProduceContentTask,
    render: RenderDocumentTask,
) -> Vec<(String, Arc<dyn TaskHandler>)> {
    vec![
        (PRODUCE_CONTENT_TASK.to_string(), Arc::new(produce)),
        (RENDER_DOCUMENT_TASK.to_string(), Arc::new(render)),
    ]
}

/// Handlers of the agentic workflow, including one per tool
pub fn agent_tasks(llm: AgentLlm, tools: &ToolRegistry) -> Vec<(String, Arc<dyn TaskHandler>)> {
    let mut handlers: Vec<(String, Arc<dyn TaskHandler>)> = vec![
        (
            VALIDATE_REQUEST_TASK.to_string(),
            Arc::new(ValidateRequestTask::new(llm.clone())),
        ),
        (SELECT_TOOL_TASK.to_string(), Arc::new(SelectToolTask::new(llm))),
    ];
    handlers.extend(tools.task_handlers());
    handlers
}
