//! Agentic tool loop: validate the request, then let the model pick tools
//! until it declares the goal done or the iteration bound is reached.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::activities::{SELECT_TOOL_TASK, VALIDATE_REQUEST_TASK};
use crate::workflow::{
    TaskOptions, Workflow, WorkflowContext, WorkflowError, WorkflowInstance, WorkflowOutcome,
    WorkflowStatus,
};

use super::models::{
    format_params, AgentGoal, BookingResult, SelectToolInput, StepOutcome, StepRecord,
    ToolDecision, ToolResolution, ValidateRequestInput, ValidationResult, GET_STEPS_QUERY,
};

/// Registered name of [`AgentWorkflow`]
pub const AGENT_WORKFLOW: &str = "agent";

/// Default bound on tool-selection iterations
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

const REASONING_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the validate / select / execute loop for an [`AgentGoal`]
#[derive(Debug, Clone)]
pub struct AgentWorkflow {
    tool_timeout: Duration,
    max_iterations: u32,
}

impl Default for AgentWorkflow {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl AgentWorkflow {
    /// Tool tasks time out after `tool_timeout`
    pub fn new(tool_timeout: Duration) -> Self {
        Self {
            tool_timeout,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Override the iteration bound
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn rejection() -> BookingResult {
        BookingResult {
            message: "Request outside of agent capabilities".to_string(),
            steps_taken: vec!["Validation failed - request not compatible with agent".to_string()],
            steps: Vec::new(),
            success: false,
        }
    }

    fn summarize(goal: &AgentGoal, steps: Vec<StepRecord>) -> BookingResult {
        let success = steps.iter().any(StepRecord::achieved_goal);
        let mut steps_taken: Vec<String> = steps.iter().map(StepRecord::describe).collect();
        if steps_taken.is_empty() {
            steps_taken.push("No actions were taken".to_string());
        }
        let message = if success {
            format!("Successfully completed: {}", goal.description)
        } else {
            format!("Partially completed: {}", goal.description)
        };
        BookingResult {
            message,
            steps_taken,
            steps,
            success,
        }
    }

    async fn run_tool(
        &self,
        ctx: &WorkflowContext,
        decision: &ToolDecision,
        completes_goal: bool,
        context: &mut String,
    ) -> Result<StepRecord, WorkflowError> {
        let result = ctx
            .execute_task::<_, String>(
                &decision.tool,
                &decision.parameters,
                TaskOptions::with_timeout(self.tool_timeout),
            )
            .await;

        let outcome = match result {
            Ok(result) => {
                context.push_str(&format!("\n\nExecuted: {}", decision.tool));
                if !decision.parameters.is_empty() {
                    context.push_str(&format!(" with ({})", format_params(&decision.parameters)));
                }
                context.push_str(&format!("\nResult: {}", result));
                StepOutcome::Succeeded { result }
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(WorkflowError::Task { failure, .. }) => {
                if !ctx.is_replaying() {
                    warn!("Tool {} failed: {}", decision.tool, failure);
                }
                context.push_str(&format!(
                    "\nError executing {}: {}",
                    decision.tool, failure.message
                ));
                StepOutcome::Failed {
                    error: failure.message,
                }
            }
            Err(err) => return Err(err),
        };

        Ok(StepRecord {
            tool: decision.tool.clone(),
            parameters: decision.parameters.clone(),
            outcome,
            completes_goal,
        })
    }
}

#[async_trait]
impl Workflow for AgentWorkflow {
    fn name(&self) -> &str {
        AGENT_WORKFLOW
    }

    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome, WorkflowError> {
        let goal: AgentGoal =
            serde_json::from_value(input).map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;

        ctx.transition(WorkflowStatus::Validating, json!({ "goal": goal.description }))
            .await?;
        let validation: ValidationResult = ctx
            .execute_task(
                VALIDATE_REQUEST_TASK,
                &ValidateRequestInput {
                    agent_goal: goal.clone(),
                    user_prompt: goal.description.clone(),
                    model: goal.llm_model.clone(),
                },
                TaskOptions::with_timeout(REASONING_TIMEOUT),
            )
            .await?;

        if !validation.valid {
            if !ctx.is_replaying() {
                info!("Request rejected: {}", goal.description);
            }
            return Ok(WorkflowOutcome::rejected(serde_json::to_value(Self::rejection())?));
        }

        let mut context = String::new();
        let mut steps: Vec<StepRecord> = Vec::new();

        for iteration in 0..self.max_iterations {
            ctx.transition(
                WorkflowStatus::RunningToolLoop,
                json!({ "iteration": iteration + 1 }),
            )
            .await?;

            let decision: ToolDecision = ctx
                .execute_task(
                    SELECT_TOOL_TASK,
                    &SelectToolInput {
                        agent_goal: goal.clone(),
                        context: context.clone(),
                        model: goal.llm_model.clone(),
                    },
                    TaskOptions::with_timeout(REASONING_TIMEOUT),
                )
                .await?;

            // Goal tools without a registered handler count as unknown
            let resolution = match goal.resolve(&decision.tool) {
                ToolResolution::Tool(definition) if !ctx.has_task(&definition.name) => {
                    ToolResolution::Unknown(definition.name.clone())
                }
                resolution => resolution,
            };
            let completes_goal = match resolution {
                ToolResolution::Done => break,
                ToolResolution::Unknown(name) => {
                    if !ctx.is_replaying() {
                        warn!("Model selected unknown tool '{}'", name);
                    }
                    context.push_str(&format!("\nError: Unknown tool '{}'", name));
                    continue;
                }
                ToolResolution::Tool(definition) => definition.completes_goal,
            };

            let step = self.run_tool(&ctx, &decision, completes_goal, &mut context).await?;
            steps.push(step);

            let descriptions: Vec<String> = steps.iter().map(StepRecord::describe).collect();
            ctx.transition(
                WorkflowStatus::RunningToolLoop,
                json!({ "steps": descriptions }),
            )
            .await?;
        }

        let result = Self::summarize(&goal, steps);
        if !ctx.is_replaying() {
            info!("{}", result.message);
        }
        Ok(WorkflowOutcome::completed(serde_json::to_value(result)?))
    }

    fn query(&self, name: &str, instance: &WorkflowInstance) -> Option<Value> {
        match name {
            GET_STEPS_QUERY => Some(
                instance
                    .field("steps")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            ),
            _ => None,
        }
    }
}
