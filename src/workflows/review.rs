//! Human-in-the-loop research: content is regenerated until a reviewer keeps it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::workflow::{
    Workflow, WorkflowContext, WorkflowError, WorkflowInstance, WorkflowOutcome, WorkflowStatus,
};

use super::models::{UserDecision, UserDecisionSignal, GET_RESEARCH_RESULT_QUERY, USER_DECISION_SIGNAL};
use super::report::{parse_input, produce, render};

/// Registered name of [`ReviewWorkflow`]
pub const REVIEW_WORKFLOW: &str = "review";

/// Append reviewer instructions to the working prompt
pub fn edited_prompt(prompt: &str, additional: &str) -> String {
    if additional.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n\nAdditional instructions: {}", prompt, additional)
    }
}

/// Produces research content, then waits for KEEP or EDIT decisions.
///
/// The latest content is available through the `get_research_result` query;
/// before the first production it answers `null`.
#[derive(Debug, Clone, Default)]
pub struct ReviewWorkflow;

impl ReviewWorkflow {
    async fn next_decision(ctx: &WorkflowContext) -> Result<UserDecisionSignal, WorkflowError> {
        loop {
            let envelope = ctx.wait_for_signal(USER_DECISION_SIGNAL).await?;
            match envelope.payload_as::<UserDecisionSignal>() {
                Ok(signal) if signal.decision != UserDecision::Wait => return Ok(signal),
                Ok(_) => continue,
                Err(e) => {
                    if !ctx.is_replaying() {
                        warn!("Ignoring malformed decision #{}: {}", envelope.arrival_seq, e);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Workflow for ReviewWorkflow {
    fn name(&self) -> &str {
        REVIEW_WORKFLOW
    }

    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome, WorkflowError> {
        let input = parse_input(input)?;
        let mut prompt = input.prompt.clone();
        let mut revision: u32 = 0;

        let content = loop {
            revision += 1;
            ctx.transition(
                WorkflowStatus::Researching,
                json!({ "prompt": prompt, "revision": revision }),
            )
            .await?;

            let content = produce(&ctx, &prompt, &input.llm_research_model).await?;
            ctx.transition(
                WorkflowStatus::AwaitingDecision,
                json!({ "research_result": content }),
            )
            .await?;

            let signal = Self::next_decision(&ctx).await?;
            match signal.decision {
                UserDecision::Keep => break content,
                _ => {
                    if !ctx.is_replaying() {
                        info!("Regenerating research, revision {}", revision + 1);
                    }
                    prompt = edited_prompt(&prompt, &signal.additional_prompt);
                }
            }
        };

        render(&ctx, content, input.filename).await
    }

    fn query(&self, name: &str, instance: &WorkflowInstance) -> Option<Value> {
        match name {
            GET_RESEARCH_RESULT_QUERY => Some(
                instance
                    .field("research_result")
                    .cloned()
                    .unwrap_or(Value::Null),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edited_prompt() {
        assert_eq!(
            edited_prompt("Facts about tardigrades", "add more detail"),
            "Facts about tardigrades\n\nAdditional instructions: add more detail"
        );
        assert_eq!(edited_prompt("Facts", "   "), "Facts");
    }

    #[test]
    fn test_research_result_query() {
        let workflow = ReviewWorkflow;
        let mut instance = WorkflowInstance::new("review-1");
        assert_eq!(workflow.query(GET_RESEARCH_RESULT_QUERY, &instance), Some(Value::Null));

        instance
            .fields
            .insert("research_result".into(), json!("Tardigrades can survive space."));
        assert_eq!(
            workflow.query(GET_RESEARCH_RESULT_QUERY, &instance),
            Some(json!("Tardigrades can survive space."))
        );
        assert_eq!(workflow.query("unknown", &instance), None);
    }
}
