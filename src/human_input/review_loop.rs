//! Interactive keep / edit / query loop driving a review workflow instance

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Error;
use crate::human_input::types::{HumanInputHandler, HumanInputRequest, ReviewChoice};
use crate::workflow::{WorkflowEngine, WorkflowInstance, WorkflowStatus};
use crate::workflows::models::{
    UserDecision, UserDecisionSignal, GET_RESEARCH_RESULT_QUERY, USER_DECISION_SIGNAL,
};

const MENU: &str = "Research is complete! What would you like to do?\n\
                    1. Type 'keep' to approve the research and create the report\n\
                    2. Type 'edit' to modify the research\n\
                    3. Type 'query' to check workflow status and research result";

const DECISION_PROMPT: &str = "Your decision (keep/edit/query):";
const EDIT_PROMPT: &str = "Enter additional instructions for the research (optional):";

fn revision(instance: &WorkflowInstance) -> u64 {
    instance
        .field("revision")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Format the answer of the `get_research_result` query
pub fn research_result_line(result: &Value) -> String {
    match result.as_str() {
        Some(text) if !text.is_empty() => format!("Research Result: {}", text),
        _ => "Research Result: Not yet available".to_string(),
    }
}

/// Wait until revision `min_revision` (or later) awaits a decision. Returns
/// `None` once the instance is terminal.
async fn wait_for_decision_point(
    engine: &WorkflowEngine,
    instance_id: &str,
    min_revision: u64,
) -> Result<Option<u64>> {
    let mut receiver = engine.watch(instance_id).await?;
    let ready = |instance: &WorkflowInstance| {
        instance.is_terminal()
            || (instance.status == WorkflowStatus::AwaitingDecision
                && revision(instance) >= min_revision)
    };

    let waited = receiver.wait_for(ready).await.map(|instance| (*instance).clone());
    let instance = match waited {
        Ok(instance) => instance,
        Err(_) => engine.describe(instance_id).await?,
    };

    if instance.is_terminal() || !ready(&instance) {
        return Ok(None);
    }
    Ok(Some(revision(&instance)))
}

/// Drive a review instance from the console until the reviewer keeps the
/// content or the instance finishes.
pub async fn run_review_loop(
    engine: &WorkflowEngine,
    instance_id: &str,
    input: &dyn HumanInputHandler,
) -> Result<()> {
    let mut min_revision = 1;

    loop {
        let Some(current) = wait_for_decision_point(engine, instance_id, min_revision).await? else {
            debug!("{} finished before a decision was needed", instance_id);
            return Ok(());
        };

        let answer = input
            .handle_request(
                HumanInputRequest::new(DECISION_PROMPT)
                    .with_description(MENU)
                    .with_instance_id(instance_id),
            )
            .await?;

        let signal = match ReviewChoice::parse(&answer.response) {
            Some(ReviewChoice::Keep) => UserDecisionSignal::keep(),
            Some(ReviewChoice::Edit) => {
                let instructions = input
                    .handle_request(HumanInputRequest::new(EDIT_PROMPT).with_instance_id(instance_id))
                    .await?;
                UserDecisionSignal::edit(instructions.response.trim())
            }
            Some(ReviewChoice::Query) => {
                let status = engine.describe(instance_id).await?.status;
                let result = engine.query(instance_id, GET_RESEARCH_RESULT_QUERY).await?;
                println!("Workflow status: {}", status);
                println!("{}", research_result_line(&result));
                continue;
            }
            None => {
                println!("{}", "Please enter either 'keep', 'edit', or 'query'".yellow());
                continue;
            }
        };

        let keep = signal.decision == UserDecision::Keep;
        match engine.send_signal(instance_id, USER_DECISION_SIGNAL, &signal).await {
            Ok(_) => {}
            Err(Error::InstanceClosed(_)) => {
                info!("{} is already closed", instance_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if keep {
            println!("Signal sent to keep research and create the report");
            return Ok(());
        }
        println!("Signal sent to regenerate research");
        min_revision = current + 1;
    }
}
