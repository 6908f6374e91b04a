//! Linear pipeline: produce content, then render it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::activities::{PRODUCE_CONTENT_TASK, RENDER_DOCUMENT_TASK};
use crate::workflow::{
    RetryPolicy, TaskOptions, Workflow, WorkflowContext, WorkflowError, WorkflowOutcome,
    WorkflowStatus,
};

use super::models::{
    GenerateReportInput, GenerateReportOutput, ProduceContentInput, RenderDocumentInput,
};

/// Registered name of [`ReportWorkflow`]
pub const REPORT_WORKFLOW: &str = "report";

/// Options of the `produce_content` step
pub fn produce_options() -> TaskOptions {
    TaskOptions::with_timeout(Duration::from_secs(30))
}

/// Options of the `render_document` step
pub fn render_options() -> TaskOptions {
    TaskOptions::with_timeout(Duration::from_secs(20)).retry(RetryPolicy::new(
        3,
        Duration::from_secs(1),
        2.0,
    ))
}

pub(crate) fn parse_input(input: Value) -> Result<GenerateReportInput, WorkflowError> {
    let input: GenerateReportInput =
        serde_json::from_value(input).map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;
    if input.prompt.trim().is_empty() {
        return Err(WorkflowError::InvalidInput("prompt must not be empty".into()));
    }
    Ok(input)
}

pub(crate) async fn produce(
    ctx: &WorkflowContext,
    prompt: &str,
    model: &str,
) -> Result<String, WorkflowError> {
    ctx.execute_task(
        PRODUCE_CONTENT_TASK,
        &ProduceContentInput {
            prompt: prompt.to_string(),
            model: model.to_string(),
        },
        produce_options(),
    )
    .await
}

pub(crate) async fn render(
    ctx: &WorkflowContext,
    content: String,
    filename: Option<String>,
) -> Result<WorkflowOutcome, WorkflowError> {
    ctx.transition(WorkflowStatus::Rendering, json!({})).await?;
    let path: String = ctx
        .execute_task(
            RENDER_DOCUMENT_TASK,
            &RenderDocumentInput { content, filename },
            render_options(),
        )
        .await?;

    if !ctx.is_replaying() {
        info!("Report written to {}", path);
    }
    let output = GenerateReportOutput {
        result: format!("Successfully created research report: {}", path),
    };
    Ok(WorkflowOutcome::completed(serde_json::to_value(output)?))
}

/// Produces research content for a prompt and renders it as a report
#[derive(Debug, Clone, Default)]
pub struct ReportWorkflow;

#[async_trait]
impl Workflow for ReportWorkflow {
    fn name(&self) -> &str {
        REPORT_WORKFLOW
    }

    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<WorkflowOutcome, WorkflowError> {
        let input = parse_input(input)?;

        ctx.transition(WorkflowStatus::Researching, json!({ "prompt": input.prompt }))
            .await?;
        let content = produce(&ctx, &input.prompt, &input.llm_research_model).await?;
        ctx.transition(
            WorkflowStatus::Researching,
            json!({ "research_result": content }),
        )
        .await?;

        render(&ctx, content, input.filename).await
    }
}
