//! Research tasks: content production and document rendering

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::llm::{CompletionRequest, LlmClient};
use crate::workflow::{TaskContext, TaskHandler};
use crate::workflows::models::{ProduceContentInput, RenderDocumentInput};

/// File name used when the workflow input names none
pub const DEFAULT_REPORT_FILENAME: &str = "research_report.txt";

const REPORT_TITLE: &str = "Research Report";

/// `produce_content` task: asks the reasoning service for research content
#[derive(Clone)]
pub struct ProduceContentTask {
    client: Arc<dyn LlmClient>,
    api_key: Option<String>,
}

impl fmt::Debug for ProduceContentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProduceContentTask")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl ProduceContentTask {
    /// Create the task
    pub fn new(client: Arc<dyn LlmClient>, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl TaskHandler for ProduceContentTask {
    #[instrument(skip(self, ctx, input), fields(instance_id = %ctx.instance_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: TaskContext, input: Value) -> Result<Value> {
        let input: ProduceContentInput =
            serde_json::from_value(input).context("invalid produce_content input")?;

        info!("Producing content with {}", input.model);
        let request = CompletionRequest::prompt(&input.model, &input.prompt)
            .with_api_key(self.api_key.clone());
        let completion = self.client.complete(request).await?;

        if completion.content.trim().is_empty() {
            bail!("reasoning service returned no content");
        }
        Ok(Value::String(completion.content))
    }
}

/// `render_document` task: writes the content as a titled text report
#[derive(Debug, Clone)]
pub struct RenderDocumentTask {
    output_dir: PathBuf,
    fail_first_attempts: u32,
}

impl RenderDocumentTask {
    /// Render into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            fail_first_attempts: 0,
        }
    }

    /// Fail the first `attempts` attempts of every render deterministically
    pub fn failing_first_attempts(mut self, attempts: u32) -> Self {
        self.fail_first_attempts = attempts;
        self
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Lay out `content` under the report title, one paragraph per blank-line block
pub fn render_report(content: &str) -> String {
    let mut document = format!("{}\n{}\n", REPORT_TITLE, "=".repeat(REPORT_TITLE.len()));
    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        document.push('\n');
        document.push_str(paragraph);
        document.push('\n');
    }
    document
}

fn check_filename(filename: &str) -> Result<()> {
    let path = Path::new(filename);
    if filename.is_empty() || path.is_absolute() || path.components().count() != 1 || filename == ".." {
        return Err(anyhow!("invalid report file name: {:?}", filename));
    }
    Ok(())
}

#[async_trait]
impl TaskHandler for RenderDocumentTask {
    #[instrument(skip(self, ctx, input), fields(instance_id = %ctx.instance_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: TaskContext, input: Value) -> Result<Value> {
        let input: RenderDocumentInput =
            serde_json::from_value(input).context("invalid render_document input")?;

        if ctx.attempt <= self.fail_first_attempts {
            warn!("Simulating render failure on attempt {}", ctx.attempt);
            bail!("simulated render failure (attempt {})", ctx.attempt);
        }

        let filename = input.filename.as_deref().unwrap_or(DEFAULT_REPORT_FILENAME);
        check_filename(filename)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("cannot create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(filename);
        tokio::fs::write(&path, render_report(&input.content))
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;

        info!("Rendered report to {}", path.display());
        Ok(Value::String(path.display().to_string()))
    }
}
