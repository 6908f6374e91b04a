#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_html_tags)]
#![deny(rustdoc::bare_urls)]

//! durable-agent is a durable workflow engine for AI-driven, human-in-the-loop
//! pipelines. Workflows are deterministic code that dispatch side-effecting
//! tasks, wait for signals and answer queries; every step is appended to a
//! history so an interrupted instance resumes where it stopped without
//! re-running completed tasks.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use durable_agent::activities::{research_tasks, ProduceContentTask, RenderDocumentTask};
//! use durable_agent::llm::ScriptedLlmClient;
//! use durable_agent::workflow::{InMemoryHistoryStore, WorkflowEngine};
//! use durable_agent::workflows::{GenerateReportInput, ReportWorkflow, REPORT_WORKFLOW};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let llm = Arc::new(ScriptedLlmClient::with_responses(["Tardigrades survive in space."]));
//!
//!     let engine = WorkflowEngine::builder(Arc::new(InMemoryHistoryStore::new()))
//!         .workflow(ReportWorkflow)
//!         .tasks(research_tasks(
//!             ProduceContentTask::new(llm, None),
//!             RenderDocumentTask::new("reports"),
//!         ))
//!         .build();
//!
//!     let id = engine
//!         .start_workflow(REPORT_WORKFLOW, &GenerateReportInput::new("Facts about tardigrades"))
//!         .await?;
//!     let result = engine.await_result(&id).await?;
//!
//!     println!("{}", result.output_text());
//!     Ok(())
//! }
//! ```

/// Task handlers: reasoning calls, report rendering, booking tools
pub mod activities;

/// Configuration management
pub mod config;

/// Engine error types
pub mod error;

/// Human input handlers and the interactive review loop
pub mod human_input;

/// Reasoning-service clients
pub mod llm;

/// Tracing setup and metric events
pub mod telemetry;

/// The durable workflow engine
pub mod workflow;

/// The bundled report, review and agent workflows
pub mod workflows;

pub use error::{Error, Result};
pub use workflow::{WorkflowContext, WorkflowEngine, WorkflowError, WorkflowResult, WorkflowStatus};
