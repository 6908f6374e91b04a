use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use durable_agent::activities::{
    agent_tasks, research_tasks, AgentLlm, ProduceContentTask, RenderDocumentTask, ToolRegistry,
};
use durable_agent::config::{get_settings, Settings};
use durable_agent::human_input::{run_review_loop, ConsoleInputHandler};
use durable_agent::llm::{CompletionRequest, LlmClient, ScriptedLlmClient};
use durable_agent::telemetry::{init_telemetry, TelemetryConfig};
use durable_agent::workflow::{replay, FileHistoryStore, HistoryStore, WorkflowEngine, WorkflowResult};
use durable_agent::workflows::{
    AgentWorkflow, BookingResult, GenerateReportInput, ReportWorkflow, ReviewWorkflow,
    AGENT_WORKFLOW, REPORT_WORKFLOW, REVIEW_WORKFLOW,
};

const DEFAULT_TOPIC: &str =
    "Give me 5 fun and fascinating facts about tardigrades. Make them interesting and educational!";
const DEFAULT_GOAL: &str = "Book a flight from NYC to London for tomorrow";

/// Durable research and booking workflows
#[derive(Debug, Parser)]
#[command(name = "durable-agent", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding workflow histories
    #[arg(long, global = true)]
    history_dir: Option<PathBuf>,

    /// Use a scripted reasoning client instead of the network
    #[arg(long, global = true)]
    offline: bool,

    /// Make the first N render attempts fail
    #[arg(long, global = true, default_value_t = 0)]
    fail_render_attempts: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Research a topic and render a report
    Report {
        /// Research topic or question
        #[arg(long)]
        prompt: Option<String>,
        /// Report file name inside the output directory
        #[arg(long)]
        filename: Option<String>,
    },
    /// Research a topic with interactive keep / edit review
    Review {
        /// Research topic or question
        #[arg(long)]
        prompt: Option<String>,
        /// Report file name inside the output directory
        #[arg(long)]
        filename: Option<String>,
    },
    /// Let the travel agent pursue a booking goal
    Agent {
        /// Goal in plain language
        #[arg(long)]
        goal: Option<String>,
    },
    /// Resume unfinished workflows from the history directory
    Resume,
    /// Print the replayed state of an instance
    History {
        /// Instance id
        instance_id: String,
    },
}

/// Reasoning client answering without the network
fn offline_client() -> ScriptedLlmClient {
    ScriptedLlmClient::new().with_fallback(|request: &CompletionRequest| {
        let prompt = request.last_user_message().unwrap_or_default();
        if prompt.contains("Respond with only YES or NO") {
            "YES".to_string()
        } else if prompt.contains("Return ONLY the JSON object") {
            if !prompt.contains("Executed: search_flights") {
                r#"{"tool": "search_flights", "parameters": {"origin": "NYC", "destination": "London", "date": "tomorrow"}}"#.to_string()
            } else if !prompt.contains("Executed: book_flight") {
                r#"{"tool": "book_flight", "parameters": {"flight_id": "UA456", "seat_class": "economy"}}"#.to_string()
            } else {
                r#"{"tool": "DONE", "parameters": {}}"#.to_string()
            }
        } else {
            format!(
                "Offline research notes.\n\nTopic: {}\n\nNo reasoning service was contacted for this run.",
                prompt
            )
        }
    })
}

#[cfg(feature = "llm-http")]
fn http_client(settings: &Settings) -> Result<Arc<dyn LlmClient>> {
    let client = durable_agent::llm::OpenAiClient::new(settings.llm.clone())?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "llm-http"))]
fn http_client(_settings: &Settings) -> Result<Arc<dyn LlmClient>> {
    Err(anyhow!("built without the llm-http feature; rerun with --offline"))
}

fn llm_client(settings: &Settings, offline: bool) -> Result<Arc<dyn LlmClient>> {
    if offline {
        return Ok(Arc::new(offline_client()));
    }
    http_client(settings)
}

fn build_engine(
    settings: &Settings,
    store: Arc<dyn HistoryStore>,
    llm: Arc<dyn LlmClient>,
    fail_render_attempts: u32,
) -> WorkflowEngine {
    let produce = ProduceContentTask::new(Arc::clone(&llm), settings.llm.api_key.clone());
    let render = RenderDocumentTask::new(&settings.output_dir)
        .failing_first_attempts(fail_render_attempts);
    let agent_llm = AgentLlm::new(llm, settings.llm.agent_model.clone())
        .with_api_key(settings.llm.api_key.clone())
        .with_temperature(settings.llm.agent_temperature);
    let tool_timeout = Duration::from_secs(settings.engine.default_task_timeout_secs);

    WorkflowEngine::builder(store)
        .config(settings.engine.engine_config())
        .workflow(ReportWorkflow)
        .workflow(ReviewWorkflow)
        .workflow(AgentWorkflow::new(tool_timeout))
        .tasks(research_tasks(produce, render))
        .tasks(agent_tasks(agent_llm, &ToolRegistry::flight_booking()))
        .build()
}

fn print_result(result: &WorkflowResult) {
    let status = match result.exit_code() {
        0 => result.status.to_string().green().bold(),
        2 => result.status.to_string().yellow().bold(),
        _ => result.status.to_string().red().bold(),
    };
    println!("\n{} {} ({})", "Workflow".bold(), result.instance_id, status);

    if let Some(error) = &result.error {
        println!("{} {}", "Workflow failed:".red().bold(), error);
        return;
    }

    let output = result.output.clone().unwrap_or_default();
    if let Some(text) = output.get("result").and_then(|v| v.as_str()) {
        println!("Result: {}", text);
    } else if let Ok(booking) = serde_json::from_value::<BookingResult>(output) {
        println!("{}", booking.message.bold());
        for step in &booking.steps_taken {
            println!("  - {}", step);
        }
    } else {
        println!("{}", result.output_text());
    }
}

/// Wait for a result; Ctrl-C leaves the instance resumable
async fn await_or_interrupt(engine: &WorkflowEngine, instance_id: &str) -> Result<Option<WorkflowResult>> {
    tokio::select! {
        result = engine.await_result(instance_id) => Ok(Some(result?)),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; {} stays resumable", instance_id);
            println!("\nInterrupted. Resume later with `durable-agent resume`.");
            Ok(None)
        }
    }
}

/// Run the console review loop alongside the instance until it finishes
async fn review_until_done(engine: &WorkflowEngine, instance_id: &str) -> Result<Option<WorkflowResult>> {
    let console = ConsoleInputHandler::new();
    tokio::select! {
        result = await_or_interrupt(engine, instance_id) => result,
        reviewed = run_review_loop(engine, instance_id, &console) => {
            reviewed?;
            await_or_interrupt(engine, instance_id).await
        }
    }
}

fn exit_code(result: Option<&WorkflowResult>) -> i32 {
    result.map(WorkflowResult::exit_code).unwrap_or(130)
}

async fn run(cli: Cli) -> Result<i32> {
    let mut settings = get_settings(cli.config.as_deref())?;
    if let Some(dir) = cli.history_dir {
        settings.engine.history_dir = dir;
    }

    if let Err(e) = init_telemetry(TelemetryConfig {
        log_level: settings.logger.level.clone(),
        ..TelemetryConfig::default()
    }) {
        eprintln!("Failed to initialize telemetry: {}", e);
    }

    let store = Arc::new(
        FileHistoryStore::open(&settings.engine.history_dir)
            .await
            .with_context(|| format!("cannot open {}", settings.engine.history_dir.display()))?,
    );

    if let Command::History { instance_id } = &cli.command {
        let instance = replay(store.as_ref(), instance_id)
            .await?
            .ok_or_else(|| anyhow!("no history for {}", instance_id))?;
        println!("{}", serde_json::to_string_pretty(&instance)?);
        return Ok(0);
    }

    let llm = llm_client(&settings, cli.offline)?;
    let engine = build_engine(&settings, store, llm, cli.fail_render_attempts);
    info!("Engine {} using {}", engine.id(), settings.engine.history_dir.display());

    match cli.command {
        Command::Report { prompt, filename } => {
            let input = report_input(&settings, prompt, filename);
            let id = engine.start_workflow(REPORT_WORKFLOW, &input).await?;
            println!("Started workflow. Workflow ID: {}", id);

            let result = await_or_interrupt(&engine, &id).await?;
            if let Some(result) = &result {
                print_result(result);
            }
            Ok(exit_code(result.as_ref()))
        }
        Command::Review { prompt, filename } => {
            let input = report_input(&settings, prompt, filename);
            let id = engine.start_workflow(REVIEW_WORKFLOW, &input).await?;
            println!("Started workflow. Workflow ID: {}", id);

            let result = review_until_done(&engine, &id).await?;
            if let Some(result) = &result {
                print_result(result);
            }
            Ok(exit_code(result.as_ref()))
        }
        Command::Agent { goal } => {
            let goal = goal.unwrap_or_else(|| DEFAULT_GOAL.to_string());
            let goal = ToolRegistry::flight_booking().travel_agent_goal(goal);
            let id = engine.start_workflow(AGENT_WORKFLOW, &goal).await?;
            println!("Started workflow. Workflow ID: {}", id);

            let result = await_or_interrupt(&engine, &id).await?;
            if let Some(result) = &result {
                print_result(result);
            }
            Ok(exit_code(result.as_ref()))
        }
        Command::Resume => {
            let resumed = engine.recover().await?;
            if resumed.is_empty() {
                println!("No unfinished workflows.");
                return Ok(0);
            }

            let mut code = 0;
            for id in resumed {
                println!("Resumed {}", id);
                let workflow_type = engine.describe(&id).await?.workflow_type;
                let result = if workflow_type == REVIEW_WORKFLOW {
                    review_until_done(&engine, &id).await?
                } else {
                    await_or_interrupt(&engine, &id).await?
                };
                match &result {
                    Some(result) => print_result(result),
                    None => return Ok(130),
                }
                code = code.max(exit_code(result.as_ref()));
            }
            Ok(code)
        }
        Command::History { .. } => Ok(0),
    }
}

fn report_input(
    settings: &Settings,
    prompt: Option<String>,
    filename: Option<String>,
) -> GenerateReportInput {
    let prompt = match prompt.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        Some(prompt) => prompt,
        None => {
            println!("No prompt entered. Using default: {}", DEFAULT_TOPIC);
            DEFAULT_TOPIC.to_string()
        }
    };

    GenerateReportInput {
        prompt,
        llm_research_model: settings.llm.model.clone(),
        filename,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };

    // Pending console reads must not keep the process alive
    std::process::exit(code);
}
