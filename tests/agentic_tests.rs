use std::sync::Arc;

use durable_agent::activities::{agent_tasks, AgentLlm, ToolRegistry};
use durable_agent::llm::ScriptedLlmClient;
use durable_agent::workflow::{InMemoryHistoryStore, WorkflowEngine, WorkflowStatus};
use durable_agent::workflows::{
    AgentWorkflow, BookingResult, ToolDefinition, AGENT_WORKFLOW, GET_STEPS_QUERY,
};
use serde_json::json;

const GOAL: &str = "Book a flight from NYC to London for tomorrow";

fn engine_with(llm: Arc<ScriptedLlmClient>, tools: &ToolRegistry, workflow: AgentWorkflow) -> WorkflowEngine {
    WorkflowEngine::builder(Arc::new(InMemoryHistoryStore::new()))
        .workflow(workflow)
        .tasks(agent_tasks(AgentLlm::new(llm, "openai/gpt-4o"), tools))
        .build()
}

fn booking(output: Option<serde_json::Value>) -> BookingResult {
    serde_json::from_value(output.expect("workflow produced no output")).unwrap()
}

#[tokio::test]
async fn test_search_then_book() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        "YES",
        r#"{"tool": "search_flights", "parameters": {"origin": "NYC", "destination": "London", "date": "tomorrow"}}"#,
        r#"Sure! {"tool": "book_flight", "parameters": {"flight_id": "UA456", "seat_class": "economy"}} Let me know."#,
        r#"{"tool": "DONE", "parameters": {}}"#,
    ]));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default());

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal(GOAL))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed, "{:?}", result.error);

    let booking = booking(result.output);
    assert!(booking.success);
    assert_eq!(booking.message, format!("Successfully completed: {}", GOAL));
    assert_eq!(booking.steps_taken.len(), 2);
    assert!(booking.steps_taken[0].starts_with("search_flights (date=tomorrow, destination=London, origin=NYC): "));
    assert!(booking.steps_taken[1].starts_with("book_flight (flight_id=UA456, seat_class=economy): "));
    assert_eq!(llm.calls(), 4);

    // The last selection prompt carries both executed tools
    let prompts = llm.prompts();
    let last = prompts.last().unwrap();
    assert!(last.contains("Executed: search_flights with (date=tomorrow, destination=London, origin=NYC)"));
    assert!(last.contains("Executed: book_flight"));

    let steps = engine.query(&id, GET_STEPS_QUERY).await.unwrap();
    assert_eq!(steps.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_unknown_tool_is_reported_back() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        "YES",
        r#"{"tool": "teleport", "parameters": {}}"#,
        r#"{"tool": "done", "parameters": {}}"#,
    ]));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default());

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal(GOAL))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);

    let booking = booking(result.output);
    assert!(!booking.success);
    assert_eq!(booking.message, format!("Partially completed: {}", GOAL));
    assert_eq!(booking.steps_taken, vec!["No actions were taken"]);
    assert!(llm.prompts()[2].contains("Error: Unknown tool 'teleport'"));
}

#[tokio::test]
async fn test_rejected_request() {
    let llm = Arc::new(ScriptedLlmClient::with_responses(["NO"]));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default());

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal("Write me a poem about the sea"))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Rejected);
    assert_eq!(result.exit_code(), 2);
    assert_eq!(llm.calls(), 1);

    let booking = booking(result.output);
    assert!(!booking.success);
    assert_eq!(booking.message, "Request outside of agent capabilities");
}

#[tokio::test]
async fn test_tool_failure_keeps_loop_running() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        "YES",
        r#"{"tool": "calculate_total_cost", "parameters": {"flight_id": "UA456", "passengers": "two"}}"#,
        r#"{"tool": "DONE", "parameters": {}}"#,
    ]));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default());

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal(GOAL))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);

    let booking = booking(result.output);
    assert!(!booking.success);
    assert_eq!(booking.steps_taken.len(), 1);
    assert!(booking.steps_taken[0].starts_with("calculate_total_cost failed: "));
    assert!(llm.prompts()[2].contains("Error executing calculate_total_cost"));
}

#[tokio::test]
async fn test_iteration_cap() {
    let llm = Arc::new(ScriptedLlmClient::with_responses(["YES"]).with_fallback(|_| {
        r#"{"tool": "search_flights", "parameters": {"origin": "NYC"}}"#.to_string()
    }));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default().with_max_iterations(3));

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal(GOAL))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);

    let booking = booking(result.output);
    assert_eq!(booking.steps_taken.len(), 3);
    assert!(!booking.success);
    // One validation call plus one selection per iteration
    assert_eq!(llm.calls(), 4);
}

#[tokio::test]
async fn test_custom_completing_tool() {
    let tools = ToolRegistry::new().register_tool(
        ToolDefinition {
            name: "reserve_table".into(),
            description: "Reserve a restaurant table".into(),
            arguments: Vec::new(),
            completes_goal: true,
        },
        |_params| Ok("Table reserved for 7pm".to_string()),
    );
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        "YES",
        r#"{"tool": "reserve_table", "parameters": {}}"#,
        "DONE",
    ]));
    let engine = engine_with(llm, &tools, AgentWorkflow::default());

    let id = engine
        .start_workflow(AGENT_WORKFLOW, &tools.travel_agent_goal("Reserve dinner"))
        .await
        .unwrap();
    let result = engine.await_result(&id).await.unwrap();

    let booking = booking(result.output);
    assert!(booking.success);
    assert_eq!(booking.steps_taken, vec!["reserve_table: Table reserved for 7pm..."]);
    assert_eq!(engine.query(&id, GET_STEPS_QUERY).await.unwrap(), json!(booking.steps_taken));
}

#[tokio::test]
async fn test_goal_tool_without_handler_is_unknown() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        "YES",
        r#"{"tool": "rent_car", "parameters": {}}"#,
        "DONE",
    ]));
    let tools = ToolRegistry::flight_booking();
    let engine = engine_with(llm.clone(), &tools, AgentWorkflow::default());

    // The goal advertises a tool no handler was registered for
    let mut goal = tools.travel_agent_goal(GOAL);
    goal.tools.push(ToolDefinition {
        name: "rent_car".into(),
        description: "Rent a car at the destination".into(),
        arguments: Vec::new(),
        completes_goal: false,
    });

    let id = engine.start_workflow(AGENT_WORKFLOW, &goal).await.unwrap();
    let result = engine.await_result(&id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed, "{:?}", result.error);

    let booking = booking(result.output);
    assert!(!booking.success);
    assert_eq!(booking.message, format!("Partially completed: {}", GOAL));
    assert_eq!(booking.steps_taken, vec!["No actions were taken"]);
    assert!(llm.prompts()[2].contains("Error: Unknown tool 'rent_car'"));
}
