//! Flight-booking tool stubs and the registry that turns them into tasks

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::workflow::{TaskContext, TaskHandler};
use crate::workflows::models::{AgentGoal, ToolArgument, ToolDefinition, ToolParams, ToolValue};

/// Type for tool execution function
pub type ToolFunction = Arc<dyn Fn(&ToolParams) -> Result<String> + Send + Sync>;

/// Immutable set of tools with their handlers
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolFunction>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.definitions.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ToolRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; a later registration under the same name replaces it
    pub fn register_tool<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&ToolParams) -> Result<String> + Send + Sync + 'static,
    {
        self.definitions.retain(|d| d.name != definition.name);
        self.handlers
            .insert(definition.name.clone(), Arc::new(handler));
        self.definitions.push(definition);
        self
    }

    /// The flight-booking tool set
    pub fn flight_booking() -> Self {
        Self::new()
            .register_tool(search_flights_tool(), search_flights)
            .register_tool(check_seat_availability_tool(), check_seat_availability)
            .register_tool(calculate_total_cost_tool(), calculate_total_cost)
            .register_tool(book_flight_tool(), book_flight)
            .register_tool(send_confirmation_tool(), send_confirmation)
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// A goal for the travel agent over this registry's tools
    pub fn travel_agent_goal(&self, description: impl Into<String>) -> AgentGoal {
        AgentGoal {
            agent_name: "Travel Booking Assistant".to_string(),
            tools: self.definitions.clone(),
            description: description.into(),
            starter_prompt: "You are an expert travel agent helping users book their perfect trips."
                .to_string(),
            example_conversation_history: Some(
                "User: I need to fly to Paris\nAgent: I'll help you find flights to Paris. What's your departure city?"
                    .to_string(),
            ),
            llm_model: None,
        }
    }

    /// Run a tool directly
    pub fn call(&self, name: &str, params: &ToolParams) -> Result<String> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| anyhow!("Tool '{}' not found", name))?;
        handler(params)
    }

    /// One task handler per tool, registered on the engine under the tool name
    pub fn task_handlers(&self) -> Vec<(String, Arc<dyn TaskHandler>)> {
        self.definitions
            .iter()
            .filter_map(|d| {
                let function = self.handlers.get(&d.name)?.clone();
                let handler: Arc<dyn TaskHandler> = Arc::new(ToolTask { function });
                Some((d.name.clone(), handler))
            })
            .collect()
    }
}

struct ToolTask {
    function: ToolFunction,
}

#[async_trait]
impl TaskHandler for ToolTask {
    async fn execute(&self, ctx: TaskContext, input: Value) -> Result<Value> {
        let params = match input {
            Value::Null => ToolParams::new(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), ToolValue::from_json(v)))
                .collect(),
            other => return Err(anyhow!("Tool parameters must be an object, got {}", other)),
        };
        info!("Running tool {} (attempt {})", ctx.task_name, ctx.attempt);
        let output = (self.function)(&params)?;
        Ok(Value::String(output))
    }
}

fn text_param(params: &ToolParams, name: &str, default: &str) -> String {
    params
        .get(name)
        .map(ToolValue::as_text)
        .unwrap_or_else(|| default.to_string())
}

/// `search_flights` tool definition
pub fn search_flights_tool() -> ToolDefinition {
    ToolDefinition {
        name: "search_flights".to_string(),
        description: "Search for flights from an origin to a destination on a specific date"
            .to_string(),
        arguments: vec![
            ToolArgument::string("origin", "Airport or city (e.g., 'NYC', 'JFK', 'New York')"),
            ToolArgument::string(
                "destination",
                "Airport or city for arrival (e.g., 'LON', 'LHR', 'London')",
            ),
            ToolArgument::string(
                "date",
                "Date of travel in any format (e.g., 'tomorrow', 'March 15', '2024-03-15')",
            ),
        ],
        completes_goal: false,
    }
}

/// `check_seat_availability` tool definition
pub fn check_seat_availability_tool() -> ToolDefinition {
    ToolDefinition {
        name: "check_seat_availability".to_string(),
        description: "Check available seats on specific flights".to_string(),
        arguments: vec![ToolArgument::string(
            "flight_id",
            "Flight identifier (e.g., 'AA123', 'UA456')",
        )],
        completes_goal: false,
    }
}

/// `calculate_total_cost` tool definition
pub fn calculate_total_cost_tool() -> ToolDefinition {
    ToolDefinition {
        name: "calculate_total_cost".to_string(),
        description: "Calculate the total cost including taxes and fees for a flight".to_string(),
        arguments: vec![
            ToolArgument::string("flight_id", "Flight identifier to calculate cost for"),
            ToolArgument::integer("passengers", "Number of passengers (default: 1)"),
        ],
        completes_goal: false,
    }
}

/// `book_flight` tool definition; the goal-completing action
pub fn book_flight_tool() -> ToolDefinition {
    ToolDefinition {
        name: "book_flight".to_string(),
        description: "Book a specific flight".to_string(),
        arguments: vec![
            ToolArgument::string("flight_id", "Flight identifier to book"),
            ToolArgument::string("seat_class", "Seat class preference (economy, business, first)"),
        ],
        completes_goal: true,
    }
}

/// `send_confirmation` tool definition
pub fn send_confirmation_tool() -> ToolDefinition {
    ToolDefinition {
        name: "send_confirmation".to_string(),
        description: "Send booking confirmation".to_string(),
        arguments: vec![ToolArgument::string(
            "confirmation_number",
            "Booking confirmation number",
        )],
        completes_goal: false,
    }
}

/// Search for flights between two places
pub fn search_flights(params: &ToolParams) -> Result<String> {
    let origin = text_param(params, "origin", "Unknown");
    let destination = text_param(params, "destination", "Unknown");
    let date = text_param(params, "date", "Unknown");

    info!("Searching flights from {} to {} on {}", origin, destination, date);

    Ok(format!(
        "Found 3 flights from {} to {} on {}:\n\
         - Flight AA123: Departs 8:00 AM, arrives 8:00 PM, $450\n\
         - Flight UA456: Departs 2:15 PM, arrives 2:15 AM (+1 day), $380\n\
         - Flight DL789: Departs 6:30 PM, arrives 6:30 AM (+1 day), $420",
        origin, destination, date
    ))
}

/// Report seat availability for a flight
pub fn check_seat_availability(params: &ToolParams) -> Result<String> {
    let flight_id = text_param(params, "flight_id", "Unknown");

    info!("Checking seat availability for {}", flight_id);

    Ok(format!(
        "Seat availability for {}:\n\
         - Economy: 8 seats available\n\
         - Business: 4 seats available\n\
         - First: Sold out",
        flight_id
    ))
}

/// Price a flight for a number of passengers
pub fn calculate_total_cost(params: &ToolParams) -> Result<String> {
    let flight_id = text_param(params, "flight_id", "UA456");
    let passengers = match params.get("passengers") {
        Some(value) => value
            .as_int()
            .ok_or_else(|| anyhow!("invalid passenger count: {}", value))?,
        None => 1,
    };

    info!("Calculating cost for {}, {} passenger(s)", flight_id, passengers);

    let base_fare = 380;
    let taxes = 85;
    let total_per_person = base_fare + taxes;
    let grand_total = total_per_person * passengers;

    Ok(format!(
        "Cost breakdown for {}:\n\
         - Base fare: ${} per person\n\
         - Taxes & fees: ${} per person\n\
         - Total per person: ${}\n\
         - Grand total for {} passenger(s): ${}",
        flight_id, base_fare, taxes, total_per_person, passengers, grand_total
    ))
}

/// Book a flight
pub fn book_flight(params: &ToolParams) -> Result<String> {
    let flight_id = text_param(params, "flight_id", "Unknown");
    let seat_class = text_param(params, "seat_class", "economy");

    info!("Booking flight {} in {}", flight_id, seat_class);

    let mut result = format!(
        "Flight booked successfully!\n- Flight: {}\n- Class: {}\n- Confirmation: CONF-{}",
        flight_id, seat_class, flight_id
    );
    if let Some(name) = params.get("passenger_name").map(ToolValue::as_text) {
        if !name.is_empty() {
            result.push_str(&format!("\n- Passenger: {}", name));
        }
    }
    Ok(result)
}

/// Send the booking confirmation
pub fn send_confirmation(params: &ToolParams) -> Result<String> {
    let confirmation_number = text_param(params, "confirmation_number", "CONF-UNKNOWN");

    info!("Sending confirmation {}", confirmation_number);

    let mut result = match params.get("email").map(ToolValue::as_text) {
        Some(email) if !email.is_empty() => format!("Confirmation email sent to {}", email),
        _ => "Booking confirmation sent".to_string(),
    };
    if confirmation_number != "CONF-UNKNOWN" {
        result.push_str(&format!(" - Confirmation: {}", confirmation_number));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn params(pairs: &[(&str, ToolValue)]) -> ToolParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_registry_resolution() {
        let registry = ToolRegistry::flight_booking();
        let names: Vec<_> = registry.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "search_flights",
                "check_seat_availability",
                "calculate_total_cost",
                "book_flight",
                "send_confirmation"
            ]
        );

        let goal = registry.travel_agent_goal("Book a flight from NYC to London for tomorrow");
        assert_eq!(goal.tools.len(), 5);
        assert!(goal.tool("book_flight").unwrap().completes_goal);
        assert!(registry.call("rent_car", &ToolParams::new()).is_err());
    }

    #[test]
    fn test_tool_outputs() {
        let registry = ToolRegistry::flight_booking();

        let search = registry
            .call(
                "search_flights",
                &params(&[
                    ("origin", ToolValue::Text("NYC".into())),
                    ("destination", ToolValue::Text("London".into())),
                ]),
            )
            .unwrap();
        assert!(search.starts_with("Found 3 flights from NYC to London on Unknown:"));

        let cost = registry
            .call("calculate_total_cost", &params(&[("passengers", ToolValue::Int(2))]))
            .unwrap();
        assert!(cost.contains("Cost breakdown for UA456:"));
        assert!(cost.ends_with("Grand total for 2 passenger(s): $930"));

        let booked = registry
            .call(
                "book_flight",
                &params(&[
                    ("flight_id", ToolValue::Text("UA456".into())),
                    ("passenger_name", ToolValue::Text("Sam".into())),
                ]),
            )
            .unwrap();
        assert_eq!(
            booked,
            "Flight booked successfully!\n- Flight: UA456\n- Class: economy\n- Confirmation: CONF-UA456\n- Passenger: Sam"
        );

        assert_eq!(
            registry.call("send_confirmation", &ToolParams::new()).unwrap(),
            "Booking confirmation sent"
        );
        assert_eq!(
            registry
                .call(
                    "send_confirmation",
                    &params(&[
                        ("confirmation_number", ToolValue::Text("CONF-UA456".into())),
                        ("email", ToolValue::Text("a@b.c".into())),
                    ])
                )
                .unwrap(),
            "Confirmation email sent to a@b.c - Confirmation: CONF-UA456"
        );
    }

    #[test]
    fn test_bad_passenger_count_fails() {
        let err = calculate_total_cost(&params(&[("passengers", ToolValue::Text("two".into()))]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid passenger count"));
    }

    #[tokio::test]
    async fn test_tool_task_handler() {
        let registry = ToolRegistry::flight_booking();
        let (name, handler) = registry
            .task_handlers()
            .into_iter()
            .find(|(name, _)| name == "check_seat_availability")
            .unwrap();

        let ctx = TaskContext {
            instance_id: "agent-1".into(),
            task_name: name,
            task_seq: 3,
            attempt: 1,
            cancellation: CancellationToken::new(),
        };
        let output = handler
            .execute(ctx.clone(), serde_json::json!({"flight_id": "AA123"}))
            .await
            .unwrap();
        assert!(output.as_str().unwrap().starts_with("Seat availability for AA123:"));

        assert!(handler.execute(ctx, serde_json::json!(["x"])).await.is_err());
    }
}
