use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::history::{DurableRecord, RecordKind};
use super::signal::SignalEnvelope;
use super::task::TaskFailure;

/// Lifecycle state of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Created, no step taken yet
    Started,
    /// Producing content with the reasoning service
    Researching,
    /// Suspended until a human decision arrives
    AwaitingDecision,
    /// Rendering the final artifact
    Rendering,
    /// Checking the request against the agent's capabilities
    Validating,
    /// Inside the agentic tool loop
    RunningToolLoop,
    /// Finished successfully
    Completed,
    /// Finished without doing the work because the request was refused
    Rejected,
    /// Finished with a hard failure or cancellation
    Failed,
}

impl WorkflowStatus {
    /// Whether the instance can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "STARTED",
            Self::Researching => "RESEARCHING",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::Rendering => "RENDERING",
            Self::Validating => "VALIDATING",
            Self::RunningToolLoop => "RUNNING_TOOL_LOOP",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Settlement state of a dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// An attempt is in flight
    Scheduled,
    /// The last attempt succeeded
    Completed,
    /// The last attempt failed
    Failed,
}

/// Folded view of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Registered task name
    pub name: String,
    /// Number of attempts scheduled so far
    pub attempts: u32,
    /// State after the most recent record
    pub state: TaskState,
    /// Output of the successful attempt
    pub output: Option<Value>,
    /// Failure of the most recent failed attempt
    pub last_failure: Option<TaskFailure>,
}

/// Final result handed back to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Instance the result belongs to
    pub instance_id: String,
    /// Registered workflow type
    pub workflow_type: String,
    /// Terminal status
    pub status: WorkflowStatus,
    /// Workflow output, if it produced one
    pub output: Option<Value>,
    /// Concise failure summary for FAILED instances
    pub error: Option<String>,
}

impl WorkflowResult {
    /// Whether the instance completed
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        match self.status {
            WorkflowStatus::Completed => 0,
            WorkflowStatus::Rejected => 2,
            _ => 1,
        }
    }

    /// Output formatted for display
    pub fn output_text(&self) -> String {
        match &self.output {
            Some(Value::String(text)) => text.clone(),
            Some(v) => serde_json::to_string_pretty(v)
                .unwrap_or_else(|_| "Error formatting output".to_string()),
            None => "No output available".to_string(),
        }
    }
}

/// What a workflow run returns when it reaches a terminal state on its own
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    /// COMPLETED or REJECTED
    pub status: WorkflowStatus,
    /// Output value
    pub output: Value,
}

impl WorkflowOutcome {
    /// A completed outcome
    pub fn completed<T: Into<Value>>(output: T) -> Self {
        Self {
            status: WorkflowStatus::Completed,
            output: output.into(),
        }
    }

    /// A rejected outcome
    pub fn rejected<T: Into<Value>>(output: T) -> Self {
        Self {
            status: WorkflowStatus::Rejected,
            output: output.into(),
        }
    }
}

/// State of one workflow instance, reconstructed by folding its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Instance id
    pub instance_id: String,
    /// Registered workflow type
    pub workflow_type: String,
    /// Workflow input
    pub input: Value,
    /// Current status
    pub status: WorkflowStatus,
    /// Variant-specific fields (prompt, content, steps, iteration, ...)
    pub fields: Map<String, Value>,
    /// Signals received but not yet consumed, in arrival order
    pub pending_signals: Vec<SignalEnvelope>,
    /// Tasks by sequence number
    pub tasks: BTreeMap<u64, TaskRecord>,
    /// Reason of a pending cancellation request
    pub cancel_requested: Option<String>,
    /// Final result once terminal
    pub result: Option<WorkflowResult>,
    /// Sequence number of the last applied record
    pub last_sequence: u64,
    /// Time of the first record
    pub started_at: Option<DateTime<Utc>>,
    /// Time of the last applied record
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Empty instance, before any record is applied
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            workflow_type: String::new(),
            input: Value::Null,
            status: WorkflowStatus::Started,
            fields: Map::new(),
            pending_signals: Vec::new(),
            tasks: BTreeMap::new(),
            cancel_requested: None,
            result: None,
            last_sequence: 0,
            started_at: None,
            updated_at: None,
        }
    }

    /// Fold a record sequence into an instance
    pub fn fold(instance_id: &str, records: &[DurableRecord]) -> Self {
        let mut instance = Self::new(instance_id);
        for record in records {
            instance.apply(record);
        }
        instance
    }

    /// Apply one record. Used both live and during replay, so the two paths
    /// cannot diverge.
    pub fn apply(&mut self, record: &DurableRecord) {
        match &record.kind {
            RecordKind::WorkflowStarted { workflow_type, input } => {
                self.workflow_type = workflow_type.clone();
                self.input = input.clone();
                self.status = WorkflowStatus::Started;
                self.started_at = Some(record.recorded_at);
            }
            RecordKind::TaskScheduled {
                task_seq,
                name,
                attempt,
                ..
            } => {
                let task = self.tasks.entry(*task_seq).or_insert_with(|| TaskRecord {
                    name: name.clone(),
                    attempts: 0,
                    state: TaskState::Scheduled,
                    output: None,
                    last_failure: None,
                });
                task.attempts = *attempt;
                task.state = TaskState::Scheduled;
            }
            RecordKind::TaskCompleted {
                task_seq, output, ..
            } => {
                if let Some(task) = self.tasks.get_mut(task_seq) {
                    task.state = TaskState::Completed;
                    task.output = Some(output.clone());
                }
            }
            RecordKind::TaskFailed {
                task_seq, failure, ..
            } => {
                if let Some(task) = self.tasks.get_mut(task_seq) {
                    task.state = TaskState::Failed;
                    task.last_failure = Some(failure.clone());
                }
            }
            RecordKind::SignalReceived {
                delivery_id,
                arrival_seq,
                name,
                payload,
            } => {
                self.pending_signals.push(SignalEnvelope {
                    delivery_id: delivery_id.clone(),
                    instance_id: self.instance_id.clone(),
                    name: name.clone(),
                    payload: payload.clone(),
                    arrival_seq: *arrival_seq,
                    received_at: record.recorded_at,
                });
            }
            RecordKind::SignalConsumed { arrival_seq } => {
                self.pending_signals.retain(|s| s.arrival_seq != *arrival_seq);
            }
            RecordKind::StateChanged { status, fields } => {
                self.status = *status;
                if let Value::Object(updates) = fields {
                    for (key, value) in updates {
                        self.fields.insert(key.clone(), value.clone());
                    }
                }
            }
            RecordKind::CancelRequested { reason } => {
                self.cancel_requested = Some(reason.clone());
            }
            RecordKind::WorkflowFinished { result } => {
                self.status = result.status;
                self.result = Some(result.clone());
            }
        }

        self.last_sequence = record.sequence;
        self.updated_at = Some(record.recorded_at);
    }

    /// Whether the instance reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A single variant-specific field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Summary answered by the built-in `status` query
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "instance_id": self.instance_id,
            "workflow_type": self.workflow_type,
            "status": self.status,
            "pending_signals": self.pending_signals.len(),
            "tasks": self.tasks.len(),
            "last_sequence": self.last_sequence,
        })
    }
}
