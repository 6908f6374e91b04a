//! Durable workflow engine.
//!
//! Workflow code is ordinary async Rust that talks to the outside world only
//! through a [`WorkflowContext`]:
//!
//! - tasks are dispatched to a bounded executor pool with a timeout and an
//!   optional retry policy
//! - signals are consumed from a durable, ordered per-instance mailbox
//! - state transitions are recorded and answered to queries
//!
//! Every one of these steps is appended to the durability log before it takes
//! effect. After a restart the engine re-runs the workflow code against the
//! log: recorded task results are returned without executing the task again
//! and consumed signals are handed out in the same order.

/// Task dispatch onto the executor pool
pub mod dispatcher;
/// Workflow execution engine
pub mod engine;
/// Durability log records and stores
pub mod history;
/// Signal mailbox for workflow instances
pub mod signal;
/// State management for workflows
pub mod state;
/// Task definition for workflows
pub mod task;

mod context;
mod journal;
/// Retry policy and backoff
pub mod retry;

pub use context::{WorkflowContext, WorkflowError};
pub use dispatcher::Dispatcher;
pub use engine::{Workflow, WorkflowEngine, WorkflowEngineBuilder, WorkflowEngineConfig};
pub use history::{
    replay, DurableRecord, FileHistoryStore, HistoryStore, InMemoryHistoryStore, RecordKind,
};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use signal::{Mailbox, SignalDelivery, SignalEnvelope};
pub use state::{
    TaskRecord, TaskState, WorkflowInstance, WorkflowOutcome, WorkflowResult, WorkflowStatus,
};
pub use task::{task_fn, FailureKind, TaskContext, TaskFailure, TaskHandler, TaskOptions, TaskRegistry};
