//! Error types for durable-agent
//!
//! This module defines the engine-level error type returned by the client
//! surface of the workflow engine (start, signal, query, await) and by the
//! history stores. Errors raised *inside* a workflow run live in
//! [`crate::workflow::WorkflowError`].

use std::io;

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine and client errors
#[derive(Debug, Error)]
pub enum Error {
    /// I/O errors from the history store or renderers
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// No workflow is registered under this type name
    #[error("Workflow type not registered: {0}")]
    UnknownWorkflowType(String),

    /// No task handler is registered under this name
    #[error("Task not registered: {0}")]
    UnknownTask(String),

    /// The instance has no history and is not running
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// An execution context is already active for the instance
    #[error("Workflow instance already running: {0}")]
    AlreadyRunning(String),

    /// The instance id already has a history
    #[error("Workflow instance already exists: {0}")]
    AlreadyExists(String),

    /// The instance reached a terminal state
    #[error("Workflow instance is closed: {0}")]
    InstanceClosed(String),

    /// The instance is unfinished but has no execution context; recover it first
    #[error("Workflow instance is not running: {0}")]
    NotRunning(String),

    /// The workflow does not answer this query
    #[error("Unknown query '{query}' for instance {instance_id}")]
    UnknownQuery {
        /// Instance that was queried
        instance_id: String,
        /// Name of the query
        query: String,
    },

    /// Task timeout or retry policy violates its constraints
    #[error("Invalid task options: {0}")]
    InvalidOptions(String),

    /// Instance ids are used as storage keys and must be path-safe
    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(String),

    /// The history store rejected or lost a record
    #[error("History store error: {0}")]
    Store(String),
}
