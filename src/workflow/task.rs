use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::retry::{RetryPolicy, Retryable};

/// Classification of a failed task attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The attempt exceeded its timeout and was abandoned
    Timeout,
    /// The handler returned an error
    ApplicationError,
    /// The owning workflow was cancelled while the attempt ran
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ApplicationError => write!(f, "application error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of a single task attempt, as recorded in the durability log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    /// What went wrong
    pub kind: FailureKind,
    /// Human readable detail
    pub message: String,
}

impl TaskFailure {
    /// A failure raised by the handler itself
    pub fn application(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ApplicationError,
            message: message.into(),
        }
    }

    /// A failure caused by exceeding the attempt timeout
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    /// A failure caused by workflow cancellation
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: message.into(),
        }
    }
}

impl Retryable for TaskFailure {
    fn failure_kind(&self) -> Option<FailureKind> {
        Some(self.kind)
    }
}

/// Timeout and retry settings for one `execute_task` call
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOptions {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retry policy applied across attempts
    pub retry: RetryPolicy,
}

impl TaskOptions {
    /// Options with the given per-attempt timeout and no retries
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryPolicy::none(),
        }
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the options before a task is scheduled
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidOptions("timeout must be positive".into()));
        }
        self.retry.validate()
    }
}

/// Information handed to a task handler for one attempt
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Owning workflow instance
    pub instance_id: String,
    /// Registered task name
    pub task_name: String,
    /// Per-instance task sequence number
    pub task_seq: u64,
    /// 1-based attempt number
    pub attempt: u32,
    /// Cancelled when the attempt is abandoned or the workflow is cancelled
    pub cancellation: CancellationToken,
}

/// A unit of side-effecting work dispatched by workflows
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute one attempt of the task
    async fn execute(&self, ctx: TaskContext, input: Value) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnTask<F> {
    func: F,
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, ctx: TaskContext, input: Value) -> anyhow::Result<Value> {
        (self.func)(ctx, input).await
    }
}

/// Wrap a closure as a task handler
pub fn task_fn<F, Fut>(func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnTask { func })
}

/// Registry of task handlers by name
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("TaskRegistry").field("tasks", &names).finish()
    }
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    /// Whether a handler is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_task() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "double",
            task_fn(|_ctx, input| async move {
                let n = input.as_i64().unwrap_or_default();
                Ok(json!(n * 2))
            }),
        );

        let handler = registry.get("double").unwrap();
        let ctx = TaskContext {
            instance_id: "wf-1".into(),
            task_name: "double".into(),
            task_seq: 1,
            attempt: 1,
            cancellation: CancellationToken::new(),
        };
        assert_eq!(handler.execute(ctx, json!(21)).await.unwrap(), json!(42));
        assert!(matches!(registry.get("missing"), Err(Error::UnknownTask(_))));
    }

    #[test]
    fn test_options_validation() {
        assert!(TaskOptions::with_timeout(Duration::from_secs(1)).validate().is_ok());
        assert!(TaskOptions::with_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_failure_serialization() {
        let failure = TaskFailure::timeout("render_document exceeded 20s");
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], "TIMEOUT");
        assert_eq!(failure.to_string(), "timeout: render_document exceeded 20s");
    }
}
