use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::Error as EngineError;

use super::dispatcher::{Attempt, Dispatcher};
use super::history::RecordKind;
use super::journal::Journal;
use super::retry::{with_retry, Retryable};
use super::signal::{Mailbox, SignalEnvelope};
use super::state::{WorkflowInstance, WorkflowStatus};
use super::task::{FailureKind, TaskFailure, TaskOptions};

/// Errors returned by workflow code
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A task failed after its retry policy was exhausted
    #[error("Task {name} failed: {failure}")]
    Task {
        /// Registered task name
        name: String,
        /// Failure of the last attempt
        failure: TaskFailure,
    },

    /// The instance was cancelled
    #[error("Workflow cancelled: {0}")]
    Cancelled(String),

    /// Workflow code diverged from its recorded history
    #[error("Non-deterministic workflow: {0}")]
    NonDeterminism(String),

    /// The workflow input or a signal payload was malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A task input or output did not (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine error surfaced inside a run
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Retryable for WorkflowError {
    fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Task { failure, .. } => Some(failure.kind),
            _ => None,
        }
    }
}

impl WorkflowError {
    /// Failure of a task, if this is one
    pub fn task_failure(&self) -> Option<&TaskFailure> {
        match self {
            Self::Task { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Whether the error comes from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_)) || self.failure_kind() == Some(FailureKind::Cancelled)
    }
}

/// Handle given to workflow code for one execution of an instance.
///
/// All interaction with the outside world goes through this context so the
/// same code can re-run against recorded history: task results, consumed
/// signals and state transitions are matched in order while replaying and
/// appended once the history is exhausted.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    instance_id: String,
    journal: Journal,
    mailbox: Arc<Mailbox>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    next_task_seq: AtomicU64,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.inner.instance_id)
            .field("replaying", &self.is_replaying())
            .finish()
    }
}

impl WorkflowContext {
    pub(crate) fn new(
        journal: Journal,
        mailbox: Arc<Mailbox>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                instance_id: journal.log().instance_id().to_string(),
                journal,
                mailbox,
                dispatcher,
                cancel,
                next_task_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Id of the running instance
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Whether recorded history is still being replayed
    pub fn is_replaying(&self) -> bool {
        self.inner.journal.is_replaying()
    }

    /// Whether a handler for `name` was registered with the engine
    pub fn has_task(&self, name: &str) -> bool {
        self.inner.dispatcher.registry().contains(name)
    }

    /// Last committed state of the instance
    pub fn state(&self) -> WorkflowInstance {
        self.inner.journal.log().snapshot()
    }

    // Cancellation is honoured at boundaries only after replay caught up
    fn check_cancelled(&self) -> Result<(), WorkflowError> {
        if self.inner.cancel.is_cancelled() && !self.is_replaying() {
            let reason = self
                .state()
                .cancel_requested
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(WorkflowError::Cancelled(reason));
        }
        Ok(())
    }

    /// Dispatch a task and wait for its result, retrying per `options`
    #[instrument(skip(self, input, options), fields(instance_id = %self.inner.instance_id))]
    pub async fn execute_task<I, O>(
        &self,
        name: &str,
        input: &I,
        options: TaskOptions,
    ) -> Result<O, WorkflowError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        options.validate()?;
        let input = serde_json::to_value(input)?;
        let output = self.execute_task_value(name, input, &options).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Untyped form of [`execute_task`](Self::execute_task)
    pub async fn execute_task_value(
        &self,
        name: &str,
        input: Value,
        options: &TaskOptions,
    ) -> Result<Value, WorkflowError> {
        self.check_cancelled()?;
        let task_seq = self.inner.next_task_seq.fetch_add(1, Ordering::SeqCst);
        debug!("Dispatching {} as task #{}", name, task_seq);

        let result = with_retry(&options.retry, |attempt| {
            let input = &input;
            async move {
                if attempt > 1 {
                    self.check_cancelled()?;
                }
                self.inner
                    .dispatcher
                    .dispatch(
                        &self.inner.journal,
                        &self.inner.cancel,
                        Attempt {
                            task_seq,
                            name,
                            attempt,
                            input,
                            timeout: options.timeout,
                        },
                    )
                    .await
            }
        })
        .await;

        match result {
            Err(err) if err.is_cancelled() => Err(WorkflowError::Cancelled(
                self.state()
                    .cancel_requested
                    .unwrap_or_else(|| err.to_string()),
            )),
            other => other,
        }
    }

    /// Suspend until a signal named `name` is available and consume it
    #[instrument(skip(self), fields(instance_id = %self.inner.instance_id))]
    pub async fn wait_for_signal(&self, name: &str) -> Result<SignalEnvelope, WorkflowError> {
        self.check_cancelled()?;
        if !self.is_replaying() {
            info!("Waiting for signal: {}", name);
        }

        let envelope = match self.inner.mailbox.next(name, &self.inner.cancel).await {
            Some(envelope) => envelope,
            None => return Err(self.check_cancelled().err().unwrap_or_else(|| {
                WorkflowError::Cancelled("cancelled while waiting for a signal".into())
            })),
        };

        self.inner
            .journal
            .emit(RecordKind::SignalConsumed {
                arrival_seq: envelope.arrival_seq,
            })
            .await?;

        debug!("Consumed signal {} #{}", name, envelope.arrival_seq);
        Ok(envelope)
    }

    /// Record a state transition and merge `fields` into the instance state
    pub async fn transition(&self, status: WorkflowStatus, fields: Value) -> Result<(), WorkflowError> {
        self.inner
            .journal
            .emit(RecordKind::StateChanged { status, fields })
            .await?;
        Ok(())
    }
}
