use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::telemetry::record_task_attempt;

use super::context::WorkflowError;
use super::history::RecordKind;
use super::journal::{Emitted, Journal};
use super::task::{TaskContext, TaskFailure, TaskHandler, TaskRegistry};

/// One attempt to hand to the dispatcher
#[derive(Debug, Clone)]
pub(crate) struct Attempt<'a> {
    pub task_seq: u64,
    pub name: &'a str,
    pub attempt: u32,
    pub input: &'a Value,
    pub timeout: Duration,
}

/// Bounded executor pool for registered tasks.
///
/// Each attempt takes a pool permit, runs the handler on its own tokio task
/// and is abandoned (aborted) on timeout or cancellation. `TASK_SCHEDULED` is
/// appended before the handler starts and the outcome record before the
/// result is returned.
#[derive(Debug)]
pub struct Dispatcher {
    registry: TaskRegistry,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher with at most `max_concurrent_tasks` attempts in flight
    pub fn new(registry: TaskRegistry, max_concurrent_tasks: usize) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Registered tasks
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run one attempt, or return its recorded outcome when replaying
    #[instrument(skip(self, journal, cancel, attempt), fields(task.name = %attempt.name, task.seq = attempt.task_seq, attempt = attempt.attempt))]
    pub(crate) async fn dispatch(
        &self,
        journal: &Journal,
        cancel: &CancellationToken,
        attempt: Attempt<'_>,
    ) -> Result<Value, WorkflowError> {
        let handler = self.registry.get(attempt.name)?;

        let scheduled = journal
            .emit(RecordKind::TaskScheduled {
                task_seq: attempt.task_seq,
                name: attempt.name.to_string(),
                attempt: attempt.attempt,
                input: attempt.input.clone(),
                timeout_ms: attempt.timeout.as_millis() as u64,
            })
            .await?;

        if let Emitted::Replayed(_) = scheduled {
            match journal.take_outcome(attempt.task_seq, attempt.attempt) {
                Some(RecordKind::TaskCompleted { output, .. }) => {
                    debug!("Replayed completion of {}", attempt.name);
                    return Ok(output);
                }
                Some(RecordKind::TaskFailed { failure, .. }) => {
                    debug!("Replayed failure of {}: {}", attempt.name, failure);
                    return Err(WorkflowError::Task {
                        name: attempt.name.to_string(),
                        failure,
                    });
                }
                _ if journal.is_replaying() => {
                    return Err(WorkflowError::NonDeterminism(format!(
                        "no recorded outcome for task {} #{} attempt {}",
                        attempt.name, attempt.task_seq, attempt.attempt
                    )));
                }
                // Scheduled but never settled before the crash: run it again
                _ => info!("Re-dispatching in-flight task {}", attempt.name),
            }
        }

        let start = Instant::now();
        let outcome = self.run(journal, cancel, &attempt, handler).await;

        let record = match &outcome {
            Ok(output) => RecordKind::TaskCompleted {
                task_seq: attempt.task_seq,
                attempt: attempt.attempt,
                output: output.clone(),
            },
            Err(failure) => RecordKind::TaskFailed {
                task_seq: attempt.task_seq,
                attempt: attempt.attempt,
                failure: failure.clone(),
            },
        };
        journal.log().append(record).await?;

        record_task_attempt(attempt.name, attempt.attempt, outcome.is_ok(), start.elapsed());

        outcome.map_err(|failure| WorkflowError::Task {
            name: attempt.name.to_string(),
            failure,
        })
    }

    async fn run(
        &self,
        journal: &Journal,
        cancel: &CancellationToken,
        attempt: &Attempt<'_>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Value, TaskFailure> {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| TaskFailure::cancelled("executor pool closed"))?
            }
            _ = cancel.cancelled() => {
                return Err(TaskFailure::cancelled("workflow cancelled before dispatch"));
            }
        };

        let token = cancel.child_token();
        let ctx = TaskContext {
            instance_id: journal.log().instance_id().to_string(),
            task_name: attempt.name.to_string(),
            task_seq: attempt.task_seq,
            attempt: attempt.attempt,
            cancellation: token.clone(),
        };
        let input = attempt.input.clone();

        debug!("Executing task {} (attempt {})", attempt.name, attempt.attempt);
        let mut handle = tokio::spawn(async move { handler.execute(ctx, input).await });

        let result = tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => {
                    warn!("Task {} failed: {:#}", attempt.name, err);
                    Err(TaskFailure::application(format!("{:#}", err)))
                }
                Err(join_error) => {
                    error!("Task {} panicked: {}", attempt.name, join_error);
                    Err(TaskFailure::application(format!("task join error: {}", join_error)))
                }
            },
            _ = tokio::time::sleep(attempt.timeout) => {
                warn!("Task {} timed out after {:?}", attempt.name, attempt.timeout);
                Err(TaskFailure::timeout(format!(
                    "{} exceeded {:?}",
                    attempt.name, attempt.timeout
                )))
            }
            _ = cancel.cancelled() => {
                warn!("Task {} cancelled", attempt.name);
                Err(TaskFailure::cancelled(format!("{} cancelled", attempt.name)))
            }
        };

        if result.is_err() {
            token.cancel();
            handle.abort();
        }
        result
    }
}
