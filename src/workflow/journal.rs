//! Per-instance append path and the replay matcher used while workflow
//! code re-runs against recorded history.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

use super::context::WorkflowError;
use super::history::{DurableRecord, HistoryStore, RecordKind};
use super::state::WorkflowInstance;

/// Serialized append path of one instance. Every record is durable before
/// it is applied to the published snapshot.
pub(crate) struct InstanceLog {
    instance_id: String,
    store: Arc<dyn HistoryStore>,
    append_lock: Mutex<()>,
    snapshot: watch::Sender<WorkflowInstance>,
}

impl fmt::Debug for InstanceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLog")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl InstanceLog {
    pub(crate) fn new(store: Arc<dyn HistoryStore>, instance: WorkflowInstance) -> Self {
        let (snapshot, _) = watch::channel(instance.clone());
        Self {
            instance_id: instance.instance_id,
            store,
            append_lock: Mutex::new(()),
            snapshot,
        }
    }

    pub(crate) fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub(crate) async fn append(&self, kind: RecordKind) -> Result<DurableRecord> {
        let _guard = self.append_lock.lock().await;
        let record = self.store.append(&self.instance_id, kind).await?;
        debug!(
            "Appended {} #{} for {}",
            record.kind.label(),
            record.sequence,
            self.instance_id
        );
        self.snapshot.send_modify(|instance| instance.apply(&record));
        Ok(record)
    }

    /// Last committed state
    pub(crate) fn snapshot(&self) -> WorkflowInstance {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<WorkflowInstance> {
        self.snapshot.subscribe()
    }
}

/// Outcome of emitting a workflow record
#[derive(Debug)]
pub(crate) enum Emitted {
    /// Matched the next record of the history being replayed
    Replayed(DurableRecord),
    /// Appended as a new record
    Appended(DurableRecord),
}

/// Workflow-side view of the log: records still to be matched on replay,
/// then live appends.
pub(crate) struct Journal {
    log: Arc<InstanceLog>,
    pending: StdMutex<VecDeque<DurableRecord>>,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("instance_id", &self.log.instance_id())
            .field("replaying", &self.is_replaying())
            .finish()
    }
}

impl Journal {
    /// A journal replaying the workflow-emitted records of `history`
    pub(crate) fn new(log: Arc<InstanceLog>, history: &[DurableRecord]) -> Self {
        let pending = history
            .iter()
            .filter(|r| r.kind.is_workflow_emitted())
            .cloned()
            .collect();
        Self {
            log,
            pending: StdMutex::new(pending),
        }
    }

    pub(crate) fn log(&self) -> &Arc<InstanceLog> {
        &self.log
    }

    pub(crate) fn is_replaying(&self) -> bool {
        self.pending
            .lock()
            .map(|pending| !pending.is_empty())
            .unwrap_or(false)
    }

    /// Match `kind` against the next recorded record, or append it once the
    /// history is exhausted
    pub(crate) async fn emit(&self, kind: RecordKind) -> std::result::Result<Emitted, WorkflowError> {
        if let Some(record) = self.match_next(&kind)? {
            return Ok(Emitted::Replayed(record));
        }
        Ok(Emitted::Appended(self.log.append(kind).await?))
    }

    /// Take the recorded outcome of an attempt, if the history has one next
    pub(crate) fn take_outcome(&self, task_seq: u64, attempt: u32) -> Option<RecordKind> {
        let mut pending = self.pending.lock().ok()?;
        let matches = match pending.front().map(|r| &r.kind) {
            Some(RecordKind::TaskCompleted {
                task_seq: seq,
                attempt: att,
                ..
            })
            | Some(RecordKind::TaskFailed {
                task_seq: seq,
                attempt: att,
                ..
            }) => *seq == task_seq && *att == attempt,
            _ => false,
        };

        if matches {
            pending.pop_front().map(|r| r.kind)
        } else {
            None
        }
    }

    fn match_next(&self, kind: &RecordKind) -> std::result::Result<Option<DurableRecord>, WorkflowError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| WorkflowError::NonDeterminism("replay queue poisoned".into()))?;

        match pending.front() {
            None => Ok(None),
            Some(next) if &next.kind == kind => Ok(pending.pop_front()),
            Some(next) => {
                warn!(
                    "History mismatch for {}: recorded {} #{}, workflow emitted {}",
                    self.log.instance_id(),
                    next.kind.label(),
                    next.sequence,
                    kind.label()
                );
                Err(WorkflowError::NonDeterminism(format!(
                    "record #{} is {} but the workflow emitted {}",
                    next.sequence,
                    next.kind.label(),
                    kind.label()
                )))
            }
        }
    }
}
