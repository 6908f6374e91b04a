//! Durability log: the append-only record sequence of each instance and
//! the stores that persist it.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::state::{WorkflowInstance, WorkflowResult, WorkflowStatus};
use super::task::TaskFailure;

/// Payload of a durable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    /// The instance was created
    WorkflowStarted {
        /// Registered workflow type
        workflow_type: String,
        /// Workflow input
        input: Value,
    },
    /// An attempt of a task is about to be dispatched
    TaskScheduled {
        /// Per-instance task sequence number
        task_seq: u64,
        /// Registered task name
        name: String,
        /// 1-based attempt number
        attempt: u32,
        /// Task input
        input: Value,
        /// Per-attempt timeout in milliseconds
        timeout_ms: u64,
    },
    /// An attempt settled successfully
    TaskCompleted {
        /// Per-instance task sequence number
        task_seq: u64,
        /// 1-based attempt number
        attempt: u32,
        /// Task output
        output: Value,
    },
    /// An attempt settled with a classified failure
    TaskFailed {
        /// Per-instance task sequence number
        task_seq: u64,
        /// 1-based attempt number
        attempt: u32,
        /// Classified failure
        failure: TaskFailure,
    },
    /// A signal was accepted into the mailbox
    SignalReceived {
        /// Client supplied delivery id used for deduplication
        delivery_id: String,
        /// Per-instance arrival sequence number
        arrival_seq: u64,
        /// Signal name
        name: String,
        /// Signal payload
        payload: Value,
    },
    /// The workflow took a signal at a wait point
    SignalConsumed {
        /// Arrival sequence number of the consumed envelope
        arrival_seq: u64,
    },
    /// The workflow moved to a new state
    StateChanged {
        /// New status
        status: WorkflowStatus,
        /// Variant-specific fields merged into the instance
        fields: Value,
    },
    /// A client asked for the instance to be cancelled
    CancelRequested {
        /// Reason given by the client
        reason: String,
    },
    /// The instance reached a terminal state
    WorkflowFinished {
        /// Final result
        result: WorkflowResult,
    },
}

impl RecordKind {
    /// Records produced by workflow code and matched against history on replay
    pub fn is_workflow_emitted(&self) -> bool {
        matches!(
            self,
            Self::TaskScheduled { .. }
                | Self::TaskCompleted { .. }
                | Self::TaskFailed { .. }
                | Self::SignalConsumed { .. }
                | Self::StateChanged { .. }
        )
    }

    /// Short name used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "WORKFLOW_STARTED",
            Self::TaskScheduled { .. } => "TASK_SCHEDULED",
            Self::TaskCompleted { .. } => "TASK_COMPLETED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::SignalReceived { .. } => "SIGNAL_RECEIVED",
            Self::SignalConsumed { .. } => "SIGNAL_CONSUMED",
            Self::StateChanged { .. } => "STATE_CHANGED",
            Self::CancelRequested { .. } => "CANCEL_REQUESTED",
            Self::WorkflowFinished { .. } => "WORKFLOW_FINISHED",
        }
    }
}

/// One entry of an instance's durability log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    /// Strictly increasing per instance, starting at 1
    pub sequence: u64,
    /// Time the record was appended
    pub recorded_at: DateTime<Utc>,
    /// Record payload
    pub kind: RecordKind,
}

/// Persistence for durability logs
#[async_trait]
pub trait HistoryStore: Send + Sync + fmt::Debug {
    /// Append a record, assigning the next sequence number. Returns once the
    /// record is durable.
    async fn append(&self, instance_id: &str, kind: RecordKind) -> Result<DurableRecord>;

    /// All records of an instance in sequence order; empty if unknown
    async fn read(&self, instance_id: &str) -> Result<Vec<DurableRecord>>;

    /// Ids of every instance with at least one record
    async fn list_instances(&self) -> Result<Vec<String>>;

    /// Whether the instance has any history
    async fn exists(&self, instance_id: &str) -> Result<bool> {
        Ok(!self.read(instance_id).await?.is_empty())
    }
}

/// Rebuild an instance by folding its history. `None` if it has no records.
pub async fn replay(store: &dyn HistoryStore, instance_id: &str) -> Result<Option<WorkflowInstance>> {
    let records = store.read(instance_id).await?;
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(WorkflowInstance::fold(instance_id, &records)))
}

/// Instance ids double as file names
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    let valid = !instance_id.is_empty()
        && !instance_id.starts_with('.')
        && instance_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInstanceId(instance_id.to_string()))
    }
}

/// Volatile store, used by tests and one-shot runs
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    logs: Mutex<HashMap<String, Vec<DurableRecord>>>,
}

impl InMemoryHistoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given history, e.g. a truncated
    /// log standing in for a crashed process
    pub fn with_records(instance_id: &str, records: Vec<DurableRecord>) -> Self {
        let mut logs = HashMap::new();
        logs.insert(instance_id.to_string(), records);
        Self {
            logs: Mutex::new(logs),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, instance_id: &str, kind: RecordKind) -> Result<DurableRecord> {
        let mut logs = self.logs.lock().await;
        let log = logs.entry(instance_id.to_string()).or_default();
        let record = DurableRecord {
            sequence: log.last().map(|r| r.sequence + 1).unwrap_or(1),
            recorded_at: Utc::now(),
            kind,
        };
        log.push(record.clone());
        Ok(record)
    }

    async fn read(&self, instance_id: &str) -> Result<Vec<DurableRecord>> {
        Ok(self
            .logs
            .lock()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .logs
            .lock()
            .await
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON-lines file per instance under a directory
#[derive(Debug)]
pub struct FileHistoryStore {
    dir: PathBuf,
    last_sequence: Mutex<HashMap<String, u64>>,
}

impl FileHistoryStore {
    /// Open (and create if needed) a history directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Opened history directory {}", dir.display());

        Ok(Self {
            dir,
            last_sequence: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the logs
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, instance_id: &str) -> Result<PathBuf> {
        validate_instance_id(instance_id)?;
        Ok(self.dir.join(format!("{}.jsonl", instance_id)))
    }

    /// Parse a log file. A torn final line is dropped; the returned length is
    /// the byte length of the intact prefix.
    async fn load(path: &Path) -> Result<(Vec<DurableRecord>, u64, bool)> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), 0, false))
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut intact_len = 0u64;
        let mut torn = false;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        for (index, line) in lines.iter().enumerate() {
            let is_last = index + 1 == lines.len();
            let complete = line.ends_with('\n');
            let trimmed = line.trim();

            if trimmed.is_empty() {
                intact_len += line.len() as u64;
                continue;
            }

            match serde_json::from_str::<DurableRecord>(trimmed) {
                Ok(record) if complete => {
                    records.push(record);
                    intact_len += line.len() as u64;
                }
                Err(e) if !is_last => {
                    return Err(Error::Store(format!(
                        "corrupt record {} in {}: {}",
                        index + 1,
                        path.display(),
                        e
                    )))
                }
                _ => {
                    warn!("Dropping torn final record in {}", path.display());
                    torn = true;
                }
            }
        }

        Ok((records, intact_len, torn))
    }

    async fn write_line(path: &Path, line: &[u8]) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let intact_len = file.metadata().await?.len();

        // tokio buffers the write; flush surfaces its error before the sync
        let written = async {
            file.write_all(line).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            if let Err(truncate) = file.set_len(intact_len).await {
                warn!("Could not roll back partial record in {}: {}", path.display(), truncate);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, instance_id: &str, kind: RecordKind) -> Result<DurableRecord> {
        let path = self.path_for(instance_id)?;
        let mut sequences = self.last_sequence.lock().await;

        let last = match sequences.get(instance_id) {
            Some(last) => *last,
            None => {
                let (records, intact_len, torn) = Self::load(&path).await?;
                if torn {
                    let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
                    file.set_len(intact_len).await?;
                    file.sync_data().await?;
                }
                records.last().map(|r| r.sequence).unwrap_or(0)
            }
        };

        let record = DurableRecord {
            sequence: last + 1,
            recorded_at: Utc::now(),
            kind,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Err(e) = Self::write_line(&path, line.as_bytes()).await {
            // Force the next append to reload and cut any torn tail
            sequences.remove(instance_id);
            return Err(e);
        }

        sequences.insert(instance_id.to_string(), record.sequence);
        Ok(record)
    }

    async fn read(&self, instance_id: &str) -> Result<Vec<DurableRecord>> {
        let path = self.path_for(instance_id)?;
        let (records, _, _) = Self::load(&path).await?;
        Ok(records)
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}
