use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::telemetry::record_workflow_run;

use super::context::{WorkflowContext, WorkflowError};
use super::dispatcher::Dispatcher;
use super::history::{replay, validate_instance_id, DurableRecord, HistoryStore, RecordKind};
use super::journal::{InstanceLog, Journal};
use super::signal::{new_delivery_id, Mailbox, SignalDelivery};
use super::state::{WorkflowInstance, WorkflowOutcome, WorkflowResult, WorkflowStatus};
use super::task::{TaskHandler, TaskRegistry};

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    /// Maximum number of task attempts executing at once, across instances
    pub max_concurrent_tasks: usize,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
        }
    }
}

/// Deterministic workflow code
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Registered type name
    fn name(&self) -> &str;

    /// Run the workflow to a terminal outcome. Must only interact with the
    /// outside world through `ctx`.
    async fn run(&self, ctx: WorkflowContext, input: Value) -> std::result::Result<WorkflowOutcome, WorkflowError>;

    /// Answer a workflow-specific query from committed state. `None` means
    /// the query is unknown.
    fn query(&self, _name: &str, _instance: &WorkflowInstance) -> Option<Value> {
        None
    }
}

struct Runtime {
    log: Arc<InstanceLog>,
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
    result: watch::Receiver<Option<WorkflowResult>>,
}

struct EngineInner {
    id: String,
    store: Arc<dyn HistoryStore>,
    workflows: HashMap<String, Arc<dyn Workflow>>,
    dispatcher: Arc<Dispatcher>,
    running: Mutex<HashMap<String, Arc<Runtime>>>,
}

/// Engine hosting workflow instances.
///
/// Each instance has at most one execution context. Everything that changes
/// an instance is appended to the [`HistoryStore`] first, so an instance can
/// be rebuilt by [`recover`](Self::recover) after the process restarts.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut workflows: Vec<_> = self.inner.workflows.keys().collect();
        workflows.sort();
        f.debug_struct("WorkflowEngine")
            .field("id", &self.inner.id)
            .field("store", &self.inner.store)
            .field("workflows", &workflows)
            .field("tasks", self.inner.dispatcher.registry())
            .finish()
    }
}

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    store: Arc<dyn HistoryStore>,
    config: WorkflowEngineConfig,
    workflows: HashMap<String, Arc<dyn Workflow>>,
    tasks: TaskRegistry,
}

impl fmt::Debug for WorkflowEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngineBuilder")
            .field("config", &self.config)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngineBuilder {
    /// Set the engine configuration
    pub fn config(mut self, config: WorkflowEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a workflow under its name
    pub fn workflow<W: Workflow>(mut self, workflow: W) -> Self {
        self.workflows
            .insert(workflow.name().to_string(), Arc::new(workflow));
        self
    }

    /// Register a task handler
    pub fn task(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.tasks.register(name, handler);
        self
    }

    /// Register several task handlers
    pub fn tasks<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn TaskHandler>)>,
    {
        for (name, handler) in handlers {
            self.tasks.register(name, handler);
        }
        self
    }

    /// Build the engine
    pub fn build(self) -> WorkflowEngine {
        let dispatcher = Dispatcher::new(self.tasks, self.config.max_concurrent_tasks);
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                id: Uuid::new_v4().to_string(),
                store: self.store,
                workflows: self.workflows,
                dispatcher: Arc::new(dispatcher),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl WorkflowEngine {
    /// Start building an engine on top of `store`
    pub fn builder(store: Arc<dyn HistoryStore>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            store,
            config: WorkflowEngineConfig::default(),
            workflows: HashMap::new(),
            tasks: TaskRegistry::new(),
        }
    }

    /// Get the ID of the workflow engine
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The history store
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.inner.store
    }

    fn workflow(&self, workflow_type: &str) -> Result<Arc<dyn Workflow>> {
        self.inner
            .workflows
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| Error::UnknownWorkflowType(workflow_type.to_string()))
    }

    async fn runtime(&self, instance_id: &str) -> Option<Arc<Runtime>> {
        self.inner.running.lock().await.get(instance_id).cloned()
    }

    /// Start a new instance with a generated id
    pub async fn start_workflow<I: Serialize + ?Sized>(
        &self,
        workflow_type: &str,
        input: &I,
    ) -> Result<String> {
        let instance_id = format!("{}-{}", workflow_type, Uuid::new_v4());
        self.start_workflow_with_id(workflow_type, &instance_id, input)
            .await?;
        Ok(instance_id)
    }

    /// Start a new instance under a caller-chosen id
    #[instrument(skip(self, input))]
    pub async fn start_workflow_with_id<I: Serialize + ?Sized>(
        &self,
        workflow_type: &str,
        instance_id: &str,
        input: &I,
    ) -> Result<()> {
        let workflow = self.workflow(workflow_type)?;
        validate_instance_id(instance_id)?;
        let input = serde_json::to_value(input)?;

        let mut running = self.inner.running.lock().await;
        if running.contains_key(instance_id) {
            return Err(Error::AlreadyRunning(instance_id.to_string()));
        }
        if self.inner.store.exists(instance_id).await? {
            return Err(Error::AlreadyExists(instance_id.to_string()));
        }

        let log = Arc::new(InstanceLog::new(
            Arc::clone(&self.inner.store),
            WorkflowInstance::new(instance_id),
        ));
        log.append(RecordKind::WorkflowStarted {
            workflow_type: workflow_type.to_string(),
            input: input.clone(),
        })
        .await?;

        info!("Starting workflow {} as {}", workflow_type, instance_id);
        let mailbox = Arc::new(Mailbox::new(instance_id));
        self.launch(&mut running, workflow, log, &[], mailbox, input);
        Ok(())
    }

    fn launch(
        &self,
        running: &mut HashMap<String, Arc<Runtime>>,
        workflow: Arc<dyn Workflow>,
        log: Arc<InstanceLog>,
        history: &[DurableRecord],
        mailbox: Arc<Mailbox>,
        input: Value,
    ) {
        let instance_id = log.instance_id().to_string();
        let cancel = CancellationToken::new();
        if log.snapshot().cancel_requested.is_some() {
            cancel.cancel();
        }

        let journal = Journal::new(Arc::clone(&log), history);
        let ctx = WorkflowContext::new(
            journal,
            Arc::clone(&mailbox),
            Arc::clone(&self.inner.dispatcher),
            cancel.clone(),
        );

        let (result_tx, result_rx) = watch::channel(None);
        let runtime = Arc::new(Runtime {
            log,
            mailbox,
            cancel,
            result: result_rx,
        });
        running.insert(instance_id.clone(), Arc::clone(&runtime));

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.drive(workflow, ctx, &runtime, input).await;
            engine.inner.running.lock().await.remove(&instance_id);
            let _ = result_tx.send(Some(result));
        });
    }

    #[instrument(skip_all, fields(instance_id = %ctx.instance_id(), workflow = %workflow.name()))]
    async fn drive(
        &self,
        workflow: Arc<dyn Workflow>,
        ctx: WorkflowContext,
        runtime: &Runtime,
        input: Value,
    ) -> WorkflowResult {
        let start = Instant::now();
        let instance_id = ctx.instance_id().to_string();

        let mut result = WorkflowResult {
            instance_id: instance_id.clone(),
            workflow_type: workflow.name().to_string(),
            status: WorkflowStatus::Failed,
            output: None,
            error: None,
        };

        match workflow.run(ctx, input).await {
            Ok(outcome) if outcome.status.is_terminal() => {
                info!("Workflow finished with status {}", outcome.status);
                result.status = outcome.status;
                result.output = Some(outcome.output);
            }
            Ok(outcome) => {
                error!("Workflow returned non-terminal status {}", outcome.status);
                result.error = Some(format!(
                    "workflow returned non-terminal status {}",
                    outcome.status
                ));
            }
            Err(err) => {
                error!("Workflow failed: {}", err);
                result.error = Some(err.to_string());
            }
        }

        runtime.mailbox.close().await;
        if let Err(err) = runtime
            .log
            .append(RecordKind::WorkflowFinished {
                result: result.clone(),
            })
            .await
        {
            error!("Failed to record final result of {}: {}", instance_id, err);
        }

        record_workflow_run(&result.workflow_type, result.status, start.elapsed());

        result
    }

    /// Send a signal with a fresh delivery id
    pub async fn send_signal<P: Serialize + ?Sized>(
        &self,
        instance_id: &str,
        name: &str,
        payload: &P,
    ) -> Result<SignalDelivery> {
        let payload = serde_json::to_value(payload)?;
        self.deliver_signal(instance_id, &new_delivery_id(), name, payload)
            .await
    }

    /// Deliver a signal under a client supplied delivery id. Redelivery of an
    /// id already accepted is acknowledged as a duplicate.
    #[instrument(skip(self, payload))]
    pub async fn deliver_signal(
        &self,
        instance_id: &str,
        delivery_id: &str,
        name: &str,
        payload: Value,
    ) -> Result<SignalDelivery> {
        let running = self.inner.running.lock().await;
        if let Some(runtime) = running.get(instance_id).cloned() {
            drop(running);
            return runtime
                .mailbox
                .deliver(&runtime.log, delivery_id.to_string(), name, payload)
                .await;
        }

        // Not running: buffer durably for the next recovery. The lock stays
        // held until the append so a concurrent resume reads this signal.
        let history = self.inner.store.read(instance_id).await?;
        if history.is_empty() {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }
        let instance = WorkflowInstance::fold(instance_id, &history);
        if instance.is_terminal() {
            return Err(Error::InstanceClosed(instance_id.to_string()));
        }

        let mut next_arrival = 1;
        for record in &history {
            if let RecordKind::SignalReceived {
                delivery_id: seen,
                arrival_seq,
                ..
            } = &record.kind
            {
                if seen == delivery_id {
                    return Ok(SignalDelivery::Duplicate);
                }
                next_arrival = next_arrival.max(arrival_seq + 1);
            }
        }

        self.inner
            .store
            .append(
                instance_id,
                RecordKind::SignalReceived {
                    delivery_id: delivery_id.to_string(),
                    arrival_seq: next_arrival,
                    name: name.to_string(),
                    payload,
                },
            )
            .await?;
        drop(running);
        debug!("Buffered signal {} for suspended {}", name, instance_id);
        Ok(SignalDelivery::Accepted {
            arrival_seq: next_arrival,
        })
    }

    /// Last committed state of an instance
    pub async fn describe(&self, instance_id: &str) -> Result<WorkflowInstance> {
        if let Some(runtime) = self.runtime(instance_id).await {
            return Ok(runtime.log.snapshot());
        }
        replay(self.inner.store.as_ref(), instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))
    }

    /// Read-only query against committed state. Never waits for in-flight
    /// tasks.
    pub async fn query(&self, instance_id: &str, name: &str) -> Result<Value> {
        let instance = self.describe(instance_id).await?;

        if let Some(workflow) = self.inner.workflows.get(&instance.workflow_type) {
            if let Some(value) = workflow.query(name, &instance) {
                return Ok(value);
            }
        }

        match name {
            "status" => Ok(instance.summary()),
            "state" => Ok(serde_json::to_value(&instance)?),
            _ => Err(Error::UnknownQuery {
                instance_id: instance_id.to_string(),
                query: name.to_string(),
            }),
        }
    }

    /// Subscribe to committed state changes
    pub async fn watch(&self, instance_id: &str) -> Result<watch::Receiver<WorkflowInstance>> {
        if let Some(runtime) = self.runtime(instance_id).await {
            return Ok(runtime.log.subscribe());
        }
        let instance = self.describe(instance_id).await?;
        let (_, receiver) = watch::channel(instance);
        Ok(receiver)
    }

    /// Wait for the instance to reach a terminal state
    pub async fn await_result(&self, instance_id: &str) -> Result<WorkflowResult> {
        if let Some(runtime) = self.runtime(instance_id).await {
            let mut receiver = runtime.result.clone();
            drop(runtime);
            let finished = match receiver.wait_for(|r| r.is_some()).await {
                Ok(result) => (*result).clone(),
                Err(_) => None,
            };
            if let Some(result) = finished {
                return Ok(result);
            }
        }

        let instance = self.describe(instance_id).await?;
        match instance.result {
            Some(result) => Ok(result),
            None => Err(Error::NotRunning(instance_id.to_string())),
        }
    }

    /// Request cancellation. The instance fails at its next suspension or
    /// dispatch boundary; in-flight tasks are aborted.
    #[instrument(skip(self))]
    pub async fn cancel_workflow(&self, instance_id: &str, reason: &str) -> Result<()> {
        let kind = RecordKind::CancelRequested {
            reason: reason.to_string(),
        };

        let running = self.inner.running.lock().await;
        if let Some(runtime) = running.get(instance_id).cloned() {
            drop(running);
            runtime.log.append(kind).await?;
            runtime.cancel.cancel();
            info!("Cancellation requested for {}", instance_id);
            return Ok(());
        }

        let instance = replay(self.inner.store.as_ref(), instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;
        if instance.is_terminal() {
            return Err(Error::InstanceClosed(instance_id.to_string()));
        }
        self.inner.store.append(instance_id, kind).await?;
        Ok(())
    }

    /// Resume one unfinished instance from its history
    #[instrument(skip(self))]
    pub async fn resume_workflow(&self, instance_id: &str) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        if running.contains_key(instance_id) {
            return Err(Error::AlreadyRunning(instance_id.to_string()));
        }

        let history = self.inner.store.read(instance_id).await?;
        if history.is_empty() {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }
        let instance = WorkflowInstance::fold(instance_id, &history);
        if instance.is_terminal() {
            return Err(Error::InstanceClosed(instance_id.to_string()));
        }

        let workflow = self.workflow(&instance.workflow_type)?;
        let input = instance.input.clone();
        info!(
            "Resuming {} from record #{} ({})",
            instance_id, instance.last_sequence, instance.status
        );

        let mailbox = Arc::new(Mailbox::restore(instance_id, &history));
        let log = Arc::new(InstanceLog::new(Arc::clone(&self.inner.store), instance));
        self.launch(&mut running, workflow, log, &history, mailbox, input);
        Ok(())
    }

    /// Resume every unfinished instance in the store. Returns the ids resumed.
    pub async fn recover(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();

        for instance_id in self.inner.store.list_instances().await? {
            match self.resume_workflow(&instance_id).await {
                Ok(()) => resumed.push(instance_id),
                Err(Error::InstanceClosed(_)) | Err(Error::AlreadyRunning(_)) => {}
                Err(err) => warn!("Could not resume {}: {}", instance_id, err),
            }
        }

        if !resumed.is_empty() {
            info!("Recovered {} unfinished workflow(s)", resumed.len());
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::history::InMemoryHistoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Store whose next read parks until released
    #[derive(Debug)]
    struct PausingStore {
        inner: InMemoryHistoryStore,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl PausingStore {
        fn new(inner: InMemoryHistoryStore) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl HistoryStore for PausingStore {
        async fn append(&self, instance_id: &str, kind: RecordKind) -> Result<DurableRecord> {
            self.inner.append(instance_id, kind).await
        }

        async fn read(&self, instance_id: &str) -> Result<Vec<DurableRecord>> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.read(instance_id).await
        }

        async fn list_instances(&self) -> Result<Vec<String>> {
            self.inner.list_instances().await
        }
    }

    /// Waits for a `go` signal and returns its payload
    struct Gate;

    #[async_trait]
    impl Workflow for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn run(
            &self,
            ctx: WorkflowContext,
            _input: Value,
        ) -> std::result::Result<WorkflowOutcome, WorkflowError> {
            ctx.transition(WorkflowStatus::AwaitingDecision, json!({ "gate": "closed" }))
                .await?;
            let envelope = ctx.wait_for_signal("go").await?;
            Ok(WorkflowOutcome::completed(envelope.payload))
        }
    }

    fn engine(store: Arc<dyn HistoryStore>) -> WorkflowEngine {
        WorkflowEngine::builder(store).workflow(Gate).build()
    }

    async fn wait_until_waiting(engine: &WorkflowEngine, instance_id: &str) {
        let mut receiver = engine.watch(instance_id).await.unwrap();
        receiver
            .wait_for(|i| i.status == WorkflowStatus::AwaitingDecision)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_completes_instance() {
        let engine = engine(Arc::new(InMemoryHistoryStore::new()));
        engine
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();

        engine.send_signal("gate-1", "go", &json!({ "n": 1 })).await.unwrap();
        let result = engine.await_result("gate-1").await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.output, Some(json!({ "n": 1 })));
        assert_eq!(engine.describe("gate-1").await.unwrap().field("gate"), Some(&json!("closed")));
    }

    #[tokio::test]
    async fn test_client_errors() {
        let engine = engine(Arc::new(InMemoryHistoryStore::new()));

        let unknown = engine.start_workflow("nope", &json!({})).await;
        assert!(matches!(unknown, Err(Error::UnknownWorkflowType(_))));
        let bad_id = engine.start_workflow_with_id("gate", "../etc", &json!({})).await;
        assert!(matches!(bad_id, Err(Error::InvalidInstanceId(_))));
        let missing = engine.send_signal("missing", "go", &json!({})).await;
        assert!(matches!(missing, Err(Error::InstanceNotFound(_))));

        engine
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        let again = engine.start_workflow_with_id("gate", "gate-1", &json!({})).await;
        assert!(matches!(again, Err(Error::AlreadyRunning(_))));

        let query = engine.query("gate-1", "get_research_result").await;
        assert!(matches!(query, Err(Error::UnknownQuery { .. })));
        let status = engine.query("gate-1", "status").await.unwrap();
        assert_eq!(status["workflow_type"], json!("gate"));
    }

    #[tokio::test]
    async fn test_cancel_running_instance() {
        let engine = engine(Arc::new(InMemoryHistoryStore::new()));
        engine
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        wait_until_waiting(&engine, "gate-1").await;

        engine.cancel_workflow("gate-1", "operator abort").await.unwrap();
        let result = engine.await_result("gate-1").await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.error.unwrap().contains("operator abort"));
        let closed = engine.cancel_workflow("gate-1", "again").await;
        assert!(matches!(closed, Err(Error::InstanceClosed(_))));
    }

    #[tokio::test]
    async fn test_cancel_requested_while_suspended() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let first = engine(store.clone());
        first
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        wait_until_waiting(&first, "gate-1").await;

        // Another process records the request while no engine drives the instance
        let records = store.read("gate-1").await.unwrap();
        let restarted = engine(Arc::new(InMemoryHistoryStore::with_records("gate-1", records)));
        restarted.cancel_workflow("gate-1", "shutdown").await.unwrap();

        assert_eq!(restarted.recover().await.unwrap(), vec!["gate-1".to_string()]);
        let result = restarted.await_result("gate-1").await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.error.unwrap().contains("shutdown"));
    }

    #[tokio::test]
    async fn test_unfinished_instance_needs_recovery() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let first = engine(store.clone());
        first
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        wait_until_waiting(&first, "gate-1").await;

        let records = store.read("gate-1").await.unwrap();
        let idle = engine(Arc::new(InMemoryHistoryStore::with_records("gate-1", records)));
        assert!(matches!(idle.await_result("gate-1").await, Err(Error::NotRunning(_))));
        assert_eq!(
            idle.describe("gate-1").await.unwrap().status,
            WorkflowStatus::AwaitingDecision
        );
    }

    #[tokio::test]
    async fn test_signal_buffered_while_resuming_is_delivered() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let first = engine(store.clone());
        first
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        wait_until_waiting(&first, "gate-1").await;

        let records = store.read("gate-1").await.unwrap();
        let pausing = Arc::new(PausingStore::new(InMemoryHistoryStore::with_records(
            "gate-1", records,
        )));
        let restarted = engine(pausing.clone());

        // The delivery reads history while nothing drives the instance
        pausing.armed.store(true, Ordering::SeqCst);
        let delivering = {
            let engine = restarted.clone();
            tokio::spawn(async move { engine.send_signal("gate-1", "go", &json!({ "n": 7 })).await })
        };
        pausing.entered.notified().await;

        let resuming = {
            let engine = restarted.clone();
            tokio::spawn(async move { engine.resume_workflow("gate-1").await })
        };
        tokio::task::yield_now().await;
        pausing.release.notify_one();

        let delivery = delivering.await.unwrap().unwrap();
        assert_eq!(delivery, SignalDelivery::Accepted { arrival_seq: 1 });
        resuming.await.unwrap().unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), restarted.await_result("gate-1"))
            .await
            .expect("resumed instance never saw the signal")
            .unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.output, Some(json!({ "n": 7 })));
    }

    #[tokio::test]
    async fn test_cancel_buffered_while_resuming_is_applied() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let first = engine(store.clone());
        first
            .start_workflow_with_id("gate", "gate-1", &json!({}))
            .await
            .unwrap();
        wait_until_waiting(&first, "gate-1").await;

        let records = store.read("gate-1").await.unwrap();
        let pausing = Arc::new(PausingStore::new(InMemoryHistoryStore::with_records(
            "gate-1", records,
        )));
        let restarted = engine(pausing.clone());

        pausing.armed.store(true, Ordering::SeqCst);
        let cancelling = {
            let engine = restarted.clone();
            tokio::spawn(async move { engine.cancel_workflow("gate-1", "shutdown").await })
        };
        pausing.entered.notified().await;

        let resuming = {
            let engine = restarted.clone();
            tokio::spawn(async move { engine.resume_workflow("gate-1").await })
        };
        tokio::task::yield_now().await;
        pausing.release.notify_one();

        cancelling.await.unwrap().unwrap();
        resuming.await.unwrap().unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), restarted.await_result("gate-1"))
            .await
            .expect("resumed instance never saw the cancellation")
            .unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.error.unwrap().contains("shutdown"));
    }
}
