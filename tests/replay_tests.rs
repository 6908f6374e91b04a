use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use durable_agent::activities::{PRODUCE_CONTENT_TASK, RENDER_DOCUMENT_TASK};
use durable_agent::error::Error;
use durable_agent::workflow::{
    task_fn, DurableRecord, FileHistoryStore, HistoryStore, InMemoryHistoryStore, RecordKind,
    WorkflowEngine, WorkflowStatus,
};
use durable_agent::workflows::{
    GenerateReportInput, ReportWorkflow, ReviewWorkflow, UserDecisionSignal,
    GET_RESEARCH_RESULT_QUERY, REPORT_WORKFLOW, REVIEW_WORKFLOW, USER_DECISION_SIGNAL,
};
use serde_json::{json, Value};

/// Deterministic task set counting how often each task really ran
#[derive(Default)]
struct Counters {
    produce: AtomicU32,
    render: AtomicU32,
}

fn engine(store: Arc<dyn HistoryStore>, counters: &Arc<Counters>) -> WorkflowEngine {
    let produce_counter = Arc::clone(counters);
    let render_counter = Arc::clone(counters);

    WorkflowEngine::builder(store)
        .workflow(ReportWorkflow)
        .workflow(ReviewWorkflow)
        .task(
            PRODUCE_CONTENT_TASK,
            task_fn(move |_ctx, input| {
                let counters = Arc::clone(&produce_counter);
                async move {
                    counters.produce.fetch_add(1, Ordering::SeqCst);
                    let prompt = input["prompt"].as_str().unwrap_or_default().to_string();
                    Ok(json!(format!("Draft for: {}", prompt)))
                }
            }),
        )
        .task(
            RENDER_DOCUMENT_TASK,
            task_fn(move |_ctx, _input| {
                let counters = Arc::clone(&render_counter);
                async move {
                    counters.render.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("research_report.txt"))
                }
            }),
        )
        .build()
}

fn workflow_emitted(records: &[DurableRecord]) -> Vec<RecordKind> {
    records
        .iter()
        .map(|r| r.kind.clone())
        .filter(RecordKind::is_workflow_emitted)
        .collect()
}

async fn wait_for_status(engine: &WorkflowEngine, instance_id: &str, status: WorkflowStatus) {
    let mut receiver = engine.watch(instance_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|i| i.status == status))
        .await
        .expect("status not reached in time")
        .unwrap();
}

/// Redeliver a signal to a resumed instance, which may already have finished
async fn redeliver(engine: &WorkflowEngine, instance_id: &str, delivery_id: &str, payload: &Value) {
    match engine
        .deliver_signal(instance_id, delivery_id, USER_DECISION_SIGNAL, payload.clone())
        .await
    {
        Ok(_) | Err(Error::InstanceClosed(_)) => {}
        Err(e) => panic!("redelivery of {} failed: {}", delivery_id, e),
    }
}

#[tokio::test]
async fn test_resume_at_decision_point_without_rerunning_tasks() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let first_run = Arc::new(Counters::default());
    let first = engine(store.clone(), &first_run);

    let id = first
        .start_workflow(REVIEW_WORKFLOW, &GenerateReportInput::new("Facts about tardigrades"))
        .await
        .unwrap();
    wait_for_status(&first, &id, WorkflowStatus::AwaitingDecision).await;
    assert_eq!(first_run.produce.load(Ordering::SeqCst), 1);

    // A fresh process sees only what was made durable
    let records = store.read(&id).await.unwrap();
    let restarted = Arc::new(InMemoryHistoryStore::with_records(&id, records));
    let second_run = Arc::new(Counters::default());
    let second = engine(restarted, &second_run);

    assert_eq!(second.recover().await.unwrap(), vec![id.clone()]);
    wait_for_status(&second, &id, WorkflowStatus::AwaitingDecision).await;
    assert_eq!(
        second.query(&id, GET_RESEARCH_RESULT_QUERY).await.unwrap(),
        json!("Draft for: Facts about tardigrades")
    );

    second
        .send_signal(&id, USER_DECISION_SIGNAL, &UserDecisionSignal::keep())
        .await
        .unwrap();
    let result = second.await_result(&id).await.unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(second_run.produce.load(Ordering::SeqCst), 0);
    assert_eq!(second_run.render.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_in_flight_task_is_redispatched() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let counters = Arc::new(Counters::default());
    let original = engine(store.clone(), &counters);

    let id = original
        .start_workflow(REPORT_WORKFLOW, &GenerateReportInput::new("Facts about tardigrades"))
        .await
        .unwrap();
    let expected = original.await_result(&id).await.unwrap();
    let records = store.read(&id).await.unwrap();

    // Crash right after render was scheduled
    let cut = records
        .iter()
        .position(|r| matches!(&r.kind, RecordKind::TaskScheduled { name, .. } if name == RENDER_DOCUMENT_TASK))
        .unwrap();
    let truncated = Arc::new(InMemoryHistoryStore::with_records(&id, records[..=cut].to_vec()));

    let resumed = Arc::new(Counters::default());
    let restarted = engine(truncated.clone(), &resumed);
    restarted.recover().await.unwrap();
    let result = restarted.await_result(&id).await.unwrap();

    assert_eq!(result, expected);
    assert_eq!(resumed.produce.load(Ordering::SeqCst), 0);
    assert_eq!(resumed.render.load(Ordering::SeqCst), 1);

    let replayed = truncated.read(&id).await.unwrap();
    assert_eq!(workflow_emitted(&replayed), workflow_emitted(&records));
}

#[tokio::test]
async fn test_every_prefix_replays_to_the_same_history() {
    let edit = json!(UserDecisionSignal::edit("add more detail"));
    let keep = json!(UserDecisionSignal::keep());

    let store = Arc::new(InMemoryHistoryStore::new());
    let counters = Arc::new(Counters::default());
    let original = engine(store.clone(), &counters);

    let id = original
        .start_workflow(REVIEW_WORKFLOW, &GenerateReportInput::new("Facts about tardigrades"))
        .await
        .unwrap();
    original
        .deliver_signal(&id, "decision-1", USER_DECISION_SIGNAL, edit.clone())
        .await
        .unwrap();
    original
        .deliver_signal(&id, "decision-2", USER_DECISION_SIGNAL, keep.clone())
        .await
        .unwrap();
    let expected_result = original.await_result(&id).await.unwrap();
    assert!(expected_result.is_success(), "{:?}", expected_result.error);

    let records = store.read(&id).await.unwrap();
    let expected = workflow_emitted(&records);

    // Every prefix that stops short of the final record
    for len in 1..records.len() {
        let prefix = Arc::new(InMemoryHistoryStore::with_records(&id, records[..len].to_vec()));
        let restarted = engine(prefix.clone(), &Arc::new(Counters::default()));
        restarted.recover().await.unwrap();

        // Clients redeliver; ids already recorded are acknowledged as duplicates
        redeliver(&restarted, &id, "decision-1", &edit).await;
        redeliver(&restarted, &id, "decision-2", &keep).await;

        let result = restarted.await_result(&id).await.unwrap();
        assert_eq!(result, expected_result, "prefix of {} records", len);

        let replayed = prefix.read(&id).await.unwrap();
        assert_eq!(workflow_emitted(&replayed), expected, "prefix of {} records", len);
    }
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = std::env::temp_dir().join(format!("durable-agent-history-{}", uuid::Uuid::new_v4()));
    let counters = Arc::new(Counters::default());

    let id = {
        let store = Arc::new(FileHistoryStore::open(&dir).await.unwrap());
        let first = engine(store, &counters);
        let id = first
            .start_workflow(REVIEW_WORKFLOW, &GenerateReportInput::new("Facts about tardigrades"))
            .await
            .unwrap();
        wait_for_status(&first, &id, WorkflowStatus::AwaitingDecision).await;
        id
    };

    // Decision sent while nothing runs the instance is buffered durably
    let store = Arc::new(FileHistoryStore::open(&dir).await.unwrap());
    let idle = engine(store.clone(), &counters);
    idle.send_signal(&id, USER_DECISION_SIGNAL, &UserDecisionSignal::keep())
        .await
        .unwrap();
    assert_eq!(idle.describe(&id).await.unwrap().status, WorkflowStatus::AwaitingDecision);

    assert_eq!(idle.recover().await.unwrap(), vec![id.clone()]);
    let result = idle.await_result(&id).await.unwrap();
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(counters.produce.load(Ordering::SeqCst), 1);
    assert_eq!(counters.render.load(Ordering::SeqCst), 1);

    // Finished instances are not resumed again
    assert!(idle.recover().await.unwrap().is_empty());

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}
