use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agents::{CapabilityAnswer, ClassificationCapability, ClassificationContext, KeywordCapability};
use async_trait::async_trait;
use chrono::Utc;
use ledger::{InMemoryStorage, Storage, StorageError, WriteOp};
use orchestrator::events::RunEventKind;
use orchestrator::run_store::{self, RunStoreError};
use orchestrator::types_runs::{key_run, Transition, TransitionError};
use orchestrator::{
    pipeline_run, queries, scheduler, AppState, PipelineRun, PipelineSettings, RunStatus,
    SharedState, StepId, StepStatus,
};
use serde_json::{json, Value};
use tabular::{ColumnType, Dataset, Row};
use tokio::sync::Notify;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(5);

fn five_row_sales() -> Dataset {
    let headers: Vec<String> = ["date", "product", "sales", "region", "cost"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows: Vec<Vec<Value>> = vec![
        vec![json!("2024-01-01"), json!("Widget"), json!(100), json!("North"), json!(60)],
        vec![json!("2024-01-02"), json!("Gadget"), json!(200), json!("South"), json!(120)],
        vec![json!("2024-01-03"), json!("Widget"), json!(150), json!("East"), json!(90)],
        vec![json!("2024-01-04"), json!("Gizmo"), json!(300), json!("North"), json!(180)],
        vec![json!("2024-01-05"), json!("Gadget"), json!(250), json!("West"), json!(150)],
    ];
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|r| headers.iter().cloned().zip(r).collect())
        .collect();
    Dataset::from_rows("sales.csv", headers, rows).unwrap()
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        classify_timeout: Duration::from_secs(5),
        persist_retries: 3,
        persist_backoff: Duration::from_millis(1),
        max_concurrent_runs: 2,
        max_kpis: 8,
    }
}

fn keyword_state() -> SharedState {
    AppState::new(
        Box::new(InMemoryStorage::new()),
        Arc::new(KeywordCapability),
        settings(),
    )
    .unwrap()
}

async fn run_to_end(state: &SharedState, ds: Dataset) -> PipelineRun {
    let run_id = scheduler::submit(state, ds).await.unwrap();
    queries::wait_for_terminal(state, run_id, POLL, WAIT).await.unwrap()
}

fn step_status(run: &PipelineRun, step: StepId) -> StepStatus {
    run.step(step).unwrap().status
}

struct Slow(Duration);

#[async_trait]
impl ClassificationCapability for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn classify(&self, _ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        tokio::time::sleep(self.0).await;
        Ok(CapabilityAnswer {
            domain: "sales".into(),
            confidence: 0.9,
            secondary: vec![],
        })
    }
}

/// Parks inside classification until the test releases it.
struct Gated {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ClassificationCapability for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn classify(&self, _ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(CapabilityAnswer {
            domain: "sales".into(),
            confidence: 0.8,
            secondary: vec![],
        })
    }
}

/// Fails the next N batches that write a key under `prefix`.
#[derive(Clone)]
struct FlakyStorage {
    inner: InMemoryStorage,
    prefix: &'static [u8],
    fail_next: Arc<AtomicU32>,
}

impl Storage for FlakyStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(key)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        self.inner.keys_with_prefix(prefix)
    }

    fn write_batch(&mut self, ops: &[WriteOp]) -> Result<(), StorageError> {
        let touches = ops.iter().any(|op| op.key().starts_with(self.prefix));
        if touches
            && self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        self.inner.write_batch(ops)
    }
}

fn flaky_state(failures: u32) -> SharedState {
    let storage = FlakyStorage {
        inner: InMemoryStorage::new(),
        prefix: b"result:",
        fail_next: Arc::new(AtomicU32::new(failures)),
    };
    AppState::new(Box::new(storage), Arc::new(KeywordCapability), settings()).unwrap()
}

#[tokio::test]
async fn test_happy_path_completes_with_all_results() {
    let state = keyword_state();
    let run = run_to_end(&state, five_row_sales()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error_message.is_none());
    assert!(run.started_at.is_some() && run.completed_at.is_some());

    let progress = queries::get_progress(&state, run.id).await.unwrap();
    assert_eq!(progress.progress_percentage, 100.0);
    assert_eq!(progress.current_step, None);

    let result = queries::get_result(&state, run.id).await.unwrap();
    let report = result.quality_report.unwrap();
    assert!(report.data_quality_score < 75.0);
    let domain = result.domain_classification.unwrap();
    assert_eq!(domain.domain, "sales");
    assert_eq!(domain.source, "keyword");
    assert!(!result.recommended_kpis.unwrap().is_empty());
    assert!(!result.recommended_charts.unwrap().is_empty());
    assert_eq!(result.dashboard_structure.unwrap().title, "Sales Dashboard");
    assert_eq!(result.upload_validation.unwrap().rows, 5);
    assert_eq!(result.result_digest_hex.unwrap().len(), 64);
    assert!(!result.kpi_hierarchy.unwrap().primary.is_empty());
    let insights = result.business_insights.unwrap();
    assert!(insights
        .key_findings
        .iter()
        .any(|f| f.starts_with("Dataset identified as Sales domain")));
    assert!(!insights.recommendations.is_empty());

    let events = queries::get_events(&state, run.id).await.unwrap();
    assert_eq!(events.first().unwrap().kind, RunEventKind::RunSubmitted);
    assert_eq!(events.last().unwrap().kind, RunEventKind::RunCompleted);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());

    assert!(state.ledger.read().await.verify_event_log().unwrap());
}

#[tokio::test]
async fn test_classifier_timeout_falls_back_and_run_completes() {
    let mut s = settings();
    s.classify_timeout = Duration::from_millis(20);
    let state = AppState::new(
        Box::new(InMemoryStorage::new()),
        Arc::new(Slow(Duration::from_millis(500))),
        s,
    )
    .unwrap();

    let run = run_to_end(&state, five_row_sales()).await;
    assert_eq!(run.status, RunStatus::Completed);

    let result = queries::get_result(&state, run.id).await.unwrap();
    let domain = result.domain_classification.unwrap();
    assert_eq!(domain.domain, "general");
    assert_eq!(domain.confidence, 0.0);
    assert!(domain.is_fallback());
    assert_eq!(result.dashboard_structure.unwrap().title, "General Dashboard");
}

#[tokio::test]
async fn test_corrupted_column_type_fails_quality_analysis() {
    let state = keyword_state();
    let mut ds = five_row_sales();
    ds.columns[2].inferred_type = ColumnType::Boolean;

    let run = run_to_end(&state, ds).await;
    assert_eq!(run.status, RunStatus::Failed);
    let msg = run.error_message.clone().unwrap();
    assert!(msg.contains("quality_analysis"), "{msg}");

    assert_eq!(step_status(&run, StepId::UploadValidation), StepStatus::Completed);
    assert_eq!(step_status(&run, StepId::QualityAnalysis), StepStatus::Failed);
    for step in [
        StepId::DomainClassification,
        StepId::KpiRecommendation,
        StepId::DashboardDesign,
        StepId::Finalize,
    ] {
        assert_eq!(step_status(&run, step), StepStatus::Pending);
    }

    let result = queries::get_result(&state, run.id).await.unwrap();
    assert!(result.upload_validation.is_some());
    assert!(result.quality_report.is_none());
    assert!(result.recommended_kpis.is_none());
    assert!(result.dashboard_structure.is_none());

    let status = queries::get_status(&state, run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Failed);
    assert_eq!(status.error_message, Some(msg));
}

#[tokio::test]
async fn test_empty_dataset_fails_upload_validation() {
    let state = keyword_state();
    let ds = Dataset::from_rows("empty.csv", vec!["a".to_string()], vec![]).unwrap();

    let run = run_to_end(&state, ds).await;
    assert_eq!(run.status, RunStatus::Failed);
    let msg = run.error_message.clone().unwrap();
    assert!(msg.contains("upload_validation"));
    assert!(msg.contains("empty"));
    assert_eq!(step_status(&run, StepId::QualityAnalysis), StepStatus::Pending);
}

#[tokio::test]
async fn test_terminal_run_accepts_no_more_transitions() {
    let state = keyword_state();
    let run = run_to_end(&state, five_row_sales()).await;

    let mut db = state.ledger.write().await;
    let before = db.checkpoint();
    let err = run_store::apply_and_commit(
        &mut *db,
        run.id,
        &Transition::Fail {
            step: StepId::Finalize,
            error: "late".into(),
        },
        None,
        Utc::now(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        RunStoreError::Transition(TransitionError::Terminal {
            status: RunStatus::Completed,
            ..
        })
    ));
    assert_eq!(db.checkpoint(), before);
    assert_eq!(run_store::load_run(&*db, run.id).unwrap(), run);
}

#[tokio::test]
async fn test_progress_is_recomputed_from_persisted_steps() {
    let state = keyword_state();
    let run = run_to_end(&state, five_row_sales()).await;

    {
        let mut db = state.ledger.write().await;
        let mut tampered = run.clone();
        for s in tampered.steps.iter_mut().skip(3) {
            s.status = StepStatus::Pending;
        }
        db.set(
            key_run(run.id).as_bytes(),
            &serde_json::to_vec(&tampered).unwrap(),
        )
        .unwrap();
    }

    let progress = queries::get_progress(&state, run.id).await.unwrap();
    assert_eq!(progress.progress_percentage, 50.0);
}

#[tokio::test]
async fn test_cancel_stops_at_next_stage_boundary() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let state = AppState::new(
        Box::new(InMemoryStorage::new()),
        Arc::new(Gated {
            entered: entered.clone(),
            release: release.clone(),
        }),
        settings(),
    )
    .unwrap();

    let run_id = scheduler::submit(&state, five_row_sales()).await.unwrap();
    entered.notified().await;

    let mid = queries::get_progress(&state, run_id).await.unwrap();
    assert_eq!(mid.current_step, Some(StepId::DomainClassification));

    assert!(scheduler::request_cancel(&state, run_id).await.unwrap());
    release.notify_one();

    let run = queries::wait_for_terminal(&state, run_id, POLL, WAIT).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.as_deref().unwrap().contains("cancelled"));
    assert_eq!(step_status(&run, StepId::DomainClassification), StepStatus::Completed);
    assert_eq!(step_status(&run, StepId::KpiRecommendation), StepStatus::Pending);

    let result = queries::get_result(&state, run_id).await.unwrap();
    assert!(result.domain_classification.is_some());
    assert!(result.recommended_kpis.is_none());

    let events = queries::get_events(&state, run_id).await.unwrap();
    assert_eq!(events.last().unwrap().kind, RunEventKind::RunCancelled);

    // Finished runs refuse further cancellation.
    assert!(!scheduler::request_cancel(&state, run_id).await.unwrap());
}

#[tokio::test]
async fn test_rejected_hand_off_fails_run_immediately() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let state = AppState::new(
        Box::new(InMemoryStorage::new()),
        Arc::new(Gated {
            entered: entered.clone(),
            release: release.clone(),
        }),
        settings(),
    )
    .unwrap();

    let run_id = scheduler::submit(&state, five_row_sales()).await.unwrap();
    entered.notified().await;

    // Another writer moves the run past classification behind the executor's back.
    {
        let mut db = state.ledger.write().await;
        let mut moved = run_store::load_run(&*db, run_id).unwrap();
        moved.steps[StepId::DomainClassification.index()].status = StepStatus::Completed;
        moved.steps[StepId::KpiRecommendation.index()].status = StepStatus::Processing;
        db.set(key_run(run_id).as_bytes(), &serde_json::to_vec(&moved).unwrap())
            .unwrap();
    }
    release.notify_one();

    let run = queries::wait_for_terminal(&state, run_id, POLL, WAIT).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let msg = run.error_message.clone().unwrap();
    assert!(msg.contains("diverged after step 'domain_classification'"), "{msg}");
    assert_eq!(step_status(&run, StepId::KpiRecommendation), StepStatus::Failed);

    let events = queries::get_events(&state, run_id).await.unwrap();
    assert_eq!(events.last().unwrap().kind, RunEventKind::RunFailed);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let state = keyword_state();
    let ds = five_row_sales();
    let dataset_id = ds.id;
    let run_id = Uuid::new_v4();

    {
        let mut db = state.ledger.write().await;
        let run = PipelineRun::new(run_id, dataset_id, Utc::now());
        run_store::create_run(&mut *db, &ds, &run, &[]).unwrap();
        assert!(run_store::request_cancel(&mut *db, run_id).unwrap());
    }

    let status = pipeline_run::execute_run(state.clone(), run_id).await.unwrap();
    assert_eq!(status, RunStatus::Failed);
    let run = queries::get_run(&state, run_id).await.unwrap();
    assert!(run.started_at.is_none());
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn test_transient_persist_failures_are_retried() {
    let state = flaky_state(2);
    let run = run_to_end(&state, five_row_sales()).await;
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_persist_failure_after_retries_fails_run() {
    let state = flaky_state(3);
    let run = run_to_end(&state, five_row_sales()).await;

    assert_eq!(run.status, RunStatus::Failed);
    let msg = run.error_message.unwrap();
    assert!(msg.contains("upload_validation"), "{msg}");
    assert!(msg.contains("persist failed"), "{msg}");

    let result = queries::get_result(&state, run.id).await.unwrap();
    assert!(result.upload_validation.is_none());
}

#[tokio::test]
async fn test_restart_fails_interrupted_runs() {
    let storage = InMemoryStorage::new();
    let first = AppState::new(
        Box::new(storage.clone()),
        Arc::new(KeywordCapability),
        settings(),
    )
    .unwrap();

    let ds = five_row_sales();
    let in_flight = Uuid::new_v4();
    {
        let mut db = first.ledger.write().await;
        let run = PipelineRun::new(in_flight, ds.id, Utc::now());
        run_store::create_run(&mut *db, &ds, &run, &[]).unwrap();
        run_store::apply_and_commit(&mut *db, in_flight, &Transition::Start, None, Utc::now())
            .unwrap();
    }
    let done = run_to_end(&first, five_row_sales()).await;
    drop(first);

    let second = AppState::new(Box::new(storage), Arc::new(KeywordCapability), settings()).unwrap();
    assert_eq!(pipeline_run::recover_runs(&second).await.unwrap(), 1);

    let run = queries::get_run(&second, in_flight).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.clone().unwrap().contains("orchestrator_restart"));
    assert_eq!(step_status(&run, StepId::UploadValidation), StepStatus::Failed);

    let untouched = queries::get_run(&second, done.id).await.unwrap();
    assert_eq!(untouched.status, RunStatus::Completed);

    assert_eq!(pipeline_run::recover_runs(&second).await.unwrap(), 0);
    assert!(second.ledger.read().await.verify_event_log().unwrap());
}

#[tokio::test]
async fn test_many_runs_complete_concurrently() {
    let state = keyword_state();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(scheduler::submit(&state, five_row_sales()).await.unwrap());
    }
    for id in &ids {
        let run = queries::wait_for_terminal(&state, *id, POLL, WAIT).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
    assert_eq!(queries::list_runs(&state).await.unwrap().len(), 5);
}
