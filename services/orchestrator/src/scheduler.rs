use std::sync::Arc;

use chrono::Utc;
use tabular::Dataset;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::events::RunEventKind;
use crate::ledger_exec::persist_with_retry;
use crate::pipeline_run::execute_run;
use crate::run_store::{self, RunStoreError};
use crate::state::SharedState;
use crate::types_runs::PipelineRun;

/// Persist a new PENDING run for `dataset` and schedule it. Returns once the
/// run is durable, not when it finishes.
pub async fn submit(state: &SharedState, dataset: Dataset) -> Result<Uuid, RunStoreError> {
    let run_id = Uuid::new_v4();
    let dataset_id = dataset.id;
    let rows = dataset.row_count;
    let dataset = Arc::new(dataset);

    let s = &state.settings;
    persist_with_retry(
        state.ledger.clone(),
        s.persist_retries,
        s.persist_backoff,
        "submit",
        move |db| {
            let now = Utc::now();
            let mut run = PipelineRun::new(run_id, dataset_id, now);
            let submitted = run.push_event(RunEventKind::RunSubmitted, None, None, now);
            run_store::create_run(db, &dataset, &run, &[submitted])
        },
    )
    .await?;

    info!(run_id=%run_id, dataset_id=%dataset_id, rows, "run submitted");
    spawn_run(state.clone(), run_id);
    Ok(run_id)
}

/// One task per run; at most `max_concurrent_runs` hold a permit at once.
pub fn spawn_run(state: SharedState, run_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permit = tokio::select! {
            p = state.permits.clone().acquire_owned() => p,
            _ = state.shutdown.cancelled() => {
                info!(run_id=%run_id, "shutdown before run was scheduled");
                return;
            }
        };
        let Ok(_permit) = permit else {
            error!(run_id=%run_id, "run permits closed");
            return;
        };

        match execute_run(state.clone(), run_id).await {
            Ok(status) => info!(run_id=%run_id, status=%status, "run done"),
            Err(e) => error!(run_id=%run_id, "run execute error: {e}"),
        }
    })
}

/// Ask a live run to stop at its next stage boundary.
pub async fn request_cancel(state: &SharedState, run_id: Uuid) -> Result<bool, RunStoreError> {
    let s = &state.settings;
    let accepted = persist_with_retry(
        state.ledger.clone(),
        s.persist_retries,
        s.persist_backoff,
        "cancel",
        move |db| run_store::request_cancel(db, run_id),
    )
    .await?;
    info!(run_id=%run_id, accepted, "cancel requested");
    Ok(accepted)
}

/// Stop scheduling new runs; running ones stop at their next stage boundary.
pub fn shutdown(state: &SharedState) {
    state.shutdown.cancel();
    state.permits.close();
}
