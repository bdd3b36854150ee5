//! Read side for pollers. Every call reads the latest persisted state.

use std::time::Duration;

use uuid::Uuid;

use crate::events::{list_events, RunEvent};
use crate::ledger_exec::with_ledger_read;
use crate::run_store::{self, Result, RunStoreError};
use crate::state::AppState;
use crate::types_analysis::{AnalysisResult, Progress, StatusView};
use crate::types_runs::PipelineRun;

pub async fn get_run(state: &AppState, run_id: Uuid) -> Result<PipelineRun> {
    with_ledger_read(state.ledger.clone(), move |db| run_store::load_run(db, run_id)).await?
}

pub async fn get_progress(state: &AppState, run_id: Uuid) -> Result<Progress> {
    Ok(Progress::from_run(&get_run(state, run_id).await?))
}

pub async fn get_status(state: &AppState, run_id: Uuid) -> Result<StatusView> {
    Ok(StatusView::from(&get_run(state, run_id).await?))
}

pub async fn get_result(state: &AppState, run_id: Uuid) -> Result<AnalysisResult> {
    with_ledger_read(state.ledger.clone(), move |db| run_store::load_result(db, run_id)).await?
}

pub async fn get_events(state: &AppState, run_id: Uuid) -> Result<Vec<RunEvent>> {
    with_ledger_read(state.ledger.clone(), move |db| list_events(db, run_id)).await?
}

pub async fn list_runs(state: &AppState) -> Result<Vec<PipelineRun>> {
    with_ledger_read(state.ledger.clone(), |db| run_store::list_runs(db)).await?
}

/// Poll until the run is COMPLETED or FAILED.
pub async fn wait_for_terminal(
    state: &AppState,
    run_id: Uuid,
    poll: Duration,
    timeout: Duration,
) -> Result<PipelineRun> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let run = get_run(state, run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RunStoreError::WaitTimedOut(run_id));
        }
        tokio::time::sleep(poll).await;
    }
}
