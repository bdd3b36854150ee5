use chrono::{DateTime, Utc};
use ledger::{BatchReceipt, Ledger, LedgerError, Storage, WriteOp};
use tabular::Dataset;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{event_ops, RunEvent};
use crate::types_analysis::{AnalysisResult, StagePatch};
use crate::types_runs::{
    key_cancel, key_dataset, key_result, key_run, key_run_prefix, PipelineRun, Transition,
    TransitionError,
};

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("run {0} did not finish in time")]
    WaitTimedOut(Uuid),
}

pub type Result<T> = std::result::Result<T, RunStoreError>;

impl RunStoreError {
    /// Only backend failures are worth another attempt; everything else is
    /// deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunStoreError::Ledger(LedgerError::Storage(_)))
    }
}

fn get_json<S: Storage, T: serde::de::DeserializeOwned>(
    db: &Ledger<S>,
    key: &str,
) -> Result<Option<T>> {
    match db.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn load_dataset<S: Storage>(db: &Ledger<S>, dataset_id: Uuid) -> Result<Dataset> {
    get_json(db, &key_dataset(dataset_id))?.ok_or(RunStoreError::NotFound {
        kind: "dataset",
        id: dataset_id,
    })
}

pub fn load_run<S: Storage>(db: &Ledger<S>, run_id: Uuid) -> Result<PipelineRun> {
    get_json(db, &key_run(run_id))?.ok_or(RunStoreError::NotFound {
        kind: "run",
        id: run_id,
    })
}

/// Stage outputs so far. A run that has not produced anything yet reads as empty.
pub fn load_result<S: Storage>(db: &Ledger<S>, run_id: Uuid) -> Result<AnalysisResult> {
    match get_json(db, &key_result(run_id))? {
        Some(r) => Ok(r),
        None => {
            let run = load_run(db, run_id)?;
            Ok(AnalysisResult::empty(run.id, run.dataset_id))
        }
    }
}

/// Every run, oldest first.
pub fn list_runs<S: Storage>(db: &Ledger<S>) -> Result<Vec<PipelineRun>> {
    let mut out = Vec::new();
    for key in db.keys_with_prefix(key_run_prefix().as_bytes())? {
        if let Some(bytes) = db.get(&key)? {
            out.push(serde_json::from_slice::<PipelineRun>(&bytes)?);
        }
    }
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(out)
}

pub fn cancel_requested<S: Storage>(db: &Ledger<S>, run_id: Uuid) -> Result<bool> {
    Ok(db.get(key_cancel(run_id).as_bytes())?.is_some())
}

/// Persist a freshly submitted run together with its dataset.
pub fn create_run<S: Storage>(
    db: &mut Ledger<S>,
    dataset: &Dataset,
    run: &PipelineRun,
    events: &[RunEvent],
) -> Result<BatchReceipt> {
    let mut ops = vec![
        WriteOp::Put(key_dataset(dataset.id).into_bytes(), serde_json::to_vec(dataset)?),
        WriteOp::Put(key_run(run.id).into_bytes(), serde_json::to_vec(run)?),
    ];
    ops.extend(event_ops(events)?);
    Ok(db.write_batch(ops)?)
}

/// Write the run record, its new events and optionally the result in one batch.
pub fn commit<S: Storage>(
    db: &mut Ledger<S>,
    run: &PipelineRun,
    result: Option<&AnalysisResult>,
    events: &[RunEvent],
) -> Result<BatchReceipt> {
    let mut ops = vec![WriteOp::Put(key_run(run.id).into_bytes(), serde_json::to_vec(run)?)];
    if let Some(r) = result {
        ops.push(WriteOp::Put(key_result(run.id).into_bytes(), serde_json::to_vec(r)?));
    }
    ops.extend(event_ops(events)?);
    if run.status.is_terminal() {
        ops.push(WriteOp::Delete(key_cancel(run.id).into_bytes()));
    }
    Ok(db.write_batch(ops)?)
}

/// Load the latest persisted run, apply `t` and write it back along with the
/// stage output, all or nothing. Safe to call again after a failed write.
pub fn apply_and_commit<S: Storage>(
    db: &mut Ledger<S>,
    run_id: Uuid,
    t: &Transition,
    patch: Option<StagePatch>,
    now: DateTime<Utc>,
) -> Result<PipelineRun> {
    let mut run = load_run(db, run_id)?;
    let events = run.apply(t, now)?;

    let result = match patch {
        Some(p) => {
            let mut r = load_result(db, run_id)?;
            r.apply_patch(p);
            Some(r)
        }
        None => None,
    };

    commit(db, &run, result.as_ref(), &events)?;
    Ok(run)
}

/// Leave a cancel marker for a live run. Returns false if the run already finished.
pub fn request_cancel<S: Storage>(db: &mut Ledger<S>, run_id: Uuid) -> Result<bool> {
    let run = load_run(db, run_id)?;
    if run.status.is_terminal() {
        return Ok(false);
    }
    db.set(key_cancel(run_id).as_bytes(), Utc::now().to_rfc3339().as_bytes())?;
    Ok(true)
}
