//! Per-run audit trail.
//!
//! Events are produced by [`PipelineRun::apply`](crate::types_runs::PipelineRun::apply)
//! and written in the same ledger batch as the run record they describe.

use chrono::{DateTime, Utc};
use ledger::{Ledger, Storage, WriteOp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run_store::RunStoreError;
use crate::types_runs::{key_run_event, key_run_event_prefix, RunStatus, StepId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    RunSubmitted,
    RunStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub seq: u64,
    pub kind: RunEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Run status right after the event.
    pub status: RunStatus,
    pub at: DateTime<Utc>,
}

pub fn event_ops(events: &[RunEvent]) -> Result<Vec<WriteOp>, RunStoreError> {
    events
        .iter()
        .map(|ev| {
            let bytes = serde_json::to_vec(ev)?;
            Ok(WriteOp::Put(key_run_event(ev.run_id, ev.seq).into_bytes(), bytes))
        })
        .collect()
}

/// All events of a run in sequence order.
pub fn list_events<S: Storage>(
    db: &Ledger<S>,
    run_id: Uuid,
) -> Result<Vec<RunEvent>, RunStoreError> {
    let prefix = key_run_event_prefix(run_id);
    let mut out = Vec::new();
    for key in db.keys_with_prefix(prefix.as_bytes())? {
        if let Some(bytes) = db.get(&key)? {
            out.push(serde_json::from_slice::<RunEvent>(&bytes)?);
        }
    }
    out.sort_by_key(|e| e.seq);
    Ok(out)
}
