//! Executes one pipeline run end to end.
//!
//! Stages run strictly in [`StepId::ALL`] order. Each stage's output is
//! persisted in the same ledger batch that completes the step and starts the
//! next one, so a poller never sees a step marked `completed` without its
//! result, or a result without its step.

use std::sync::Arc;

use agents::domain::{CONTEXT_SAMPLE_ROWS, GENERAL};
use agents::kpi::title_case;
use agents::{design, profile, recommend, summarize, ClassificationContext, ProfileError};
use chrono::Utc;
use tabular::Dataset;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dataset_validator::validate_dataset;
use crate::ledger_exec::{persist_with_retry, with_ledger_read};
use crate::run_store::{self, RunStoreError};
use crate::state::AppState;
use crate::types_analysis::{AnalysisResult, StagePatch};
use crate::types_runs::{PipelineRun, RunStatus, StepId, Transition};

pub const RESTART_REASON: &str = "orchestrator_restart";

#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("missing {0} from an earlier step")]
    MissingArtifact(&'static str),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("stage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

async fn run_stage(
    state: &AppState,
    step: StepId,
    ds: &Arc<Dataset>,
    acc: &AnalysisResult,
) -> Result<StagePatch, StageError> {
    match step {
        StepId::UploadValidation => {
            let ds = ds.clone();
            let stats = tokio::task::spawn_blocking(move || validate_dataset(&ds))
                .await?
                .map_err(|errs| StageError::InvalidDataset(errs.join("; ")))?;
            Ok(StagePatch::Upload(stats))
        }

        StepId::QualityAnalysis => {
            let ds = ds.clone();
            let report = tokio::task::spawn_blocking(move || profile(&ds)).await??;
            Ok(StagePatch::Quality(report))
        }

        StepId::DomainClassification => {
            let ctx = ClassificationContext::build(
                &ds.name,
                ds.row_count,
                &ds.columns,
                ds.sample_rows(CONTEXT_SAMPLE_ROWS),
            );
            Ok(StagePatch::Domain(state.classifier.classify(&ctx).await))
        }

        StepId::KpiRecommendation => {
            let report = acc
                .quality_report
                .as_ref()
                .ok_or(StageError::MissingArtifact("quality_report"))?;
            let kpis = recommend(domain_of(acc), &ds.columns, report, state.settings.max_kpis);
            Ok(StagePatch::Kpis(kpis))
        }

        StepId::DashboardDesign => {
            let kpis = acc
                .recommended_kpis
                .as_deref()
                .ok_or(StageError::MissingArtifact("recommended_kpis"))?;
            let title = format!("{} Dashboard", title_case(domain_of(acc)));
            Ok(StagePatch::Dashboard(design(kpis, &ds.columns, &title)))
        }

        StepId::Finalize => {
            let report = acc
                .quality_report
                .as_ref()
                .ok_or(StageError::MissingArtifact("quality_report"))?;
            let domain = acc
                .domain_classification
                .as_ref()
                .ok_or(StageError::MissingArtifact("domain_classification"))?;
            let kpis = acc
                .recommended_kpis
                .as_deref()
                .ok_or(StageError::MissingArtifact("recommended_kpis"))?;
            let insights = summarize(report, domain, kpis);

            // The digest covers the insights too.
            let mut done = acc.clone();
            done.business_insights = Some(insights.clone());
            Ok(StagePatch::Finalize {
                digest: done.digest()?,
                insights,
            })
        }
    }
}

fn domain_of(acc: &AnalysisResult) -> &str {
    acc.domain_classification
        .as_ref()
        .map(|d| d.domain.as_str())
        .unwrap_or(GENERAL)
}

async fn transition(
    state: &AppState,
    run_id: Uuid,
    t: Transition,
    patch: Option<StagePatch>,
) -> Result<PipelineRun, RunStoreError> {
    let s = &state.settings;
    persist_with_retry(
        state.ledger.clone(),
        s.persist_retries,
        s.persist_backoff,
        "transition",
        move |db| run_store::apply_and_commit(db, run_id, &t, patch.clone(), Utc::now()),
    )
    .await
}

async fn fail(
    state: &AppState,
    run_id: Uuid,
    step: StepId,
    error: String,
) -> Result<RunStatus, RunStoreError> {
    let run = transition(state, run_id, Transition::Fail { step, error }, None).await?;
    warn!(run_id=%run_id, step=%step, error=?run.error_message, "run failed");
    Ok(run.status)
}

async fn stop_requested(state: &AppState, run_id: Uuid) -> Result<bool, RunStoreError> {
    if state.shutdown.is_cancelled() {
        return Ok(true);
    }
    with_ledger_read(state.ledger.clone(), move |db| run_store::cancel_requested(db, run_id)).await?
}

/// Drive a PENDING run to a terminal status.
pub async fn execute_run(state: Arc<AppState>, run_id: Uuid) -> Result<RunStatus, RunStoreError> {
    let run = with_ledger_read(state.ledger.clone(), move |db| run_store::load_run(db, run_id)).await??;
    if run.status != RunStatus::Pending {
        warn!(run_id=%run_id, status=%run.status, "run is not pending, skipping");
        return Ok(run.status);
    }

    if stop_requested(&state, run_id).await? {
        let run = transition(&state, run_id, Transition::Cancel { after: None }, None).await?;
        info!(run_id=%run_id, "run cancelled before start");
        return Ok(run.status);
    }

    transition(&state, run_id, Transition::Start, None).await?;
    info!(run_id=%run_id, dataset_id=%run.dataset_id, "run started");

    let dataset_id = run.dataset_id;
    let dataset = match with_ledger_read(state.ledger.clone(), move |db| {
        run_store::load_dataset(db, dataset_id)
    })
    .await?
    {
        Ok(ds) => Arc::new(ds),
        Err(e) => return fail(&state, run_id, StepId::UploadValidation, e.to_string()).await,
    };

    let mut acc = AnalysisResult::empty(run_id, dataset_id);
    for step in StepId::ALL {
        let patch = match run_stage(&state, step, &dataset, &acc).await {
            Ok(p) => p,
            Err(e) => {
                error!(run_id=%run_id, step=%step, "step failed: {e}");
                return fail(&state, run_id, step, e.to_string()).await;
            }
        };
        acc.apply_patch(patch.clone());

        let t = if step.next().is_none() {
            Transition::Advance { completed: step }
        } else {
            match stop_requested(&state, run_id).await {
                Ok(true) => Transition::Cancel { after: Some(step) },
                Ok(false) => Transition::Advance { completed: step },
                Err(e) => {
                    return fail(&state, run_id, step, format!("cancel check failed: {e}")).await
                }
            }
        };

        match transition(&state, run_id, t, Some(patch)).await {
            Ok(run) if run.status.is_terminal() => {
                info!(run_id=%run_id, step=%step, status=%run.status, "run finished");
                return Ok(run.status);
            }
            Ok(_) => info!(run_id=%run_id, step=%step, "step completed"),
            Err(e @ RunStoreError::Transition(_)) => {
                error!(run_id=%run_id, step=%step, "run state diverged: {e}");
                let abort = Transition::Abort {
                    reason: format!("run state diverged after step '{step}': {e}"),
                };
                return match transition(&state, run_id, abort, None).await {
                    Ok(run) => Ok(run.status),
                    Err(_) => Err(e),
                };
            }
            Err(e) => {
                error!(run_id=%run_id, step=%step, "persist failed: {e}");
                return fail(&state, run_id, step, format!("persist failed: {e}")).await;
            }
        }
    }

    let run = with_ledger_read(state.ledger.clone(), move |db| run_store::load_run(db, run_id)).await??;
    Ok(run.status)
}

/// Fail every run left non-terminal by a previous process. Never resumes.
pub async fn recover_runs(state: &AppState) -> Result<usize, RunStoreError> {
    let s = &state.settings;
    let recovered = persist_with_retry(
        state.ledger.clone(),
        s.persist_retries,
        s.persist_backoff,
        "recover",
        |db| {
            let mut n = 0;
            for run in run_store::list_runs(db)? {
                if run.status.is_terminal() {
                    continue;
                }
                let abort = Transition::Abort {
                    reason: RESTART_REASON.to_string(),
                };
                run_store::apply_and_commit(db, run.id, &abort, None, Utc::now())?;
                n += 1;
            }
            Ok(n)
        },
    )
    .await?;

    if recovered > 0 {
        warn!(recovered, "failed runs interrupted by restart");
    }
    Ok(recovered)
}
