use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::events::{RunEvent, RunEventKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    UploadValidation,
    QualityAnalysis,
    DomainClassification,
    KpiRecommendation,
    DashboardDesign,
    Finalize,
}

impl StepId {
    pub const ALL: [StepId; 6] = [
        StepId::UploadValidation,
        StepId::QualityAnalysis,
        StepId::DomainClassification,
        StepId::KpiRecommendation,
        StepId::DashboardDesign,
        StepId::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::UploadValidation => "upload_validation",
            StepId::QualityAnalysis => "quality_analysis",
            StepId::DomainClassification => "domain_classification",
            StepId::KpiRecommendation => "kpi_recommendation",
            StepId::DashboardDesign => "dashboard_design",
            StepId::Finalize => "finalize",
        }
    }

    pub fn index(self) -> usize {
        StepId::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn next(self) -> Option<StepId> {
        StepId::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Processing => "PROCESSING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub id: StepId,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepRecord {
    fn pending(id: StepId) -> Self {
        Self {
            id,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Sequence number of the last audit event written for this run.
    pub event_count: u64,
}

/// A requested change of run state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Start,
    Advance { completed: StepId },
    Fail { step: StepId, error: String },
    /// Stop at a stage boundary. `after` is the step that just finished, if any.
    Cancel { after: Option<StepId> },
    /// Fail whatever is in flight, e.g. after a restart.
    Abort { reason: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("run {run_id} is already {status}")]
    Terminal { run_id: Uuid, status: RunStatus },

    #[error("run {run_id} is {status}, expected {expected}")]
    WrongStatus {
        run_id: Uuid,
        status: RunStatus,
        expected: RunStatus,
    },

    #[error("step '{step}' is not the processing step of run {run_id}")]
    StepMismatch { run_id: Uuid, step: StepId },
}

impl PipelineRun {
    pub fn new(id: Uuid, dataset_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            dataset_id,
            status: RunStatus::Pending,
            steps: StepId::ALL.iter().map(|s| StepRecord::pending(*s)).collect(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            event_count: 0,
        }
    }

    pub fn step(&self, id: StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step currently marked `processing`, if any.
    pub fn current_step(&self) -> Option<StepId> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Processing)
            .map(|s| s.id)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub(crate) fn push_event(
        &mut self,
        kind: RunEventKind,
        step: Option<StepId>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> RunEvent {
        self.event_count += 1;
        RunEvent {
            run_id: self.id,
            seq: self.event_count,
            kind,
            step,
            message,
            status: self.status,
            at: now,
        }
    }

    fn step_mut(&mut self, id: StepId) -> &mut StepRecord {
        let idx = id.index();
        &mut self.steps[idx]
    }

    fn expect_processing(&self, step: StepId) -> Result<(), TransitionError> {
        if self.status != RunStatus::Processing {
            return Err(TransitionError::WrongStatus {
                run_id: self.id,
                status: self.status,
                expected: RunStatus::Processing,
            });
        }
        if self.current_step() != Some(step) {
            return Err(TransitionError::StepMismatch {
                run_id: self.id,
                step,
            });
        }
        Ok(())
    }

    fn start_step(&mut self, step: StepId, now: DateTime<Utc>, events: &mut Vec<RunEvent>) {
        let rec = self.step_mut(step);
        rec.status = StepStatus::Processing;
        rec.started_at = Some(now);
        events.push(self.push_event(RunEventKind::StepStarted, Some(step), None, now));
    }

    fn complete_step(&mut self, step: StepId, now: DateTime<Utc>, events: &mut Vec<RunEvent>) {
        let rec = self.step_mut(step);
        rec.status = StepStatus::Completed;
        rec.completed_at = Some(now);
        events.push(self.push_event(RunEventKind::StepCompleted, Some(step), None, now));
    }

    fn finish(&mut self, status: RunStatus, error: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.error_message = error;
        self.completed_at = Some(now);
    }

    /// Apply a transition in memory and return the audit events it produced.
    ///
    /// Terminal runs reject everything, so nothing is ever persisted after
    /// COMPLETED or FAILED.
    pub fn apply(
        &mut self,
        t: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunEvent>, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                run_id: self.id,
                status: self.status,
            });
        }

        let mut events = Vec::new();
        match t {
            Transition::Start => {
                if self.status != RunStatus::Pending {
                    return Err(TransitionError::WrongStatus {
                        run_id: self.id,
                        status: self.status,
                        expected: RunStatus::Pending,
                    });
                }
                self.status = RunStatus::Processing;
                self.started_at = Some(now);
                events.push(self.push_event(RunEventKind::RunStarted, None, None, now));
                self.start_step(StepId::ALL[0], now, &mut events);
            }

            Transition::Advance { completed } => {
                self.expect_processing(*completed)?;
                self.complete_step(*completed, now, &mut events);
                match completed.next() {
                    Some(next) => self.start_step(next, now, &mut events),
                    None => {
                        self.finish(RunStatus::Completed, None, now);
                        events.push(self.push_event(RunEventKind::RunCompleted, None, None, now));
                    }
                }
            }

            Transition::Fail { step, error } => {
                self.expect_processing(*step)?;
                let rec = self.step_mut(*step);
                rec.status = StepStatus::Failed;
                rec.completed_at = Some(now);
                rec.error = Some(error.clone());
                events.push(self.push_event(
                    RunEventKind::StepFailed,
                    Some(*step),
                    Some(error.clone()),
                    now,
                ));

                let message = format!("step '{step}' failed: {error}");
                self.finish(RunStatus::Failed, Some(message.clone()), now);
                events.push(self.push_event(RunEventKind::RunFailed, Some(*step), Some(message), now));
            }

            Transition::Cancel { after } => {
                let message = match after {
                    Some(step) => {
                        self.expect_processing(*step)?;
                        self.complete_step(*step, now, &mut events);
                        format!("cancelled after step '{step}'")
                    }
                    None => {
                        if self.status != RunStatus::Pending {
                            return Err(TransitionError::WrongStatus {
                                run_id: self.id,
                                status: self.status,
                                expected: RunStatus::Pending,
                            });
                        }
                        "cancelled before start".to_string()
                    }
                };
                self.finish(RunStatus::Failed, Some(message.clone()), now);
                events.push(self.push_event(RunEventKind::RunCancelled, *after, Some(message), now));
            }

            Transition::Abort { reason } => {
                let in_flight = self.current_step();
                let message = match in_flight {
                    Some(step) => {
                        let rec = self.step_mut(step);
                        rec.status = StepStatus::Failed;
                        rec.completed_at = Some(now);
                        rec.error = Some(reason.clone());
                        events.push(self.push_event(
                            RunEventKind::StepFailed,
                            Some(step),
                            Some(reason.clone()),
                            now,
                        ));
                        format!("step '{step}' failed: {reason}")
                    }
                    None => reason.clone(),
                };
                self.finish(RunStatus::Failed, Some(message.clone()), now);
                events.push(self.push_event(RunEventKind::RunFailed, in_flight, Some(message), now));
            }
        }

        self.updated_at = now;
        Ok(events)
    }
}

// ---- Ledger keys (helpers) ----
pub fn key_run(run_id: Uuid) -> String {
    format!("run:{run_id}")
}

pub fn key_run_prefix() -> &'static str {
    "run:"
}

pub fn key_result(run_id: Uuid) -> String {
    format!("result:{run_id}")
}

pub fn key_dataset(dataset_id: Uuid) -> String {
    format!("dataset:{dataset_id}")
}

pub fn key_cancel(run_id: Uuid) -> String {
    format!("cancel:{run_id}")
}

pub fn key_run_event(run_id: Uuid, seq: u64) -> String {
    format!("run_event:{run_id}:{seq:06}")
}

pub fn key_run_event_prefix(run_id: Uuid) -> String {
    format!("run_event:{run_id}:")
}
