//! AutoBI analysis pipeline: sequences the analysis stages over a dataset,
//! persisting every step hand-off to the ledger so pollers can follow along.

pub mod config;
pub mod dataset_validator;
pub mod events;
pub mod ledger_exec;
pub mod pipeline_run;
pub mod provider;
pub mod provider_lmstudio;
pub mod queries;
pub mod run_store;
pub mod scheduler;
pub mod state;
pub mod types_analysis;
pub mod types_runs;

pub use config::AppConfig;
pub use run_store::RunStoreError;
pub use state::{AppState, PipelineSettings, SharedState};
pub use types_analysis::{AnalysisResult, Progress, StatusView};
pub use types_runs::{PipelineRun, RunStatus, StepId, StepStatus};
