use agents::{
    BusinessInsights, ChartSpec, DashboardDesign, DashboardStructure, DomainClassification, KpiHierarchy,
    KpiSpec, QualityReport,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset_validator::ValidationStats;
use crate::types_runs::{PipelineRun, RunStatus, StepId, StepRecord};

/// Accumulated stage outputs. Each stage fills only its own field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub dataset_id: Uuid,
    pub upload_validation: Option<ValidationStats>,
    pub quality_report: Option<QualityReport>,
    pub domain_classification: Option<DomainClassification>,
    pub recommended_kpis: Option<Vec<KpiSpec>>,
    pub kpi_hierarchy: Option<KpiHierarchy>,
    pub recommended_charts: Option<Vec<ChartSpec>>,
    pub dashboard_structure: Option<DashboardStructure>,
    pub business_insights: Option<BusinessInsights>,
    /// BLAKE3 over the stage outputs, set by `finalize`.
    pub result_digest_hex: Option<String>,
}

/// One stage's contribution to [`AnalysisResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum StagePatch {
    Upload(ValidationStats),
    Quality(QualityReport),
    Domain(DomainClassification),
    Kpis(Vec<KpiSpec>),
    Dashboard(DashboardDesign),
    Finalize {
        insights: BusinessInsights,
        digest: String,
    },
}

impl AnalysisResult {
    pub fn empty(run_id: Uuid, dataset_id: Uuid) -> Self {
        Self {
            run_id,
            dataset_id,
            ..Default::default()
        }
    }

    pub fn apply_patch(&mut self, patch: StagePatch) {
        match patch {
            StagePatch::Upload(v) => self.upload_validation = Some(v),
            StagePatch::Quality(r) => self.quality_report = Some(r),
            StagePatch::Domain(d) => self.domain_classification = Some(d),
            StagePatch::Kpis(k) => {
                self.kpi_hierarchy = Some(KpiHierarchy::from_kpis(&k));
                self.recommended_kpis = Some(k);
            }
            StagePatch::Dashboard(d) => {
                self.recommended_charts = Some(d.charts);
                self.dashboard_structure = Some(d.layout);
            }
            StagePatch::Finalize { insights, digest } => {
                self.business_insights = Some(insights);
                self.result_digest_hex = Some(digest);
            }
        }
    }

    /// Digest of everything the stages produced, excluding the digest itself.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let mut h = blake3::Hasher::new();
        h.update(&serde_json::to_vec(&self.upload_validation)?);
        h.update(&serde_json::to_vec(&self.quality_report)?);
        h.update(&serde_json::to_vec(&self.domain_classification)?);
        h.update(&serde_json::to_vec(&self.recommended_kpis)?);
        h.update(&serde_json::to_vec(&self.kpi_hierarchy)?);
        h.update(&serde_json::to_vec(&self.recommended_charts)?);
        h.update(&serde_json::to_vec(&self.dashboard_structure)?);
        h.update(&serde_json::to_vec(&self.business_insights)?);
        Ok(h.finalize().to_hex().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub progress_percentage: f64,
    pub current_step: Option<StepId>,
}

impl Progress {
    /// Always derived from the persisted steps, never cached.
    pub fn from_run(run: &PipelineRun) -> Self {
        let total = run.steps.len();
        let progress_percentage = if total == 0 {
            0.0
        } else {
            run.completed_steps() as f64 / total as f64 * 100.0
        };
        Self {
            run_id: run.id,
            status: run.status,
            steps: run.steps.clone(),
            progress_percentage,
            current_step: run.current_step(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&PipelineRun> for StatusView {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            error_message: run.error_message.clone(),
        }
    }
}
