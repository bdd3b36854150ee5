//! Plain-language summary of a finished analysis.

use serde::{Deserialize, Serialize};

use crate::domain::DomainClassification;
use crate::kpi::{title_case, KpiHierarchy, KpiSpec};
use crate::quality::QualityReport;

const TOP_QUALITY_RECS: usize = 3;
const TOP_DOMAIN_RECS: usize = 2;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessInsights {
    pub summary: Vec<String>,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
}

fn domain_recommendations(domain: &str) -> [&'static str; 2] {
    match domain {
        "sales" => [
            "Monitor conversion rates to identify optimization opportunities",
            "Track average deal size trends for revenue forecasting",
        ],
        "marketing" => [
            "Focus on cost per acquisition optimization",
            "Measure campaign ROI across different channels",
        ],
        "financial" => [
            "Track margin against cost drivers every period",
            "Set budget variance thresholds for the headline KPIs",
        ],
        _ => [
            "Establish baseline measurements for all KPIs",
            "Set up regular monitoring and alerting",
        ],
    }
}

/// Summarize the stage outputs. Deterministic for the same inputs.
pub fn summarize(
    report: &QualityReport,
    domain: &DomainClassification,
    kpis: &[KpiSpec],
) -> BusinessInsights {
    let mut out = BusinessInsights::default();

    if !report.recommendations.is_empty() {
        out.summary.push(format!(
            "Data quality analysis identified {} areas for improvement",
            report.recommendations.len()
        ));
        out.recommendations
            .extend(report.recommendations.iter().take(TOP_QUALITY_RECS).cloned());
    }
    out.key_findings.push(format!(
        "Data quality score is {:.1}/100 ({})",
        report.data_quality_score,
        report.ml_readiness_level.label()
    ));

    let name = title_case(&domain.domain);
    if domain.is_fallback() {
        out.key_findings
            .push(format!("Domain could not be determined; using the {name} layout"));
    } else {
        out.key_findings.push(format!(
            "Dataset identified as {name} domain with {:.1}% confidence",
            domain.confidence * 100.0
        ));
    }

    if !kpis.is_empty() {
        out.key_findings
            .push(format!("Identified {} relevant KPIs for analysis", kpis.len()));
        let h = KpiHierarchy::from_kpis(kpis);
        if !h.primary.is_empty() {
            out.key_findings
                .push(format!("Headline KPIs: {}", h.primary.join(", ")));
        }
        out.recommendations.extend(
            domain_recommendations(&domain.domain)
                .iter()
                .take(TOP_DOMAIN_RECS)
                .map(|r| r.to_string()),
        );
    }

    let targets = &report.ml_readiness.targets;
    let n_targets = targets.binary.len() + targets.multiclass.len() + targets.continuous.len();
    if n_targets > 0 {
        out.key_findings
            .push(format!("{n_targets} columns could serve as prediction targets"));
    }

    if out.summary.is_empty() {
        out.summary
            .push("Analysis completed successfully with actionable insights generated".to_string());
    }
    out
}
