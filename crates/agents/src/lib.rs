//! Analysis stages: quality profiling, domain classification, KPI
//! recommendation and dashboard design.

pub mod dashboard;
pub mod domain;
pub mod insights;
pub mod kpi;
pub mod quality;
pub mod readiness;
pub mod stats;

pub use dashboard::{design, ChartSpec, ChartType, DashboardDesign, DashboardStructure, DataQuery};
pub use domain::{
    CapabilityAnswer, ClassificationCapability, ClassificationContext, DomainClassification,
    DomainClassifier, KeywordCapability,
};
pub use insights::{summarize, BusinessInsights};
pub use kpi::{recommend, Aggregation, KpiFormat, KpiHierarchy, KpiSpec, KpiTier};
pub use quality::{profile, MlReadiness, ProfileError, QualityReport};
pub use readiness::MlAssessment;
