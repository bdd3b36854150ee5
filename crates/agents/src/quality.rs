//! Quality profiling: structural and statistical checks over a parsed table.
//!
//! The composite score is the sum of five weighted components:
//!
//! | component        | weight |
//! |------------------|--------|
//! | missing values   | 25     |
//! | duplicate rows   | 20     |
//! | type consistency | 20     |
//! | outliers         | 15     |
//! | sample size      | 20     |
//!
//! Weights and readiness thresholds are part of the public contract; changing
//! them changes every persisted score.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabular::{value, ColumnDescriptor, ColumnType, Dataset, ValueKind};
use thiserror::Error;

use crate::readiness::{self, MlAssessment};
use crate::stats::{self, pct, round2};

pub const MISSING_WEIGHT: f64 = 25.0;
pub const DUPLICATE_WEIGHT: f64 = 20.0;
pub const TYPE_WEIGHT: f64 = 20.0;
pub const OUTLIER_WEIGHT: f64 = 15.0;
pub const SAMPLE_WEIGHT: f64 = 20.0;

pub const OUTLIER_TOLERANCE_PCT: f64 = 5.0;
pub const TYPE_TOLERANCE_PCT: f64 = 5.0;
pub const ROWS_PER_COLUMN: usize = 10;
pub const RECOMMENDED_MIN_ROWS: usize = 100;
const HIGH_CARDINALITY_RATIO: f64 = 0.8;
const HIGH_CARDINALITY_MIN_ROWS: usize = 10;
const DATE_FORMAT_SAMPLE: usize = 10;

pub const EMPTY_DATASET_ISSUE: &str = "empty dataset";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("column '{column}' reports {count} missing values for {rows} rows")]
    MissingCountOutOfRange {
        column: String,
        count: usize,
        rows: usize,
    },

    #[error("column '{column}' reports {count} unique values for {rows} rows")]
    UniqueCountOutOfRange {
        column: String,
        count: usize,
        rows: usize,
    },

    #[error("column '{column}' is declared {declared} but none of its {present} values can be read as {declared}")]
    CorruptColumnType {
        column: String,
        declared: &'static str,
        present: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MlReadiness {
    #[serde(rename = "Production Ready")]
    ProductionReady,
    #[serde(rename = "Model Development Ready")]
    ModelDevelopmentReady,
    #[serde(rename = "Requires Preprocessing")]
    RequiresPreprocessing,
    #[serde(rename = "Significant Cleaning Needed")]
    SignificantCleaningNeeded,
    #[serde(rename = "Not Suitable for ML Without Major Preprocessing")]
    NotSuitable,
}

impl MlReadiness {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => MlReadiness::ProductionReady,
            s if s >= 75.0 => MlReadiness::ModelDevelopmentReady,
            s if s >= 55.0 => MlReadiness::RequiresPreprocessing,
            s if s >= 35.0 => MlReadiness::SignificantCleaningNeeded,
            _ => MlReadiness::NotSuitable,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MlReadiness::ProductionReady => "Production Ready",
            MlReadiness::ModelDevelopmentReady => "Model Development Ready",
            MlReadiness::RequiresPreprocessing => "Requires Preprocessing",
            MlReadiness::SignificantCleaningNeeded => "Significant Cleaning Needed",
            MlReadiness::NotSuitable => "Not Suitable for ML Without Major Preprocessing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_pct(p: f64) -> Self {
        match p {
            p if p <= 0.0 => Severity::None,
            p if p < 5.0 => Severity::Low,
            p if p < 20.0 => Severity::Medium,
            p if p < 50.0 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub row_count: usize,
    pub column_count: usize,
    pub memory_estimate_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingValueStat {
    pub column: String,
    pub missing_count: usize,
    pub missing_percentage: f64,
    pub severity: Severity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicateStats {
    pub duplicate_rows: usize,
    pub duplicate_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlierStat {
    pub column: String,
    pub outlier_count: usize,
    pub outlier_percentage: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeCheck {
    pub column: String,
    pub declared: ColumnType,
    pub majority: ColumnType,
    pub non_conforming_percentage: f64,
    pub consistent: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyKind {
    InconsistentCasing,
    MixedDateFormats,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub column: String,
    pub kind: ConsistencyKind,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub missing_values: f64,
    pub duplicates: f64,
    pub type_consistency: f64,
    pub outliers: f64,
    pub sample_size: f64,
}

impl ComponentScores {
    pub fn total(&self) -> f64 {
        self.missing_values + self.duplicates + self.type_consistency + self.outliers + self.sample_size
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub basic_info: BasicInfo,
    pub missing_values: Vec<MissingValueStat>,
    pub duplicate_rows: DuplicateStats,
    pub outliers: Vec<OutlierStat>,
    pub type_checks: Vec<TypeCheck>,
    pub consistency_issues: Vec<ConsistencyIssue>,
    pub component_scores: ComponentScores,
    pub data_quality_score: f64,
    pub ml_readiness_level: MlReadiness,
    pub ml_readiness: MlAssessment,
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn missing_percentage(&self, column: &str) -> Option<f64> {
        self.missing_values
            .iter()
            .find(|m| m.column == column)
            .map(|m| m.missing_percentage)
    }

    fn empty(ds: &Dataset) -> Self {
        Self {
            basic_info: BasicInfo {
                row_count: ds.row_count,
                column_count: ds.column_count,
                memory_estimate_bytes: ds.estimated_bytes(),
            },
            missing_values: Vec::new(),
            duplicate_rows: DuplicateStats {
                duplicate_rows: 0,
                duplicate_percentage: 0.0,
            },
            outliers: Vec::new(),
            type_checks: Vec::new(),
            consistency_issues: Vec::new(),
            component_scores: ComponentScores::default(),
            data_quality_score: 0.0,
            ml_readiness_level: MlReadiness::from_score(0.0),
            ml_readiness: MlAssessment::default(),
            critical_issues: vec![EMPTY_DATASET_ISSUE.to_string()],
            recommendations: vec!["Upload a dataset that contains at least one data row".to_string()],
        }
    }
}

/// Profile a dataset. Deterministic: the same table always yields the same report.
pub fn profile(ds: &Dataset) -> Result<QualityReport, ProfileError> {
    let rows = ds.rows.len();
    if rows == 0 || ds.columns.is_empty() {
        return Ok(QualityReport::empty(ds));
    }

    for col in &ds.columns {
        check_descriptor(ds, col, rows)?;
    }

    let missing_values = missing_stats(ds, rows);
    let avg_missing = missing_values.iter().map(|m| m.missing_percentage).sum::<f64>()
        / missing_values.len() as f64;

    let duplicate_rows = duplicate_stats(ds, rows);
    let type_checks = type_checks(ds);
    let outliers = outlier_stats(ds);
    let consistency_issues = consistency_issues(ds);
    let ml_readiness = readiness::assess(ds, &missing_values, &outliers, duplicate_rows.duplicate_rows);

    let eligible_types = type_checks.len();
    let consistent_types = type_checks.iter().filter(|t| t.consistent).count();
    let clean_numeric = outliers
        .iter()
        .filter(|o| o.outlier_percentage <= OUTLIER_TOLERANCE_PCT)
        .count();

    let component_scores = ComponentScores {
        missing_values: MISSING_WEIGHT * (1.0 - avg_missing / 100.0),
        duplicates: DUPLICATE_WEIGHT * (1.0 - duplicate_rows.duplicate_rows as f64 / rows as f64),
        type_consistency: ratio_or_full(consistent_types, eligible_types) * TYPE_WEIGHT,
        outliers: ratio_or_full(clean_numeric, outliers.len()) * OUTLIER_WEIGHT,
        sample_size: sample_score(rows, ds.columns.len()),
    };
    let data_quality_score = round2(component_scores.total().clamp(0.0, 100.0));

    let mut report = QualityReport {
        basic_info: BasicInfo {
            row_count: rows,
            column_count: ds.columns.len(),
            memory_estimate_bytes: ds.estimated_bytes(),
        },
        missing_values,
        duplicate_rows,
        outliers,
        type_checks,
        consistency_issues,
        component_scores: round_components(component_scores),
        data_quality_score,
        ml_readiness_level: MlReadiness::from_score(data_quality_score),
        ml_readiness,
        critical_issues: Vec::new(),
        recommendations: Vec::new(),
    };
    report.critical_issues = critical_issues(ds, &report);
    report.recommendations = recommendations(&report);
    Ok(report)
}

/// Full marks when nothing is eligible.
fn ratio_or_full(good: usize, eligible: usize) -> f64 {
    if eligible == 0 {
        1.0
    } else {
        good as f64 / eligible as f64
    }
}

/// Full weight at 10 rows per column; falls linearly to minus the weight with no rows.
pub fn sample_score(rows: usize, columns: usize) -> f64 {
    let needed = (ROWS_PER_COLUMN * columns.max(1)) as f64;
    let adequacy = (rows as f64 / needed).min(1.0);
    if adequacy >= 1.0 {
        SAMPLE_WEIGHT
    } else {
        2.0 * SAMPLE_WEIGHT * adequacy - SAMPLE_WEIGHT
    }
}

fn round_components(c: ComponentScores) -> ComponentScores {
    ComponentScores {
        missing_values: round2(c.missing_values),
        duplicates: round2(c.duplicates),
        type_consistency: round2(c.type_consistency),
        outliers: round2(c.outliers),
        sample_size: round2(c.sample_size),
    }
}

fn check_descriptor(ds: &Dataset, col: &ColumnDescriptor, rows: usize) -> Result<(), ProfileError> {
    if col.missing_count > rows {
        return Err(ProfileError::MissingCountOutOfRange {
            column: col.name.clone(),
            count: col.missing_count,
            rows,
        });
    }
    if col.unique_count > rows {
        return Err(ProfileError::UniqueCountOutOfRange {
            column: col.name.clone(),
            count: col.unique_count,
            rows,
        });
    }
    let present = rows - col.missing_count;
    if present > 0 && !ds.values(&col.name).any(|v| value::coerces_to(v, col.inferred_type)) {
        return Err(ProfileError::CorruptColumnType {
            column: col.name.clone(),
            declared: col.inferred_type.as_str(),
            present,
        });
    }
    Ok(())
}

fn missing_stats(ds: &Dataset, rows: usize) -> Vec<MissingValueStat> {
    ds.columns
        .iter()
        .map(|c| {
            let missing = ds
                .values(&c.name)
                .filter(|v| !value::coerces_to(v, c.inferred_type))
                .count();
            let p = round2(pct(missing, rows));
            MissingValueStat {
                column: c.name.clone(),
                missing_count: missing,
                missing_percentage: p,
                severity: Severity::from_pct(p),
            }
        })
        .collect()
}

fn duplicate_stats(ds: &Dataset, rows: usize) -> DuplicateStats {
    let distinct: BTreeSet<_> = ds.rows.iter().map(|r| ds.row_fingerprint(r)).collect();
    let dup = rows - distinct.len();
    DuplicateStats {
        duplicate_rows: dup,
        duplicate_percentage: round2(pct(dup, rows)),
    }
}

fn compatible(declared: ColumnType, majority: ColumnType) -> bool {
    use ColumnType::*;
    declared == majority
        || matches!(
            (declared, majority),
            (Float, Integer)
                | (Integer, Identifier)
                | (Identifier, Integer)
                | (Categorical | Text | Identifier, Categorical | Text | Identifier)
        )
}

/// Simple plurality over cell kinds: numeric wins with more than half the
/// present values, then boolean, then datetime; anything else reads as text.
fn plurality_type(present: &[&Value]) -> ColumnType {
    let mut kinds: BTreeMap<ValueKind, usize> = BTreeMap::new();
    for v in present {
        *kinds.entry(value::classify(v)).or_insert(0) += 1;
    }
    let count = |k: ValueKind| kinds.get(&k).copied().unwrap_or(0);
    let n = present.len();
    let (ints, floats) = (count(ValueKind::Integer), count(ValueKind::Float));

    if (ints + floats) * 2 > n {
        if floats > ints {
            ColumnType::Float
        } else {
            ColumnType::Integer
        }
    } else if count(ValueKind::Boolean) * 2 > n {
        ColumnType::Boolean
    } else if count(ValueKind::Datetime) * 2 > n {
        ColumnType::Datetime
    } else {
        ColumnType::Text
    }
}

fn type_checks(ds: &Dataset) -> Vec<TypeCheck> {
    let mut out = Vec::new();
    for c in &ds.columns {
        let present: Vec<_> = ds.values(&c.name).filter(|v| !value::is_missing(v)).collect();
        if present.is_empty() {
            continue;
        }
        let majority = plurality_type(&present);
        let bad = present
            .iter()
            .filter(|v| !value::coerces_to(v, c.inferred_type))
            .count();
        let non_conforming = round2(pct(bad, present.len()));
        out.push(TypeCheck {
            column: c.name.clone(),
            declared: c.inferred_type,
            majority,
            non_conforming_percentage: non_conforming,
            consistent: compatible(c.inferred_type, majority) && non_conforming <= TYPE_TOLERANCE_PCT,
        });
    }
    out
}

fn outlier_stats(ds: &Dataset) -> Vec<OutlierStat> {
    let mut out = Vec::new();
    for c in ds.columns.iter().filter(|c| c.inferred_type.is_numeric()) {
        let values = stats::numeric_values(ds, &c.name, c.inferred_type);
        let Some(b) = stats::iqr_bounds(&values) else {
            continue;
        };
        let n = values.iter().filter(|v| **v < b.lower || **v > b.upper).count();
        out.push(OutlierStat {
            column: c.name.clone(),
            outlier_count: n,
            outlier_percentage: round2(pct(n, values.len())),
            lower_bound: b.lower,
            upper_bound: b.upper,
        });
    }
    out
}

fn consistency_issues(ds: &Dataset) -> Vec<ConsistencyIssue> {
    let mut out = Vec::new();
    for c in &ds.columns {
        if matches!(c.inferred_type, ColumnType::Categorical | ColumnType::Text) {
            let mut spellings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for v in ds.values(&c.name).filter(|v| !value::is_missing(v)) {
                let s = value::canonical(v);
                spellings.entry(s.to_lowercase()).or_default().insert(s);
            }
            if spellings.values().any(|s| s.len() > 1) {
                out.push(ConsistencyIssue {
                    column: c.name.clone(),
                    kind: ConsistencyKind::InconsistentCasing,
                });
            }
        }

        let lower = c.name.to_lowercase();
        if lower.contains("date") || lower.contains("time") {
            let mut slash = false;
            let mut dash = false;
            for v in ds
                .values(&c.name)
                .filter(|v| !value::is_missing(v))
                .take(DATE_FORMAT_SAMPLE)
            {
                let s = value::canonical(v);
                if s.contains('/') {
                    slash = true;
                } else if s.contains('-') {
                    dash = true;
                }
            }
            if slash && dash {
                out.push(ConsistencyIssue {
                    column: c.name.clone(),
                    kind: ConsistencyKind::MixedDateFormats,
                });
            }
        }
    }
    out
}

fn critical_issues(ds: &Dataset, r: &QualityReport) -> Vec<String> {
    let mut issues = Vec::new();
    let s = &r.component_scores;

    if s.missing_values < 15.0 {
        issues.push("High missing data rate - consider imputation strategies".to_string());
    }
    for m in r.missing_values.iter().filter(|m| m.missing_percentage > 50.0) {
        issues.push(format!(
            "Column '{}' is {:.1}% missing",
            m.column, m.missing_percentage
        ));
    }
    if s.duplicates < 15.0 {
        issues.push("Significant duplicate records detected".to_string());
    }
    if s.sample_size < 10.0 {
        issues.push("Insufficient sample size for reliable ML models".to_string());
    }
    if s.type_consistency < 10.0 {
        issues.push("Data type inconsistencies require attention".to_string());
    }

    if r.basic_info.row_count >= HIGH_CARDINALITY_MIN_ROWS {
        for c in ds
            .columns
            .iter()
            .filter(|c| matches!(c.inferred_type, ColumnType::Categorical | ColumnType::Text))
        {
            let ratio = c.unique_count as f64 / r.basic_info.row_count as f64;
            if ratio > HIGH_CARDINALITY_RATIO {
                issues.push(format!(
                    "High cardinality in '{}' - may need encoding strategies",
                    c.name
                ));
            }
        }
    }
    issues
}

fn recommendations(r: &QualityReport) -> Vec<String> {
    let mut recs = Vec::new();

    for m in r.missing_values.iter().filter(|m| m.missing_count > 0) {
        let action = match m.severity {
            Severity::Critical => "drop the column or source the missing data",
            Severity::High => "impute with a model-based strategy",
            _ => "impute with the median or mode",
        };
        recs.push(format!(
            "Column '{}' has {:.2}% missing values: {action}",
            m.column, m.missing_percentage
        ));
    }
    if r.duplicate_rows.duplicate_rows > 0 {
        recs.push(format!(
            "Remove {} duplicate rows",
            r.duplicate_rows.duplicate_rows
        ));
    }
    for t in r.type_checks.iter().filter(|t| !t.consistent) {
        recs.push(format!(
            "Standardize values in '{}': declared {} but values look {}",
            t.column,
            t.declared.as_str(),
            t.majority.as_str()
        ));
    }
    for o in r
        .outliers
        .iter()
        .filter(|o| o.outlier_percentage > OUTLIER_TOLERANCE_PCT)
    {
        recs.push(format!(
            "Review outliers in '{}' ({:.2}% outside [{:.2}, {:.2}])",
            o.column, o.outlier_percentage, o.lower_bound, o.upper_bound
        ));
    }
    for c in &r.consistency_issues {
        recs.push(match c.kind {
            ConsistencyKind::InconsistentCasing => format!("Normalize text casing in '{}'", c.column),
            ConsistencyKind::MixedDateFormats => format!("Use a single date format in '{}'", c.column),
        });
    }

    let rows = r.basic_info.row_count;
    let needed = ROWS_PER_COLUMN * r.basic_info.column_count;
    if rows < needed {
        recs.push(format!(
            "Collect more rows: {rows} rows for {} columns, at least {needed} recommended",
            r.basic_info.column_count
        ));
    }
    if rows < RECOMMENDED_MIN_ROWS {
        recs.push(format!(
            "Dataset has only {rows} rows; at least {RECOMMENDED_MIN_ROWS} are recommended for reliable models"
        ));
    }
    recs
}
