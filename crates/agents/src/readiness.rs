//! ML readiness assessment.
//!
//! Everything here is derived from the table alone: candidate targets, shape
//! of the numeric features, encoding and scaling needs, and the ordered
//! preprocessing plan a modelling pipeline would start from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tabular::{looks_like_identifier, value, ColumnDescriptor, ColumnType, Dataset};

use crate::quality::{MissingValueStat, OutlierStat, OUTLIER_TOLERANCE_PCT};
use crate::stats::{self, round2, round3};

pub const MAX_CLASSES: usize = 10;
pub const CORRELATION_THRESHOLD: f64 = 0.8;
pub const SKEW_THRESHOLD: f64 = 1.0;
const CONTINUOUS_MIN_UNIQUE: usize = 10;
const BALANCED_RATIO: f64 = 0.3;
const WELL_BALANCED_RATIO: f64 = 0.7;
const SCALE_SPREAD: f64 = 100.0;
const ONE_HOT_MAX: usize = 10;
const TARGET_ENCODING_MAX: usize = 50;
const TEXT_FEATURE_MIN_LEN: f64 = 20.0;
const BINNING_MIN_UNIQUE: usize = 20;
const MAX_INTERACTIONS: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassTarget {
    pub column: String,
    pub class_counts: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTarget {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCandidates {
    pub binary: Vec<ClassTarget>,
    pub multiclass: Vec<ClassTarget>,
    pub continuous: Vec<ContinuousTarget>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkewedFeature {
    pub column: String,
    pub skewness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub first: String,
    pub second: String,
    pub coefficient: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imbalance {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassBalance {
    pub column: String,
    /// Smallest class count over largest.
    pub balance_ratio: f64,
    pub balanced: bool,
    pub imbalance: Imbalance,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingNeeds {
    pub required: bool,
    pub columns: Vec<String>,
    /// Largest column range over the smallest non-zero one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_spread: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
    Label,
    OneHot,
    Target,
    Hashing,
}

impl EncodingStrategy {
    pub fn for_cardinality(unique: usize) -> Self {
        match unique {
            0..=2 => EncodingStrategy::Label,
            n if n <= ONE_HOT_MAX => EncodingStrategy::OneHot,
            n if n <= TARGET_ENCODING_MAX => EncodingStrategy::Target,
            _ => EncodingStrategy::Hashing,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodingNeed {
    pub column: String,
    pub unique_values: usize,
    pub strategy: EncodingStrategy,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureOpportunities {
    pub datetime: Vec<String>,
    pub text: Vec<String>,
    pub binning: Vec<String>,
    /// Products of numeric feature pairs, e.g. `price * quantity`.
    pub interactions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    Mode,
    MissingCategory,
    Mean,
    Median,
    DropColumn,
}

impl Imputation {
    pub fn choose(ty: ColumnType, missing_pct: f64) -> Self {
        if ty.is_numeric() || ty == ColumnType::Datetime {
            match missing_pct {
                p if p < 30.0 => Imputation::Mean,
                p if p < 50.0 => Imputation::Median,
                _ => Imputation::DropColumn,
            }
        } else if missing_pct < 50.0 {
            Imputation::Mode
        } else {
            Imputation::MissingCategory
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingStrategy {
    pub column: String,
    pub missing_percentage: f64,
    pub strategy: Imputation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessStep {
    RemoveDuplicates,
    HandleMissing,
    TreatOutliers,
    EncodeCategoricals,
    ScaleNumeric,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingPlan {
    pub missing: Vec<MissingStrategy>,
    pub outlier_columns: Vec<String>,
    /// Steps in the order they should run.
    pub pipeline: Vec<PreprocessStep>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MlAssessment {
    pub targets: TargetCandidates,
    pub skewed_features: Vec<SkewedFeature>,
    pub high_correlations: Vec<Correlation>,
    pub multicollinearity_risk: bool,
    pub class_balance: Vec<ClassBalance>,
    pub scaling: ScalingNeeds,
    pub encoding: Vec<EncodingNeed>,
    pub feature_opportunities: FeatureOpportunities,
    pub preprocessing: PreprocessingPlan,
    pub recommendations: Vec<String>,
}

fn is_feature_numeric(c: &ColumnDescriptor) -> bool {
    c.inferred_type.is_numeric() && !looks_like_identifier(&c.name)
}

fn is_class_like(c: &ColumnDescriptor) -> bool {
    matches!(
        c.inferred_type,
        ColumnType::Categorical | ColumnType::Text | ColumnType::Boolean
    ) && !looks_like_identifier(&c.name)
}

fn class_counts(ds: &Dataset, c: &ColumnDescriptor) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for v in ds.values(&c.name).filter(|v| value::coerces_to(v, c.inferred_type)) {
        *counts.entry(value::canonical(v)).or_insert(0) += 1;
    }
    counts
}

/// Rows where both columns hold a usable number.
fn paired(ds: &Dataset, a: &ColumnDescriptor, b: &ColumnDescriptor) -> Vec<(f64, f64)> {
    ds.values(&a.name)
        .zip(ds.values(&b.name))
        .filter(|(x, y)| value::coerces_to(x, a.inferred_type) && value::coerces_to(y, b.inferred_type))
        .filter_map(|(x, y)| Some((value::as_f64(x)?, value::as_f64(y)?)))
        .collect()
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;
    Some((min, max))
}

/// Assess a profiled table. `missing`, `outliers` and `duplicate_rows` are the
/// profiler's own findings so both views agree.
pub fn assess(
    ds: &Dataset,
    missing: &[MissingValueStat],
    outliers: &[OutlierStat],
    duplicate_rows: usize,
) -> MlAssessment {
    let numeric: Vec<&ColumnDescriptor> = ds.columns.iter().filter(|c| is_feature_numeric(c)).collect();
    let values: Vec<Vec<f64>> = numeric
        .iter()
        .map(|c| stats::numeric_values(ds, &c.name, c.inferred_type))
        .collect();

    let mut out = MlAssessment::default();

    // targets and class balance
    for c in ds.columns.iter().filter(|c| is_class_like(c)) {
        let counts = class_counts(ds, c);
        if !(2..=MAX_CLASSES).contains(&counts.len()) {
            continue;
        }
        let (lo, hi) = counts
            .values()
            .fold((usize::MAX, 0), |(lo, hi), n| (lo.min(*n), hi.max(*n)));
        let ratio = round3(lo as f64 / hi as f64);
        out.class_balance.push(ClassBalance {
            column: c.name.clone(),
            balance_ratio: ratio,
            balanced: ratio > BALANCED_RATIO,
            imbalance: if ratio > WELL_BALANCED_RATIO {
                Imbalance::Low
            } else if ratio > BALANCED_RATIO {
                Imbalance::Medium
            } else {
                Imbalance::High
            },
        });
        let target = ClassTarget {
            column: c.name.clone(),
            class_counts: counts,
        };
        if target.class_counts.len() == 2 {
            out.targets.binary.push(target);
        } else {
            out.targets.multiclass.push(target);
        }
    }
    for (c, v) in numeric.iter().zip(&values) {
        if c.unique_count <= CONTINUOUS_MIN_UNIQUE {
            continue;
        }
        let (Some((min, max)), Some(mean)) = (min_max(v), stats::mean(v)) else {
            continue;
        };
        out.targets.continuous.push(ContinuousTarget {
            column: c.name.clone(),
            min,
            max,
            mean: round3(mean),
            std_dev: round3(stats::std_dev(v).unwrap_or(0.0)),
        });
    }

    // numeric feature shape
    for (c, v) in numeric.iter().zip(&values) {
        if let Some(skew) = stats::skewness(v).filter(|s| s.abs() > SKEW_THRESHOLD) {
            out.skewed_features.push(SkewedFeature {
                column: c.name.clone(),
                skewness: round3(skew),
            });
        }
    }
    for (i, a) in numeric.iter().enumerate() {
        for b in &numeric[i + 1..] {
            if let Some(r) = stats::pearson(&paired(ds, a, b)).filter(|r| r.abs() > CORRELATION_THRESHOLD) {
                out.high_correlations.push(Correlation {
                    first: a.name.clone(),
                    second: b.name.clone(),
                    coefficient: round3(r),
                });
            }
        }
    }
    out.multicollinearity_risk = !out.high_correlations.is_empty();

    let ranges: Vec<f64> = values
        .iter()
        .filter_map(|v| min_max(v))
        .map(|(lo, hi)| hi - lo)
        .filter(|r| *r > 0.0)
        .collect();
    if ranges.len() > 1 {
        if let Some((lo, hi)) = min_max(&ranges) {
            let spread = hi / lo;
            out.scaling.range_spread = Some(round2(spread));
            if spread > SCALE_SPREAD {
                out.scaling.required = true;
                out.scaling.columns = numeric.iter().map(|c| c.name.clone()).collect();
            }
        }
    }

    for c in ds.columns.iter().filter(|c| {
        matches!(c.inferred_type, ColumnType::Categorical | ColumnType::Text)
            && !looks_like_identifier(&c.name)
    }) {
        out.encoding.push(EncodingNeed {
            column: c.name.clone(),
            unique_values: c.unique_count,
            strategy: EncodingStrategy::for_cardinality(c.unique_count),
        });
    }

    // feature engineering
    let fo = &mut out.feature_opportunities;
    for c in &ds.columns {
        match c.inferred_type {
            ColumnType::Datetime => fo.datetime.push(c.name.clone()),
            ColumnType::Categorical | ColumnType::Text if !looks_like_identifier(&c.name) => {
                let lens: Vec<f64> = ds
                    .values(&c.name)
                    .filter(|v| !value::is_missing(v))
                    .map(|v| value::canonical(v).chars().count() as f64)
                    .collect();
                if stats::mean(&lens).is_some_and(|m| m > TEXT_FEATURE_MIN_LEN) {
                    fo.text.push(c.name.clone());
                }
            }
            _ => {}
        }
    }
    fo.binning = numeric
        .iter()
        .filter(|c| c.unique_count > BINNING_MIN_UNIQUE)
        .map(|c| c.name.clone())
        .collect();
    let features = &numeric;
    fo.interactions = features
        .iter()
        .enumerate()
        .flat_map(move |(i, a)| {
            features[i + 1..]
                .iter()
                .map(move |b| format!("{} * {}", a.name, b.name))
        })
        .take(MAX_INTERACTIONS)
        .collect();

    // preprocessing plan
    let plan = &mut out.preprocessing;
    for m in missing.iter().filter(|m| m.missing_count > 0) {
        let ty = ds
            .column(&m.column)
            .map(|c| c.inferred_type)
            .unwrap_or(ColumnType::Text);
        plan.missing.push(MissingStrategy {
            column: m.column.clone(),
            missing_percentage: m.missing_percentage,
            strategy: Imputation::choose(ty, m.missing_percentage),
        });
    }
    plan.outlier_columns = outliers
        .iter()
        .filter(|o| o.outlier_percentage > OUTLIER_TOLERANCE_PCT)
        .map(|o| o.column.clone())
        .collect();
    if duplicate_rows > 0 {
        plan.pipeline.push(PreprocessStep::RemoveDuplicates);
    }
    if !plan.missing.is_empty() {
        plan.pipeline.push(PreprocessStep::HandleMissing);
    }
    if !plan.outlier_columns.is_empty() {
        plan.pipeline.push(PreprocessStep::TreatOutliers);
    }
    if !out.encoding.is_empty() {
        plan.pipeline.push(PreprocessStep::EncodeCategoricals);
    }
    if numeric.len() > 1 {
        plan.pipeline.push(PreprocessStep::ScaleNumeric);
    }

    out.recommendations = recommendations(&out);
    out
}

fn names<'a>(cols: impl Iterator<Item = &'a String>) -> String {
    cols.map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn recommendations(a: &MlAssessment) -> Vec<String> {
    let mut recs = Vec::new();
    let t = &a.targets;
    if !t.binary.is_empty() {
        recs.push(format!(
            "Binary classification targets available: {}",
            names(t.binary.iter().map(|x| &x.column))
        ));
    }
    if !t.multiclass.is_empty() {
        recs.push(format!(
            "Multi-class classification targets available: {}",
            names(t.multiclass.iter().map(|x| &x.column))
        ));
    }
    if !t.continuous.is_empty() {
        recs.push(format!(
            "Regression targets available: {}",
            names(t.continuous.iter().map(|x| &x.column))
        ));
    }
    if !a.skewed_features.is_empty() {
        recs.push(format!(
            "Consider a log or sqrt transformation for skewed features: {}",
            names(a.skewed_features.iter().map(|x| &x.column))
        ));
    }
    for c in &a.high_correlations {
        recs.push(format!(
            "'{}' and '{}' are highly correlated ({:.3}); consider dropping one",
            c.first, c.second, c.coefficient
        ));
    }
    for b in a.class_balance.iter().filter(|b| !b.balanced) {
        recs.push(format!(
            "Classes in '{}' are imbalanced (ratio {:.3}); resample before using it as a target",
            b.column, b.balance_ratio
        ));
    }
    if a.scaling.required {
        recs.push("Scale numeric features: their ranges differ by more than 100x".to_string());
    }
    if !a.encoding.is_empty() {
        recs.push("Encode categorical features before training".to_string());
    }
    let fo = &a.feature_opportunities;
    if !fo.datetime.is_empty() {
        recs.push(format!(
            "Extract year, month, day and weekday from {}",
            names(fo.datetime.iter())
        ));
    }
    if !fo.text.is_empty() {
        recs.push(format!(
            "Derive text features (length, word count, TF-IDF) from {}",
            names(fo.text.iter())
        ));
    }
    if !fo.binning.is_empty() {
        recs.push(format!(
            "Consider binning continuous features: {}",
            names(fo.binning.iter())
        ));
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_follows_cardinality() {
        assert_eq!(EncodingStrategy::for_cardinality(2), EncodingStrategy::Label);
        assert_eq!(EncodingStrategy::for_cardinality(7), EncodingStrategy::OneHot);
        assert_eq!(EncodingStrategy::for_cardinality(30), EncodingStrategy::Target);
        assert_eq!(EncodingStrategy::for_cardinality(500), EncodingStrategy::Hashing);
    }

    #[test]
    fn imputation_depends_on_type_and_share() {
        assert_eq!(Imputation::choose(ColumnType::Float, 10.0), Imputation::Mean);
        assert_eq!(Imputation::choose(ColumnType::Integer, 40.0), Imputation::Median);
        assert_eq!(Imputation::choose(ColumnType::Integer, 60.0), Imputation::DropColumn);
        assert_eq!(Imputation::choose(ColumnType::Categorical, 10.0), Imputation::Mode);
        assert_eq!(Imputation::choose(ColumnType::Text, 70.0), Imputation::MissingCategory);
    }
}
