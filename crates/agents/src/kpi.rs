//! KPI recommendation.
//!
//! Candidates come from column shape alone. The domain only reorders them:
//! a KPI whose source columns mention the domain's vocabulary moves forward,
//! nothing is ever dropped for being off-domain.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tabular::{looks_like_identifier, ColumnDescriptor, ColumnType};

use crate::domain;
use crate::quality::QualityReport;

pub const DEFAULT_MAX_KPIS: usize = 8;
pub const MAX_MISSING_PCT: f64 = 20.0;
pub const MIN_CATEGORIES: usize = 2;
pub const MAX_CATEGORIES: usize = 20;

const MONEY_TOTAL: &[&str] = &["revenue", "sales", "income", "profit", "amount", "cost", "expense", "spend"];
const MONEY_AVG: &[&str] = &["price", "salary", "fee"];
const REVENUE: &[&str] = &["revenue", "sales", "income"];
const COST: &[&str] = &["cost", "expense", "spend"];
const RATE: &[&str] = &["rate", "ratio", "percent", "pct", "share"];
const DURATION: &[&str] = &["duration", "time", "days", "hours", "minutes", "seconds"];
const QUANTITY: &[&str] = &["quantity", "qty", "units", "count", "volume"];
const HEADLINE: &[&str] = &["revenue", "sales", "profit", "growth", "conversion", "acquisition", "roi", "margin"];
const STRATEGIC_DOMAINS: &[&str] = &["financial", "sales"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Ratio,
    Rate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiFormat {
    Currency,
    Percentage,
    Count,
    Duration,
}

/// Where a KPI sits in the dashboard hierarchy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiTier {
    Primary,
    Secondary,
    #[default]
    Operational,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KpiSpec {
    pub name: String,
    pub source_columns: Vec<String>,
    pub aggregation: Aggregation,
    pub format: KpiFormat,
    /// Declarative computation, e.g. `SUM(revenue)`.
    pub formula: String,
    pub description: String,
    #[serde(default)]
    pub tier: KpiTier,
}

impl KpiSpec {
    /// Single-value KPIs that read naturally on a gauge.
    pub fn is_ratio_like(&self) -> bool {
        self.format == KpiFormat::Percentage
            || matches!(self.aggregation, Aggregation::Ratio | Aggregation::Rate)
    }
}

pub fn title_case(column: &str) -> String {
    column
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(f) => f.to_uppercase().chain(cs).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn words(column: &str) -> String {
    column.to_lowercase().replace(['_', '-'], " ")
}

fn has_any(column: &str, keywords: &[&str]) -> bool {
    let w = words(column);
    keywords.iter().any(|k| w.contains(k))
}

fn missing_pct(c: &ColumnDescriptor, report: &QualityReport) -> f64 {
    report.missing_percentage(&c.name).unwrap_or_else(|| {
        if report.basic_info.row_count == 0 {
            0.0
        } else {
            c.missing_count as f64 / report.basic_info.row_count as f64 * 100.0
        }
    })
}

fn numeric_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let title = title_case(&c.name);
    let n = c.name.as_str();
    let (name, aggregation, format, description) = if has_any(n, MONEY_AVG) {
        (format!("Average {title}"), Aggregation::Avg, KpiFormat::Currency, format!("Average {n} per record"))
    } else if has_any(n, RATE) {
        (format!("Average {title}"), Aggregation::Avg, KpiFormat::Percentage, format!("Mean of {n} across records"))
    } else if has_any(n, MONEY_TOTAL) {
        (format!("Total {title}"), Aggregation::Sum, KpiFormat::Currency, format!("Sum of {n} across all records"))
    } else if has_any(n, DURATION) {
        (format!("Average {title}"), Aggregation::Avg, KpiFormat::Duration, format!("Mean {n} per record"))
    } else if has_any(n, QUANTITY) {
        (format!("Total {title}"), Aggregation::Sum, KpiFormat::Count, format!("Sum of {n} across all records"))
    } else {
        (format!("Average {title}"), Aggregation::Avg, KpiFormat::Count, format!("Mean of {n} across records"))
    };
    let formula = match aggregation {
        Aggregation::Sum => format!("SUM({n})"),
        _ => format!("AVG({n})"),
    };
    KpiSpec {
        name,
        source_columns: vec![c.name.clone()],
        aggregation,
        format,
        formula,
        description,
        tier: KpiTier::Operational,
    }
}

fn margin_kpi(revenue: &ColumnDescriptor, cost: &ColumnDescriptor) -> KpiSpec {
    let (r, c) = (revenue.name.as_str(), cost.name.as_str());
    KpiSpec {
        name: format!("{} Margin", title_case(r)),
        source_columns: vec![r.to_string(), c.to_string()],
        aggregation: Aggregation::Ratio,
        format: KpiFormat::Percentage,
        formula: format!("(SUM({r}) - SUM({c})) / SUM({r})"),
        description: format!("Share of {r} left after {c}"),
        tier: KpiTier::Operational,
    }
}

fn distinct_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let n = c.name.as_str();
    KpiSpec {
        name: format!("Distinct {}", title_case(n)),
        source_columns: vec![n.to_string()],
        aggregation: Aggregation::Count,
        format: KpiFormat::Count,
        formula: format!("COUNT(DISTINCT {n})"),
        description: format!("Number of distinct {n} values"),
        tier: KpiTier::Operational,
    }
}

fn top_share_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let n = c.name.as_str();
    KpiSpec {
        name: format!("Top {} Share", title_case(n)),
        source_columns: vec![n.to_string()],
        aggregation: Aggregation::Rate,
        format: KpiFormat::Percentage,
        formula: format!("MAX(COUNT(*) GROUP BY {n}) / COUNT(*)"),
        description: format!("Share of records in the most frequent {n}"),
        tier: KpiTier::Operational,
    }
}

fn boolean_rate_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let n = c.name.as_str();
    KpiSpec {
        name: format!("{} Rate", title_case(n)),
        source_columns: vec![n.to_string()],
        aggregation: Aggregation::Rate,
        format: KpiFormat::Percentage,
        formula: format!("COUNT({n} = true) / COUNT({n})"),
        description: format!("Share of records where {n} is true"),
        tier: KpiTier::Operational,
    }
}

fn total_records_kpi() -> KpiSpec {
    KpiSpec {
        name: "Total Records".to_string(),
        source_columns: Vec::new(),
        aggregation: Aggregation::Count,
        format: KpiFormat::Count,
        formula: "COUNT(*)".to_string(),
        description: "Total number of data records".to_string(),
        tier: KpiTier::Operational,
    }
}

fn average_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let n = c.name.as_str();
    KpiSpec {
        name: format!("Average {}", title_case(n)),
        source_columns: vec![n.to_string()],
        aggregation: Aggregation::Avg,
        format: KpiFormat::Count,
        formula: format!("AVG({n})"),
        description: format!("Average value of {n}"),
        tier: KpiTier::Operational,
    }
}

fn distribution_kpi(c: &ColumnDescriptor) -> KpiSpec {
    let n = c.name.as_str();
    KpiSpec {
        name: format!("{} Distribution", title_case(n)),
        source_columns: vec![n.to_string()],
        aggregation: Aggregation::Count,
        format: KpiFormat::Count,
        formula: format!("COUNT(*) GROUP BY {n}"),
        description: format!("Record count per {n}"),
        tier: KpiTier::Operational,
    }
}

/// How strongly a KPI's source columns speak the domain's vocabulary.
fn domain_affinity(kpi: &KpiSpec, keywords: &[&str]) -> usize {
    kpi.source_columns
        .iter()
        .filter(|c| has_any(c, keywords))
        .count()
}

fn tier_for(kpi: &KpiSpec, domain: &str, keywords: &[&str]) -> KpiTier {
    if kpi.source_columns.is_empty() {
        return KpiTier::Operational;
    }
    if has_any(&kpi.name, HEADLINE) || kpi.source_columns.iter().any(|c| has_any(c, HEADLINE)) {
        KpiTier::Primary
    } else if domain_affinity(kpi, keywords) > 0 || STRATEGIC_DOMAINS.contains(&domain) {
        KpiTier::Secondary
    } else {
        KpiTier::Operational
    }
}

/// KPI names grouped by tier, each group in recommendation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiHierarchy {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub operational: Vec<String>,
}

impl KpiHierarchy {
    pub fn from_kpis(kpis: &[KpiSpec]) -> Self {
        let mut h = Self::default();
        for k in kpis {
            let group = match k.tier {
                KpiTier::Primary => &mut h.primary,
                KpiTier::Secondary => &mut h.secondary,
                KpiTier::Operational => &mut h.operational,
            };
            group.push(k.name.clone());
        }
        h
    }
}

/// Recommend up to `max` KPIs for a profiled table.
pub fn recommend(
    domain: &str,
    columns: &[ColumnDescriptor],
    report: &QualityReport,
    max: usize,
) -> Vec<KpiSpec> {
    let usable_numeric: Vec<&ColumnDescriptor> = columns
        .iter()
        .filter(|c| {
            c.inferred_type.is_numeric()
                && !looks_like_identifier(&c.name)
                && missing_pct(c, report) <= MAX_MISSING_PCT
        })
        .collect();
    let usable_categorical: Vec<&ColumnDescriptor> = columns
        .iter()
        .filter(|c| {
            c.inferred_type == ColumnType::Categorical
                && (MIN_CATEGORIES..=MAX_CATEGORIES).contains(&c.unique_count)
        })
        .collect();

    let mut candidates: Vec<KpiSpec> = usable_numeric.iter().map(|c| numeric_kpi(c)).collect();

    let revenue = usable_numeric.iter().find(|c| has_any(&c.name, REVENUE));
    let cost = usable_numeric.iter().find(|c| has_any(&c.name, COST));
    if let (Some(r), Some(c)) = (revenue, cost) {
        if r.name != c.name {
            candidates.push(margin_kpi(r, c));
        }
    }

    for c in &usable_categorical {
        candidates.push(distinct_kpi(c));
        candidates.push(top_share_kpi(c));
    }
    for c in columns.iter().filter(|c| {
        c.inferred_type == ColumnType::Boolean && missing_pct(c, report) <= MAX_MISSING_PCT
    }) {
        candidates.push(boolean_rate_kpi(c));
    }

    let keywords = domain::domain_keywords(domain);
    let mut ordered: Vec<(usize, KpiSpec)> = candidates
        .into_iter()
        .map(|k| (domain_affinity(&k, keywords), k))
        .collect();
    // Stable: ties keep column order.
    ordered.sort_by(|a, b| b.0.cmp(&a.0));

    let any_domain_match = ordered.iter().any(|(score, _)| *score > 0);
    let mut out: Vec<KpiSpec> = Vec::new();
    if !any_domain_match {
        out.push(total_records_kpi());
        if let Some(c) = usable_numeric.first() {
            out.push(average_kpi(c));
        }
        if let Some(c) = usable_categorical.iter().min_by_key(|c| c.unique_count) {
            out.push(distribution_kpi(c));
        }
    }
    out.extend(ordered.into_iter().map(|(_, k)| k));

    let mut seen = BTreeSet::new();
    out.retain(|k| seen.insert(k.name.clone()));
    out.truncate(max);
    for k in &mut out {
        k.tier = tier_for(k, domain, keywords);
    }
    out
}
