//! Domain classification.
//!
//! The classifier never fails: a capability that errors, times out or answers
//! with something outside the taxonomy degrades to `general` with zero
//! confidence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabular::{ColumnDescriptor, ColumnType, Row};
use tracing::{info, warn};

pub const GENERAL: &str = "general";

pub const DOMAINS: &[&str] = &[
    GENERAL,
    "financial",
    "sales",
    "hr",
    "marketing",
    "operations",
    "customer_service",
    "healthcare",
    "education",
    "ecommerce",
    "manufacturing",
];

pub const SECONDARY_THRESHOLD: f64 = 0.3;
pub const CONTEXT_SAMPLE_ROWS: usize = 5;

pub fn is_known_domain(label: &str) -> bool {
    DOMAINS.contains(&label)
}

/// Column summary handed to a capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnContext {
    pub name: String,
    pub inferred_type: ColumnType,
    pub missing_count: usize,
    pub unique_count: usize,
    pub sample_values: Vec<String>,
}

/// Deterministic input for a classification call: same dataset, same bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationContext {
    pub dataset_name: String,
    pub row_count: usize,
    pub columns: Vec<ColumnContext>,
    pub sample_rows: Vec<Row>,
}

impl ClassificationContext {
    pub fn build(
        dataset_name: &str,
        row_count: usize,
        columns: &[ColumnDescriptor],
        sample_rows: &[Row],
    ) -> Self {
        Self {
            dataset_name: dataset_name.to_string(),
            row_count,
            columns: columns
                .iter()
                .map(|c| ColumnContext {
                    name: c.name.clone(),
                    inferred_type: c.inferred_type,
                    missing_count: c.missing_count,
                    unique_count: c.unique_count,
                    sample_values: c.sample_values.clone(),
                })
                .collect(),
            sample_rows: sample_rows.iter().take(CONTEXT_SAMPLE_ROWS).cloned().collect(),
        }
    }
}

/// Raw, unvalidated capability answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAnswer {
    pub domain: String,
    pub confidence: f64,
    #[serde(default)]
    pub secondary: Vec<(String, f64)>,
}

/// External "classify domain" capability.
#[async_trait]
pub trait ClassificationCapability: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(&self, ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecondaryDomain {
    pub domain: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainClassification {
    pub domain: String,
    pub confidence: f64,
    pub secondary_domains: Vec<SecondaryDomain>,
    /// Capability that produced the answer, or `fallback`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl DomainClassification {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            domain: GENERAL.to_string(),
            confidence: 0.0,
            secondary_domains: Vec::new(),
            source: "fallback".to_string(),
            fallback_reason: Some(reason.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Validate a capability answer against the taxonomy.
pub fn validate(answer: CapabilityAnswer, source: &str) -> DomainClassification {
    let label = normalize_label(&answer.domain);
    if !is_known_domain(&label) {
        return DomainClassification::fallback(format!("unrecognized domain label '{}'", answer.domain));
    }

    let mut secondary: Vec<SecondaryDomain> = answer
        .secondary
        .into_iter()
        .map(|(d, s)| (normalize_label(&d), clamp_confidence(s)))
        .filter(|(d, s)| *d != label && is_known_domain(d) && *s > SECONDARY_THRESHOLD)
        .map(|(domain, score)| SecondaryDomain { domain, score })
        .collect();
    secondary.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.domain.cmp(&b.domain)));
    let mut seen = BTreeSet::new();
    secondary.retain(|s| seen.insert(s.domain.clone()));

    DomainClassification {
        domain: label,
        confidence: clamp_confidence(answer.confidence),
        secondary_domains: secondary,
        source: source.to_string(),
        fallback_reason: None,
    }
}

/// Wraps a capability with a timeout and taxonomy validation.
#[derive(Clone)]
pub struct DomainClassifier {
    capability: Arc<dyn ClassificationCapability>,
    timeout: Duration,
}

impl DomainClassifier {
    pub fn new(capability: Arc<dyn ClassificationCapability>, timeout: Duration) -> Self {
        Self { capability, timeout }
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    pub async fn classify(&self, ctx: &ClassificationContext) -> DomainClassification {
        let name = self.capability.name().to_string();
        match tokio::time::timeout(self.timeout, self.capability.classify(ctx)).await {
            Ok(Ok(answer)) => {
                let out = validate(answer, &name);
                if let Some(reason) = &out.fallback_reason {
                    warn!(capability = %name, %reason, "domain capability answer rejected");
                } else {
                    info!(capability = %name, domain = %out.domain, confidence = out.confidence, "domain classified");
                }
                out
            }
            Ok(Err(e)) => {
                warn!(capability = %name, error = %e, "domain capability failed, using fallback");
                DomainClassification::fallback(format!("capability error: {e}"))
            }
            Err(_) => {
                warn!(capability = %name, timeout_ms = self.timeout.as_millis() as u64, "domain capability timed out, using fallback");
                DomainClassification::fallback(format!(
                    "capability timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }
}

const PATTERNS: &[(&str, &[&str])] = &[
    (
        "financial",
        &[
            "revenue", "profit", "cost", "price", "amount", "balance", "payment", "transaction",
            "invoice", "budget", "expense", "income", "roi", "margin", "cash", "credit", "debit",
            "account", "financial", "money", "currency",
        ],
    ),
    (
        "sales",
        &[
            "sales", "customer", "order", "product", "quantity", "discount", "deal", "lead",
            "prospect", "pipeline", "conversion", "campaign", "channel", "territory", "quota",
            "commission", "client",
        ],
    ),
    (
        "hr",
        &[
            "employee", "salary", "department", "position", "hire", "training", "performance",
            "review", "benefit", "attendance", "leave", "skill", "experience", "manager", "team",
            "promotion", "recruitment",
        ],
    ),
    (
        "marketing",
        &[
            "campaign", "conversion", "click", "impression", "reach", "engagement", "acquisition",
            "retention", "segment", "audience", "channel", "brand", "awareness", "lead", "funnel",
            "attribution", "social", "digital",
        ],
    ),
    (
        "operations",
        &[
            "inventory", "supply", "logistics", "delivery", "warehouse", "stock", "order",
            "fulfillment", "processing", "quality", "production", "efficiency", "capacity",
            "utilization", "workflow", "process",
        ],
    ),
    (
        "customer_service",
        &[
            "ticket", "support", "resolution", "satisfaction", "complaint", "feedback", "rating",
            "response", "escalation", "case", "query", "help", "issue", "problem", "service",
            "customer service",
        ],
    ),
    (
        "healthcare",
        &[
            "patient", "diagnosis", "treatment", "medical", "hospital", "doctor", "nurse",
            "medication", "symptom", "appointment", "clinic", "health", "care", "therapy",
            "surgery", "insurance", "billing",
        ],
    ),
    (
        "education",
        &[
            "student", "grade", "course", "class", "teacher", "school", "university",
            "enrollment", "graduation", "curriculum", "exam", "assignment", "learning",
            "education", "academic", "semester", "subject",
        ],
    ),
    (
        "ecommerce",
        &[
            "order", "cart", "checkout", "shipping", "return", "refund", "product", "category",
            "browse", "search", "wishlist", "rating", "review", "recommendation", "payment",
            "delivery", "website",
        ],
    ),
    (
        "manufacturing",
        &[
            "production", "manufacturing", "assembly", "quality", "defect", "batch", "machine",
            "equipment", "maintenance", "downtime", "efficiency", "output", "yield", "scrap",
            "rework", "capacity",
        ],
    ),
];

/// Keywords associated with a domain; empty for `general` and unknown labels.
pub fn domain_keywords(domain: &str) -> &'static [&'static str] {
    PATTERNS
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, k)| *k)
        .unwrap_or(&[])
}

fn words(s: &str) -> String {
    s.to_lowercase().replace(['_', '-'], " ")
}

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Offline capability scoring column names, the dataset name and sample values
/// against per-domain keyword lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordCapability;

impl KeywordCapability {
    pub fn scores(ctx: &ClassificationContext) -> Vec<(&'static str, f64)> {
        let columns: Vec<String> = ctx.columns.iter().map(|c| words(&c.name)).collect();
        let name = words(&ctx.dataset_name);
        let sample_columns: Vec<Vec<String>> = ctx
            .columns
            .iter()
            .map(|c| {
                ctx.sample_rows
                    .iter()
                    .filter_map(|r| r.get(&c.name))
                    .map(|v| tabular::value::canonical(v).to_lowercase())
                    .collect()
            })
            .collect();

        PATTERNS
            .iter()
            .map(|(domain, kw)| {
                let col = if columns.is_empty() {
                    0.0
                } else {
                    columns.iter().filter(|c| mentions(c, kw)).count() as f64 / columns.len() as f64
                };
                let file = if mentions(&name, kw) { 0.5 } else { 0.0 };
                let data = sample_columns
                    .iter()
                    .filter(|vals| vals.iter().any(|v| mentions(v, kw)))
                    .count() as f64
                    * 0.2;
                let score = col * 0.5 + file * 0.3 + data * 0.2;
                (*domain, (score * 1000.0).round() / 1000.0)
            })
            .collect()
    }
}

#[async_trait]
impl ClassificationCapability for KeywordCapability {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        let scores = Self::scores(ctx);
        // First maximum wins, so ties resolve in taxonomy order.
        let best = scores
            .iter()
            .fold(None::<(&str, f64)>, |acc, &(d, s)| match acc {
                Some((_, bs)) if bs >= s => acc,
                _ => Some((d, s)),
            });

        Ok(match best {
            Some((domain, score)) if score > 0.0 => CapabilityAnswer {
                domain: domain.to_string(),
                confidence: score.min(1.0),
                secondary: scores
                    .iter()
                    .filter(|(d, _)| *d != domain)
                    .map(|(d, s)| (d.to_string(), *s))
                    .collect(),
            },
            _ => CapabilityAnswer {
                domain: GENERAL.to_string(),
                confidence: 0.0,
                secondary: Vec::new(),
            },
        })
    }
}
