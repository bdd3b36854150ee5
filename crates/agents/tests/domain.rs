use std::sync::Arc;
use std::time::Duration;

use agents::domain::{validate, GENERAL};
use agents::{
    CapabilityAnswer, ClassificationCapability, ClassificationContext, DomainClassifier,
    KeywordCapability,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tabular::{Dataset, Row};

fn sales_dataset() -> Dataset {
    let headers: Vec<String> = ["date", "product", "sales", "region", "cost"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows: Vec<Vec<Value>> = vec![
        vec![json!("2024-01-01"), json!("Widget"), json!(100), json!("North"), json!(60)],
        vec![json!("2024-01-02"), json!("Gadget"), json!(200), json!("South"), json!(120)],
        vec![json!("2024-01-03"), json!("Widget"), json!(150), json!("East"), json!(90)],
    ];
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|r| headers.iter().cloned().zip(r).collect())
        .collect();
    Dataset::from_rows("sales.csv", headers, rows).unwrap()
}

fn context(ds: &Dataset) -> ClassificationContext {
    ClassificationContext::build(&ds.name, ds.row_count, &ds.columns, ds.sample_rows(5))
}

struct Fixed(CapabilityAnswer);

#[async_trait]
impl ClassificationCapability for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn classify(&self, _ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        Ok(self.0.clone())
    }
}

struct Slow(Duration);

#[async_trait]
impl ClassificationCapability for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn classify(&self, _ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        tokio::time::sleep(self.0).await;
        Ok(CapabilityAnswer {
            domain: "sales".into(),
            confidence: 0.9,
            secondary: vec![],
        })
    }
}

struct Broken;

#[async_trait]
impl ClassificationCapability for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn classify(&self, _ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        anyhow::bail!("malformed response")
    }
}

fn answer(domain: &str, confidence: f64) -> CapabilityAnswer {
    CapabilityAnswer {
        domain: domain.to_string(),
        confidence,
        secondary: vec![],
    }
}

#[tokio::test]
async fn test_keyword_capability_picks_sales() {
    let ds = sales_dataset();
    let classifier = DomainClassifier::new(Arc::new(KeywordCapability), Duration::from_secs(1));

    let out = classifier.classify(&context(&ds)).await;
    assert_eq!(out.domain, "sales");
    assert!((out.confidence - 0.35).abs() < 1e-9);
    assert_eq!(out.source, "keyword");
    assert!(!out.is_fallback());
}

#[tokio::test]
async fn test_keyword_capability_without_signal_is_general() {
    let headers = vec!["alpha".to_string(), "beta".to_string()];
    let rows: Vec<Row> = vec![[("alpha".to_string(), json!(1)), ("beta".to_string(), json!(2))]
        .into_iter()
        .collect()];
    let ds = Dataset::from_rows("x.csv", headers, rows).unwrap();

    let answer = KeywordCapability.classify(&context(&ds)).await.unwrap();
    assert_eq!(answer.domain, GENERAL);
    assert_eq!(answer.confidence, 0.0);
}

#[tokio::test]
async fn test_timeout_falls_back_to_general() {
    let ds = sales_dataset();
    let classifier = DomainClassifier::new(
        Arc::new(Slow(Duration::from_millis(500))),
        Duration::from_millis(20),
    );

    let out = classifier.classify(&context(&ds)).await;
    assert_eq!(out.domain, GENERAL);
    assert_eq!(out.confidence, 0.0);
    assert!(out.fallback_reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_capability_error_falls_back_to_general() {
    let ds = sales_dataset();
    let classifier = DomainClassifier::new(Arc::new(Broken), Duration::from_secs(1));

    let out = classifier.classify(&context(&ds)).await;
    assert_eq!(out.domain, GENERAL);
    assert_eq!(out.confidence, 0.0);
    assert!(out.fallback_reason.unwrap().contains("malformed response"));
}

#[tokio::test]
async fn test_unknown_label_falls_back() {
    let ds = sales_dataset();
    let classifier = DomainClassifier::new(
        Arc::new(Fixed(answer("astrology", 0.99))),
        Duration::from_secs(1),
    );

    let out = classifier.classify(&context(&ds)).await;
    assert_eq!(out.domain, GENERAL);
    assert_eq!(out.confidence, 0.0);
    assert!(out.is_fallback());
}

#[test]
fn test_labels_normalized_and_confidence_clamped() {
    let out = validate(answer(" Customer Service ", 1.7), "fixed");
    assert_eq!(out.domain, "customer_service");
    assert_eq!(out.confidence, 1.0);

    assert_eq!(validate(answer("financial", f64::NAN), "fixed").confidence, 0.0);
    assert_eq!(validate(answer("financial", -0.2), "fixed").confidence, 0.0);
}

#[test]
fn test_secondary_domains_filtered_and_sorted() {
    let out = validate(
        CapabilityAnswer {
            domain: "sales".into(),
            confidence: 0.8,
            secondary: vec![
                ("marketing".into(), 0.4),
                ("sales".into(), 0.9),
                ("astrology".into(), 0.7),
                ("ecommerce".into(), 0.6),
                ("hr".into(), 0.3),
            ],
        },
        "fixed",
    );

    let names: Vec<_> = out.secondary_domains.iter().map(|s| s.domain.as_str()).collect();
    assert_eq!(names, vec!["ecommerce", "marketing"]);
}

#[test]
fn test_context_is_deterministic() {
    let ds = sales_dataset();
    let a = serde_json::to_vec(&context(&ds)).unwrap();
    let b = serde_json::to_vec(&context(&ds)).unwrap();
    assert_eq!(a, b);
}
