use agents::quality::{ConsistencyKind, Severity, EMPTY_DATASET_ISSUE};
use agents::{profile, MlReadiness, ProfileError};
use serde_json::{json, Value};
use tabular::{ColumnType, Dataset, Row};

fn table(headers: &[&str], rows: Vec<Vec<Value>>) -> Dataset {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|r| headers.iter().cloned().zip(r).collect())
        .collect();
    Dataset::from_rows("test.csv", headers, rows).unwrap()
}

fn five_row_sales() -> Dataset {
    table(
        &["date", "product", "sales", "region", "cost"],
        vec![
            vec![json!("2024-01-01"), json!("Widget"), json!(100), json!("North"), json!(60)],
            vec![json!("2024-01-02"), json!("Gadget"), json!(200), json!("South"), json!(120)],
            vec![json!("2024-01-03"), json!("Widget"), json!(150), json!("East"), json!(90)],
            vec![json!("2024-01-04"), json!("Gizmo"), json!(300), json!("North"), json!(180)],
            vec![json!("2024-01-05"), json!("Gadget"), json!(250), json!("West"), json!(150)],
        ],
    )
}

fn clean_table() -> Dataset {
    let regions = ["north", "south", "east"];
    let rows = (0..30)
        .map(|i| {
            vec![
                json!(regions[i % 3]),
                json!(i),
                json!(10.0 + (i % 4) as f64 * 0.5),
            ]
        })
        .collect();
    table(&["region", "units", "price"], rows)
}

#[test]
fn test_empty_dataset_scores_zero() {
    let ds = table(&["a", "b"], vec![]);
    let report = profile(&ds).unwrap();

    assert_eq!(report.data_quality_score, 0.0);
    assert_eq!(report.ml_readiness_level, MlReadiness::NotSuitable);
    assert_eq!(report.critical_issues, vec![EMPTY_DATASET_ISSUE.to_string()]);
    assert!(report.missing_values.is_empty());
}

#[test]
fn test_clean_dataset_scores_full_marks() {
    let report = profile(&clean_table()).unwrap();

    assert_eq!(report.data_quality_score, 100.0);
    assert_eq!(report.ml_readiness_level, MlReadiness::ProductionReady);
    assert!(report.critical_issues.is_empty());
    assert_eq!(report.duplicate_rows.duplicate_rows, 0);
    assert!(report.type_checks.iter().all(|t| t.consistent));
    // 30 rows is enough for 3 columns but still short of the general minimum.
    assert!(report.recommendations.iter().any(|r| r.contains("100")));
}

#[test]
fn test_five_row_sales_table_needs_preprocessing() {
    let report = profile(&five_row_sales()).unwrap();

    assert_eq!(report.component_scores.missing_values, 25.0);
    assert_eq!(report.component_scores.duplicates, 20.0);
    assert_eq!(report.component_scores.type_consistency, 20.0);
    assert_eq!(report.component_scores.outliers, 15.0);
    assert_eq!(report.component_scores.sample_size, -16.0);
    assert_eq!(report.data_quality_score, 64.0);
    assert!(report.data_quality_score < 75.0);
    assert_eq!(report.ml_readiness_level, MlReadiness::RequiresPreprocessing);
    assert!(report
        .critical_issues
        .iter()
        .any(|i| i.contains("Insufficient sample size")));
}

#[test]
fn test_duplicate_score_invariant_under_permutation() {
    let rows = vec![
        vec![json!("a"), json!(1)],
        vec![json!("b"), json!(2)],
        vec![json!("a"), json!(1)],
        vec![json!("c"), json!(3)],
        vec![json!("a"), json!(1)],
        vec![json!("b"), json!(2)],
    ];
    let mut reversed = rows.clone();
    reversed.reverse();
    let mut rotated = rows.clone();
    rotated.rotate_left(2);

    let base = profile(&table(&["k", "v"], rows)).unwrap();
    for other in [reversed, rotated] {
        let r = profile(&table(&["k", "v"], other)).unwrap();
        assert_eq!(r.duplicate_rows, base.duplicate_rows);
        assert_eq!(r.component_scores.duplicates, base.component_scores.duplicates);
        assert_eq!(r.data_quality_score, base.data_quality_score);
    }
    assert_eq!(base.duplicate_rows.duplicate_rows, 3);
    assert_eq!(base.duplicate_rows.duplicate_percentage, 50.0);
    assert_eq!(base.component_scores.duplicates, 10.0);
}

#[test]
fn test_outlier_heavy_column_loses_outlier_score() {
    let mut rows: Vec<Vec<Value>> = (1..=18).map(|i| vec![json!(i)]).collect();
    rows.push(vec![json!(1000)]);
    rows.push(vec![json!(2000)]);
    let report = profile(&table(&["value"], rows)).unwrap();

    let o = &report.outliers[0];
    assert_eq!(o.column, "value");
    assert_eq!(o.outlier_count, 2);
    assert_eq!(o.outlier_percentage, 10.0);
    assert_eq!(o.upper_bound, 29.5);
    assert_eq!(report.component_scores.outliers, 0.0);
    assert_eq!(report.data_quality_score, 85.0);
    assert!(report.recommendations.iter().any(|r| r.contains("outliers in 'value'")));
}

#[test]
fn test_type_disagreement_is_penalized() {
    let rows = (0..20)
        .map(|i| {
            let code = if i < 17 { json!(i) } else { json!(["x", "y", "z"][i - 17]) };
            vec![code, json!(i)]
        })
        .collect();
    let mut ds = table(&["code", "n"], rows);
    assert_eq!(ds.columns[0].inferred_type, ColumnType::Categorical);
    ds.columns[0].inferred_type = ColumnType::Integer;
    ds.columns[0].missing_count = 3;

    let report = profile(&ds).unwrap();
    let check = report.type_checks.iter().find(|t| t.column == "code").unwrap();
    assert!(!check.consistent);
    assert_eq!(check.non_conforming_percentage, 15.0);
    assert_eq!(report.component_scores.type_consistency, 10.0);

    let missing = &report.missing_values[0];
    assert_eq!(missing.missing_count, 3);
    assert_eq!(missing.severity, Severity::Medium);
}

#[test]
fn test_mixed_numeric_column_is_inconsistent_after_ingestion() {
    // 85 % integers, 15 % free text: too mixed to be declared numeric.
    let rows = (0..200)
        .map(|i| {
            let price = if i % 20 < 3 { json!("unknown") } else { json!(10 + i) };
            vec![price, json!(i % 7)]
        })
        .collect();
    let ds = table(&["price", "qty"], rows);
    assert!(!ds.columns[0].inferred_type.is_numeric());

    let report = profile(&ds).unwrap();
    let check = report.type_checks.iter().find(|t| t.column == "price").unwrap();
    assert_eq!(check.majority, ColumnType::Integer);
    assert!(!check.consistent);
    assert!(report.component_scores.type_consistency < 20.0);
    assert_eq!(report.component_scores.type_consistency, 10.0);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("Standardize values in 'price'")));
}

#[test]
fn test_all_missing_column_excluded_from_type_and_outlier_scoring() {
    let rows = (0..20).map(|i| vec![json!(i), Value::Null]).collect();
    let report = profile(&table(&["n", "empty"], rows)).unwrap();

    assert_eq!(report.type_checks.len(), 1);
    assert_eq!(report.component_scores.type_consistency, 20.0);
    assert_eq!(report.missing_percentage("empty"), Some(100.0));
    assert!(report.critical_issues.iter().any(|i| i.contains("'empty'")));
}

#[test]
fn test_corrupted_column_type_fails() {
    let mut ds = five_row_sales();
    ds.columns[2].inferred_type = ColumnType::Boolean;

    match profile(&ds) {
        Err(ProfileError::CorruptColumnType { column, declared, present }) => {
            assert_eq!(column, "sales");
            assert_eq!(declared, "boolean");
            assert_eq!(present, 5);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_out_of_range_counts_fail() {
    let mut ds = five_row_sales();
    ds.columns[0].missing_count = 6;
    assert!(matches!(profile(&ds), Err(ProfileError::MissingCountOutOfRange { .. })));

    let mut ds = five_row_sales();
    ds.columns[1].unique_count = 9;
    assert!(matches!(profile(&ds), Err(ProfileError::UniqueCountOutOfRange { .. })));
}

#[test]
fn test_unparseable_values_count_as_missing() {
    let mut rows: Vec<Vec<Value>> = (0..39).map(|i| vec![json!(i)]).collect();
    rows.push(vec![json!("not a number")]);
    let report = profile(&table(&["amount"], rows)).unwrap();

    assert_eq!(report.missing_values[0].missing_count, 1);
    assert_eq!(report.missing_values[0].missing_percentage, 2.5);
    assert_eq!(report.missing_values[0].severity, Severity::Low);
}

#[test]
fn test_consistency_issues_detected() {
    let rows = (0..12)
        .map(|i| {
            let region = ["North", "north", "South"][i % 3];
            let date = if i % 2 == 0 { "2024-01-01" } else { "2024/01/02" };
            vec![json!(region), json!(date)]
        })
        .collect();
    let report = profile(&table(&["region", "order_date"], rows)).unwrap();

    let kinds: Vec<_> = report
        .consistency_issues
        .iter()
        .map(|c| (c.column.as_str(), c.kind))
        .collect();
    assert!(kinds.contains(&("region", ConsistencyKind::InconsistentCasing)));
    assert!(kinds.contains(&("order_date", ConsistencyKind::MixedDateFormats)));
}

#[test]
fn test_high_cardinality_text_is_critical() {
    let rows = (0..20).map(|i| vec![json!(format!("c{i}")), json!(i % 4)]).collect();
    let report = profile(&table(&["comment", "bucket"], rows)).unwrap();

    assert!(report
        .critical_issues
        .iter()
        .any(|i| i.contains("High cardinality in 'comment'")));
}

#[test]
fn test_profile_is_deterministic() {
    let ds = five_row_sales();
    let a = serde_json::to_string(&profile(&ds).unwrap()).unwrap();
    let b = serde_json::to_string(&profile(&ds).unwrap()).unwrap();
    assert_eq!(a, b);
}
