use std::io::Write;

use serde_json::json;
use tabular::{read_csv, read_csv_from, ColumnType, Dataset, Row, TabularError};

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn test_infers_column_types_from_csv() {
    let csv = "\
order_id,date,product,sales,active
1,2024-01-01,Widget,10.5,true
2,2024-01-02,Gadget,20,false
3,2024-01-03,Widget,7.25,true
4,2024-01-04,Gizmo,,false
";
    let ds = read_csv_from(csv.as_bytes(), "orders.csv").unwrap();

    assert_eq!(ds.name, "orders.csv");
    assert_eq!(ds.row_count, 4);
    assert_eq!(ds.column_count, 5);

    let ty = |n: &str| ds.column(n).unwrap().inferred_type;
    assert_eq!(ty("order_id"), ColumnType::Identifier);
    assert_eq!(ty("date"), ColumnType::Datetime);
    assert_eq!(ty("product"), ColumnType::Categorical);
    assert_eq!(ty("sales"), ColumnType::Float);
    assert_eq!(ty("active"), ColumnType::Boolean);

    let sales = ds.column("sales").unwrap();
    assert_eq!(sales.missing_count, 1);
    assert_eq!(sales.unique_count, 3);

    let product = ds.column("product").unwrap();
    assert_eq!(product.sample_values, vec!["Widget", "Gadget", "Gizmo"]);
}

#[test]
fn test_unparseable_values_count_as_missing() {
    let rows: Vec<Row> = (0..40)
        .map(|i| {
            let v = if i == 0 { json!("oops") } else { json!(i) };
            row(&[("amount", v)])
        })
        .collect();
    let ds = Dataset::from_rows("t", vec!["amount".into()], rows).unwrap();

    let amount = ds.column("amount").unwrap();
    assert_eq!(amount.inferred_type, ColumnType::Integer);
    assert_eq!(amount.missing_count, 1);
}

#[test]
fn test_duplicate_header_rejected() {
    let res = read_csv_from("a,a\n1,2\n".as_bytes(), "dup");
    assert!(matches!(res, Err(TabularError::DuplicateColumn(c)) if c == "a"));
}

#[test]
fn test_ragged_record_rejected() {
    let res = read_csv_from("a,b\n1,2\n3\n4,5,6\n".as_bytes(), "ragged");
    assert!(matches!(res, Err(TabularError::RaggedRecord { row: 1, .. })));
}

#[test]
fn test_unknown_column_in_row_rejected() {
    let rows = vec![row(&[("a", json!(1)), ("b", json!(2))])];
    let res = Dataset::from_rows("t", vec!["a".into()], rows);
    assert!(matches!(res, Err(TabularError::UnknownColumn { row: 0, .. })));
}

#[test]
fn test_fingerprint_ignores_row_map_order_and_cell_encoding() {
    let ds = Dataset::from_rows(
        "t",
        vec!["a".into(), "b".into()],
        vec![
            row(&[("a", json!(1)), ("b", json!("x"))]),
            row(&[("b", json!("x")), ("a", json!(1))]),
            row(&[("a", json!("1")), ("b", json!("x"))]),
        ],
    )
    .unwrap();

    let f: Vec<_> = ds.rows.iter().map(|r| ds.row_fingerprint(r)).collect();
    assert_eq!(f[0], f[1]);
    // CSV text "1" and JSON 1 are the same cell
    assert_eq!(f[0], f[2]);
}

#[test]
fn test_empty_csv_yields_zero_rows() {
    let ds = read_csv_from("a,b\n".as_bytes(), "empty").unwrap();
    assert_eq!(ds.row_count, 0);
    assert_eq!(ds.column_count, 2);
    assert!(ds.columns.iter().all(|c| c.missing_count == 0 && c.unique_count == 0));
}

#[test]
fn test_read_csv_from_file_defaults_name() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "region,revenue").unwrap();
    writeln!(file, "north,100").unwrap();
    writeln!(file, "south,250").unwrap();

    let ds = read_csv(file.path(), None).unwrap();
    let expected = file.path().file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(ds.name, expected);
    assert_eq!(ds.row_count, 2);

    let named = read_csv(file.path(), Some("sales")).unwrap();
    assert_eq!(named.name, "sales");
}

#[test]
fn test_content_hash_is_stable() {
    let build = || {
        Dataset::from_rows(
            "t",
            vec!["a".into()],
            vec![row(&[("a", json!(1))]), row(&[("a", json!(2))])],
        )
        .unwrap()
    };
    let (x, y) = (build(), build());
    assert_ne!(x.id, y.id);
    assert_eq!(x.content_hash(), y.content_hash());
}
