use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tabular::Dataset;

/// Upload size ceiling, measured on the parsed cells.
pub const MAX_DATASET_BYTES: usize = 50 * 1024 * 1024;
const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub rows: usize,
    pub columns: usize,
    pub dataset_hash_hex: String, // 64 hex (BLAKE3)
    pub estimated_bytes: usize,
}

/// Structural checks run by `upload_validation`. Any error fails the run.
pub fn validate_dataset(ds: &Dataset) -> Result<ValidationStats, Vec<String>> {
    let mut errors: Vec<String> = vec![];

    if ds.columns.is_empty() {
        errors.push("Dataset has no columns".to_string());
    }
    if ds.rows.is_empty() {
        errors.push("Failed to load data or data is empty".to_string());
    }
    if ds.row_count != ds.rows.len() {
        errors.push(format!(
            "row_count is {} but {} rows are present",
            ds.row_count,
            ds.rows.len()
        ));
    }
    if ds.column_count != ds.columns.len() {
        errors.push(format!(
            "column_count is {} but {} columns are described",
            ds.column_count,
            ds.columns.len()
        ));
    }

    let mut names = HashSet::new();
    for c in &ds.columns {
        if c.name.trim().is_empty() {
            errors.push("Column with empty name".to_string());
        } else if !names.insert(c.name.as_str()) {
            errors.push(format!("Duplicate column '{}'", c.name));
        }
    }

    for (i, row) in ds.rows.iter().enumerate() {
        if let Some(unknown) = row.keys().find(|k| !names.contains(k.as_str())) {
            errors.push(format!("Row {i}: unknown column '{unknown}'"));
            if errors.len() >= MAX_REPORTED_ERRORS {
                break;
            }
        }
    }

    let estimated_bytes = ds.estimated_bytes();
    if estimated_bytes > MAX_DATASET_BYTES {
        errors.push(format!(
            "Dataset too large ({estimated_bytes} bytes). Max: {MAX_DATASET_BYTES}"
        ));
    }

    if !errors.is_empty() {
        errors.truncate(MAX_REPORTED_ERRORS);
        return Err(errors);
    }

    Ok(ValidationStats {
        rows: ds.rows.len(),
        columns: ds.columns.len(),
        dataset_hash_hex: hex::encode(ds.content_hash()),
        estimated_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabular::Row;

    fn dataset() -> Dataset {
        let headers = vec!["a".to_string(), "b".to_string()];
        let rows: Vec<Row> = (0..3)
            .map(|i| [("a".to_string(), json!(i)), ("b".to_string(), json!("x"))].into_iter().collect())
            .collect();
        Dataset::from_rows("t.csv", headers, rows).unwrap()
    }

    #[test]
    fn accepts_well_formed_dataset() {
        let stats = validate_dataset(&dataset()).unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.columns, 2);
        assert_eq!(stats.dataset_hash_hex.len(), 64);
    }

    #[test]
    fn rejects_empty_dataset() {
        let ds = Dataset::from_rows("t.csv", vec!["a".to_string()], vec![]).unwrap();
        let errs = validate_dataset(&ds).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("empty")));
    }

    #[test]
    fn rejects_tampered_counts_and_rows() {
        let mut ds = dataset();
        ds.row_count = 10;
        ds.rows[1].insert("zzz".to_string(), json!(1));
        let errs = validate_dataset(&ds).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs[1].contains("Row 1"));
    }
}
