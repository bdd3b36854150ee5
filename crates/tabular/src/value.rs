//! Cell classification and coercion.
//!
//! Cells are plain `serde_json::Value`s. Strings coming from a text source are
//! interpreted here, never at ingestion time, so the raw table stays intact.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::ColumnType;

const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "-", "#n/a"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// What a single cell looks like, independent of its column's declared type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Missing,
    Boolean,
    Integer,
    Float,
    Datetime,
    Text,
}

impl ValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

pub fn is_missing(v: &Value) -> bool {
    classify(v) == ValueKind::Missing
}

pub fn classify(v: &Value) -> ValueKind {
    match v {
        Value::Null => ValueKind::Missing,
        Value::Bool(_) => ValueKind::Boolean,
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                ValueKind::Integer
            } else {
                ValueKind::Float
            }
        }
        Value::String(s) => classify_str(s),
        Value::Array(_) | Value::Object(_) => ValueKind::Text,
    }
}

fn classify_str(raw: &str) -> ValueKind {
    let s = raw.trim();
    let lower = s.to_ascii_lowercase();
    if MISSING_TOKENS.contains(&lower.as_str()) {
        return ValueKind::Missing;
    }
    if s.parse::<i64>().is_ok() {
        return ValueKind::Integer;
    }
    if s.parse::<f64>().map(f64::is_finite).unwrap_or(false) {
        return ValueKind::Float;
    }
    if lower == "true" || lower == "false" {
        return ValueKind::Boolean;
    }
    if parse_datetime(s).is_some() {
        return ValueKind::Datetime;
    }
    ValueKind::Text
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for f in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(dt);
        }
    }
    for f in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Numeric view of a cell; `None` for anything that does not coerce.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Whether a non-missing cell can be read as `ty`.
pub fn coerces_to(v: &Value, ty: ColumnType) -> bool {
    let kind = classify(v);
    if kind == ValueKind::Missing {
        return false;
    }
    match ty {
        ColumnType::Integer => match kind {
            ValueKind::Integer => true,
            ValueKind::Float => as_f64(v).map(|f| f.fract() == 0.0).unwrap_or(false),
            _ => false,
        },
        ColumnType::Float => kind.is_numeric(),
        ColumnType::Boolean => kind == ValueKind::Boolean,
        ColumnType::Datetime => kind == ValueKind::Datetime,
        ColumnType::Categorical | ColumnType::Text | ColumnType::Identifier => true,
    }
}

/// Canonical text form, used for uniqueness, samples and fingerprints.
pub fn canonical(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Rough in-memory footprint of a cell in bytes
pub fn estimated_bytes(v: &Value) -> usize {
    match v {
        Value::Null | Value::Bool(_) => 8,
        Value::Number(_) => 16,
        Value::String(s) => 24 + s.len(),
        Value::Array(_) | Value::Object(_) => 24 + v.to_string().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_text_cells() {
        assert_eq!(classify(&json!("42")), ValueKind::Integer);
        assert_eq!(classify(&json!(" 4.5 ")), ValueKind::Float);
        assert_eq!(classify(&json!("N/A")), ValueKind::Missing);
        assert_eq!(classify(&json!("True")), ValueKind::Boolean);
        assert_eq!(classify(&json!("2024-01-31")), ValueKind::Datetime);
        assert_eq!(classify(&json!("2024-01-31T10:00:00Z")), ValueKind::Datetime);
        assert_eq!(classify(&json!("north")), ValueKind::Text);
        assert_eq!(classify(&json!("inf")), ValueKind::Text);
    }

    #[test]
    fn coercion_follows_declared_type() {
        assert!(coerces_to(&json!(3.0), ColumnType::Integer));
        assert!(!coerces_to(&json!(3.5), ColumnType::Integer));
        assert!(coerces_to(&json!("7"), ColumnType::Float));
        assert!(!coerces_to(&json!("seven"), ColumnType::Float));
        assert!(coerces_to(&json!("seven"), ColumnType::Categorical));
        assert!(!coerces_to(&Value::Null, ColumnType::Text));
    }
}
