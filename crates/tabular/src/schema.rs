use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::value::{self, ValueKind};
use crate::{Result, TabularError};

pub type Hash32 = [u8; 32];

/// One row: column name -> cell. Absent keys read as missing.
pub type Row = BTreeMap<String, Value>;

pub const SAMPLE_SIZE: usize = 5;
pub const CATEGORICAL_MAX_UNIQUE: usize = 50;
const TEXT_MIN_AVG_LEN: usize = 50;
const TYPE_MAJORITY: f64 = 0.95;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Datetime,
    Categorical,
    Text,
    Identifier,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Datetime => "datetime",
            ColumnType::Categorical => "categorical",
            ColumnType::Text => "text",
            ColumnType::Identifier => "identifier",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub inferred_type: ColumnType,
    pub missing_count: usize,
    pub unique_count: usize,
    pub sample_values: Vec<String>,
}

impl ColumnDescriptor {
    /// Infer type and statistics from the column's cells.
    pub fn infer<'a, I>(name: &str, cells: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let cells: Vec<&Value> = cells.into_iter().collect();
        let inferred_type = infer_type(name, &cells);
        Self::with_type(name, inferred_type, cells)
    }

    /// Statistics for a column whose type is already known.
    pub fn with_type<'a, I>(name: &str, inferred_type: ColumnType, cells: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut missing_count = 0;
        let mut distinct = BTreeSet::new();
        let mut sample_values = Vec::new();

        for v in cells {
            if !value::coerces_to(v, inferred_type) {
                missing_count += 1;
                continue;
            }
            let c = value::canonical(v);
            if distinct.insert(c.clone()) && sample_values.len() < SAMPLE_SIZE {
                sample_values.push(c);
            }
        }

        Self {
            name: name.to_string(),
            inferred_type,
            missing_count,
            unique_count: distinct.len(),
            sample_values,
        }
    }
}

pub fn looks_like_identifier(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    lower == "id"
        || lower.ends_with("_id")
        || lower.ends_with(" id")
        || lower.ends_with("-id")
        || lower.contains("uuid")
        || (name.len() > 2 && (name.ends_with("Id") || name.ends_with("ID")))
}

/// Majority-vote type inference over the non-missing cells of a column.
pub fn infer_type(name: &str, cells: &[&Value]) -> ColumnType {
    let mut kinds: BTreeMap<ValueKind, usize> = BTreeMap::new();
    let mut distinct = BTreeSet::new();
    let mut text_len = 0usize;
    let mut present = 0usize;

    for v in cells {
        let kind = value::classify(v);
        if kind == ValueKind::Missing {
            continue;
        }
        present += 1;
        *kinds.entry(kind).or_insert(0) += 1;
        let c = value::canonical(v);
        text_len += c.len();
        distinct.insert(c);
    }

    if present == 0 {
        return ColumnType::Text;
    }

    let share = |n: usize| n as f64 / present as f64;
    let count = |k: ValueKind| kinds.get(&k).copied().unwrap_or(0);
    let all_unique = distinct.len() == present;

    if share(count(ValueKind::Boolean)) >= TYPE_MAJORITY {
        return ColumnType::Boolean;
    }
    if share(count(ValueKind::Integer)) >= TYPE_MAJORITY {
        if looks_like_identifier(name) && all_unique {
            return ColumnType::Identifier;
        }
        return ColumnType::Integer;
    }
    if share(count(ValueKind::Integer) + count(ValueKind::Float)) >= TYPE_MAJORITY {
        return ColumnType::Float;
    }
    if share(count(ValueKind::Datetime)) >= TYPE_MAJORITY {
        return ColumnType::Datetime;
    }

    if looks_like_identifier(name) && all_unique {
        return ColumnType::Identifier;
    }
    if text_len / present >= TEXT_MIN_AVG_LEN {
        return ColumnType::Text;
    }
    if distinct.len() <= CATEGORICAL_MAX_UNIQUE || share(distinct.len()) <= 0.5 {
        ColumnType::Categorical
    } else {
        ColumnType::Text
    }
}

/// A parsed table, immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

impl Dataset {
    /// Build a dataset from rows, inferring a descriptor per header.
    pub fn from_rows(name: impl Into<String>, headers: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        check_headers(&headers)?;
        for (i, row) in rows.iter().enumerate() {
            if let Some(unknown) = row.keys().find(|k| !headers.contains(k)) {
                return Err(TabularError::UnknownColumn {
                    row: i,
                    column: unknown.clone(),
                });
            }
        }

        let columns = headers
            .iter()
            .map(|h| ColumnDescriptor::infer(h, rows.iter().map(|r| cell(r, h))))
            .collect::<Vec<_>>();

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            row_count: rows.len(),
            column_count: columns.len(),
            columns,
            rows,
        })
    }

    /// Build a dataset from text records (e.g. CSV), one `Vec<String>` per row.
    pub fn from_records(
        name: impl Into<String>,
        headers: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<Self> {
        let mut rows = Vec::with_capacity(records.len());
        for (i, rec) in records.into_iter().enumerate() {
            if rec.len() != headers.len() {
                return Err(TabularError::RaggedRecord {
                    row: i,
                    expected: headers.len(),
                    found: rec.len(),
                });
            }
            let row: Row = headers
                .iter()
                .cloned()
                .zip(rec)
                .map(|(h, v)| {
                    let v = if v.trim().is_empty() { Value::Null } else { Value::String(v) };
                    (h, v)
                })
                .collect();
            rows.push(row);
        }
        Self::from_rows(name, headers, rows)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Cells of one column in row order; absent cells read as null.
    pub fn values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |r| cell(r, column))
    }

    pub fn sample_rows(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Identity of a row's content, hashed in column order.
    pub fn row_fingerprint(&self, row: &Row) -> Hash32 {
        let mut h = blake3::Hasher::new();
        for c in &self.columns {
            h.update(value::canonical(cell(row, &c.name)).as_bytes());
            h.update(&[0x1f]);
        }
        h.finalize().into()
    }

    /// BLAKE3 over every row fingerprint in order
    pub fn content_hash(&self) -> Hash32 {
        let mut h = blake3::Hasher::new();
        for c in &self.columns {
            h.update(c.name.as_bytes());
            h.update(&[0x1e]);
        }
        for row in &self.rows {
            h.update(&self.row_fingerprint(row));
        }
        h.finalize().into()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|(k, v)| k.len() + value::estimated_bytes(v))
            .sum()
    }
}

static NULL: Value = Value::Null;

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn check_headers(headers: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for h in headers {
        if h.trim().is_empty() {
            return Err(TabularError::EmptyColumnName);
        }
        if !seen.insert(h.as_str()) {
            return Err(TabularError::DuplicateColumn(h.clone()));
        }
    }
    Ok(())
}
