//! Tabular dataset model shared by the analysis stages.

mod csv_source;
mod schema;
pub mod value;

pub use csv_source::{read_csv, read_csv_from};
pub use schema::{
    infer_type, looks_like_identifier, ColumnDescriptor, ColumnType, Dataset, Hash32, Row,
    CATEGORICAL_MAX_UNIQUE, SAMPLE_SIZE,
};
pub use value::ValueKind;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TabularError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Column name must not be empty")]
    EmptyColumnName,

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Row {row} references unknown column '{column}'")]
    UnknownColumn { row: usize, column: String },

    #[error("Row {row} has {found} fields, expected {expected}")]
    RaggedRecord {
        row: usize,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, TabularError>;
