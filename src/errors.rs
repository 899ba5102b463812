use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ColumnName, RawSmiles, ShortName};

/// Error type for preparation, audit, and export failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not canonicalize '{smiles}': {reason}")]
    Canonicalization { smiles: RawSmiles, reason: String },
    #[error("could not fingerprint '{smiles}': {reason}")]
    Fingerprint { smiles: RawSmiles, reason: String },
    #[error("column '{column}' not found in {}", path.display())]
    MissingColumn { path: PathBuf, column: ColumnName },
    #[error("row {row} of {} has {found} fields but the header has {expected}", path.display())]
    MalformedRow {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("invalid column map: {0}")]
    InvalidColumnMap(String),
    #[error("field '{field}' is not part of the frame schema")]
    UnknownField { field: ColumnName },
    #[error("data quality violation: {0}")]
    DataQuality(String),
    #[error("property '{short_name}' lookup failed: {reason}")]
    PropertyLookup { short_name: ShortName, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Error type for the persisted polymer store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("polymer store is unavailable: {0}")]
    Unavailable(String),
    #[error("query on '{table}' failed: {reason}")]
    Query { table: String, reason: String },
    #[error("'{0}' is not a valid column identifier")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
}
