//! Tabular CSV input.
//!
//! A source CSV has one observation per row. Dataset-specific column names are
//! resolved through the dataset's column map before any row is read, so a
//! missing column fails the dataset up front instead of row by row.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::errors::PipelineError;
use crate::frame::Cell;
use crate::types::ColumnName;

/// One parsed CSV row keyed by header name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsvRow {
    /// 1-based position of the row in the file (header excluded).
    pub number: usize,
    /// Field values in header order.
    pub fields: IndexMap<ColumnName, Cell>,
}

impl CsvRow {
    /// Field value, or null when the header is absent.
    pub fn get(&self, column: &str) -> Cell {
        self.fields.get(column).cloned().unwrap_or_default()
    }

    /// Field value as text, whatever scalar type it was parsed as.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.fields.get(column)? {
            Cell::Null => None,
            Cell::Text(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A CSV file loaded into memory.
#[derive(Clone, Debug)]
pub struct CsvSource {
    path: PathBuf,
    headers: Vec<ColumnName>,
    rows: Vec<CsvRow>,
}

impl CsvSource {
    /// Read and type every row of `path`.
    ///
    /// Short rows read as null in their trailing columns. A row with more
    /// fields than the header fails with `MalformedRow`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;
        let headers: Vec<ColumnName> = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(PipelineError::MalformedRow {
                    path,
                    row: idx + 1,
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            let fields = headers
                .iter()
                .enumerate()
                .map(|(col, header)| {
                    let cell = record.get(col).map(Cell::parse_field).unwrap_or_default();
                    (header.clone(), cell)
                })
                .collect();
            rows.push(CsvRow {
                number: idx + 1,
                fields,
            });
        }
        Ok(Self {
            path,
            headers,
            rows,
        })
    }

    /// File this source was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header names in file order.
    pub fn headers(&self) -> &[ColumnName] {
        &self.headers
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the file has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(rows, columns)`, for log lines.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.headers.len())
    }

    /// Parsed rows in file order.
    pub fn rows(&self) -> &[CsvRow] {
        &self.rows
    }

    /// Fail with `MissingColumn` unless every column is present.
    pub fn require_columns<'a, I>(&self, columns: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for column in columns {
            if !self.headers.iter().any(|header| header == column) {
                return Err(PipelineError::MissingColumn {
                    path: self.path.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn open_types_fields_and_numbers_rows() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("Tg.csv");
        fs::write(&path, "smiles,Value,gas\n[*]CC[*],373.5,\n[*]CC([*])C,260,CO2\n").unwrap();

        let source = CsvSource::open(&path).unwrap();
        assert_eq!(source.shape(), (2, 3));
        assert_eq!(source.headers(), &["smiles", "Value", "gas"]);

        let first = &source.rows()[0];
        assert_eq!(first.number, 1);
        assert_eq!(first.get("Value"), Cell::Float(373.5));
        assert_eq!(first.get("gas"), Cell::Null);
        assert_eq!(first.text("smiles").as_deref(), Some("[*]CC[*]"));

        let second = &source.rows()[1];
        assert_eq!(second.get("Value"), Cell::Int(260));
        assert_eq!(second.text("Value").as_deref(), Some("260"));
        assert_eq!(second.get("missing"), Cell::Null);
    }

    #[test]
    fn require_columns_reports_the_missing_header() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("Dgas.csv");
        fs::write(&path, "smiles,value\nCC,1\n").unwrap();

        let source = CsvSource::open(&path).unwrap();
        source.require_columns(["smiles", "value"]).unwrap();
        let err = source.require_columns(["smiles", "gas"]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "gas"));
    }

    #[test]
    fn open_rejects_rows_longer_than_the_header() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("Dgas.csv");
        fs::write(&path, "smiles,value,gas\n[*]CC[*],0.4,N2\n[*]CC[*],0.5,CO,2\n").unwrap();

        let err = CsvSource::open(&path).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MalformedRow {
                row: 2,
                expected: 3,
                found: 4,
                ..
            }
        ));
        assert!(err.to_string().starts_with("row 2 of "));
    }

    #[test]
    fn open_pads_short_rows_with_null() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("Dgas.csv");
        fs::write(&path, "smiles,value,gas\n[*]CC[*],0.5\n").unwrap();

        let source = CsvSource::open(&path).unwrap();
        assert_eq!(source.rows()[0].get("value"), Cell::Float(0.5));
        assert_eq!(source.rows()[0].get("gas"), Cell::Null);
    }
}
