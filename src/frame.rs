//! Column-oriented record accumulator used for every output batch.
//!
//! A `Frame` collects records one at a time and materializes them as rows
//! (JSON lines or CSV). Columns are kept equal-length after every `add`, so
//! materialization never sees ragged columns from normal use. `pad_columns`
//! remains available for frames assembled from external column data.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::errors::PipelineError;
use crate::types::ColumnName;

/// A single scalar value stored in a frame column.
///
/// `Null` is the padding sentinel and serializes as JSON `null`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Cell {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// True for the null sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Borrow the text payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Parse a raw CSV field the way a spreadsheet reader would:
    /// empty → null, integers, then floats, otherwise text.
    pub fn parse_field(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Cell::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Cell::Float(value);
        }
        match trimmed {
            "true" | "True" | "TRUE" => Cell::Bool(true),
            "false" | "False" | "FALSE" => Cell::Bool(false),
            _ => Cell::Text(raw.to_string()),
        }
    }

    /// Type-tagged key used for distinct-value counting.
    fn distinct_key(&self) -> String {
        match self {
            Cell::Null => "n:".to_string(),
            Cell::Bool(value) => format!("b:{value}"),
            Cell::Int(value) => format!("i:{value}"),
            Cell::Float(value) => format!("f:{}", value.to_bits()),
            Cell::Text(value) => format!("s:{value}"),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Float(value) => write!(f, "{value}"),
            Cell::Text(value) => f.write_str(value),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(value) => serializer.serialize_bool(*value),
            Cell::Int(value) => serializer.serialize_i64(*value),
            Cell::Float(value) if value.is_finite() => serializer.serialize_f64(*value),
            Cell::Float(_) => serializer.serialize_none(),
            Cell::Text(value) => serializer.serialize_str(value),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<&String> for Cell {
    fn from(value: &String) -> Self {
        Cell::Text(value.clone())
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// How a frame treats fields that are not yet columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSchema {
    /// Unknown fields widen the column set; earlier rows are back-filled with nulls.
    Dynamic,
    /// Unknown fields are rejected with `PipelineError::UnknownField`.
    Strict,
}

/// One materialized row, keyed by column name in column order.
pub type FrameRow = IndexMap<ColumnName, Cell>;

/// Append-only, column-oriented record builder.
#[derive(Clone, Debug)]
pub struct Frame {
    columns: IndexMap<ColumnName, Vec<Cell>>,
    schema: FrameSchema,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Create a frame whose columns are inferred from the first `add`.
    pub fn new() -> Self {
        Self {
            columns: IndexMap::new(),
            schema: FrameSchema::Dynamic,
        }
    }

    /// Create a frame with a fixed, declared column set.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnName>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|name| (name.into(), Vec::new()))
                .collect(),
            schema: FrameSchema::Strict,
        }
    }

    /// Wrap existing column data as a strict frame. Columns may be ragged;
    /// call `pad_columns` to square them up.
    pub fn from_columns(columns: IndexMap<ColumnName, Vec<Cell>>) -> Self {
        Self {
            columns,
            schema: FrameSchema::Strict,
        }
    }

    /// Schema policy of this frame.
    pub fn schema(&self) -> FrameSchema {
        self.schema
    }

    /// True if `value` already appears in `column`. False for unknown columns.
    pub fn contains(&self, column: &str, value: impl Into<Cell>) -> bool {
        let value = value.into();
        self.columns
            .get(column)
            .is_some_and(|cells| cells.contains(&value))
    }

    /// Append one record.
    ///
    /// Declared columns missing from `fields` get a null for this row. Fields
    /// outside the column set widen a dynamic frame and are rejected by a
    /// strict one; nothing is appended when a strict add fails.
    pub fn add<I, K, V>(&mut self, fields: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ColumnName>,
        V: Into<Cell>,
    {
        let fields: Vec<(ColumnName, Cell)> = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        self.pad_columns();
        let row = self.len();

        match self.schema {
            FrameSchema::Strict => {
                if let Some((field, _)) = fields
                    .iter()
                    .find(|(field, _)| !self.columns.contains_key(field))
                {
                    return Err(PipelineError::UnknownField {
                        field: field.clone(),
                    });
                }
            }
            FrameSchema::Dynamic => {
                for (field, _) in &fields {
                    if !self.columns.contains_key(field) {
                        self.columns.insert(field.clone(), vec![Cell::Null; row]);
                    }
                }
            }
        }

        for (field, value) in fields {
            if let Some(cells) = self.columns.get_mut(&field) {
                // A repeated key in one call overwrites the earlier value.
                if cells.len() > row {
                    cells[row] = value;
                } else {
                    cells.push(value);
                }
            }
        }
        self.pad_columns();
        Ok(())
    }

    /// Right-pad every column with nulls to the longest column length.
    pub fn pad_columns(&mut self) {
        let max_len = self.columns.values().map(Vec::len).max().unwrap_or(0);
        for cells in self.columns.values_mut() {
            cells.resize(max_len, Cell::Null);
        }
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Borrow one column's values.
    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Number of records (longest column length).
    pub fn len(&self) -> usize {
        self.columns.values().map(Vec::len).max().unwrap_or(0)
    }

    /// True when no record has been added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct values in `column` (0 for unknown columns).
    pub fn unique_count(&self, column: &str) -> usize {
        self.columns
            .get(column)
            .map(|cells| {
                cells
                    .iter()
                    .map(Cell::distinct_key)
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0)
    }

    /// Reassemble records row by row. Short columns read as null.
    pub fn rows(&self) -> Vec<FrameRow> {
        (0..self.len())
            .map(|idx| {
                self.columns
                    .iter()
                    .map(|(name, cells)| (name.clone(), cells.get(idx).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }

    /// Write one JSON object per line.
    pub fn write_jsonl(&self, path: &Path) -> Result<(), PipelineError> {
        ensure_parent_dir(path)?;
        let mut writer = BufWriter::new(File::create(path)?);
        for row in self.rows() {
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write a header row followed by one CSV row per record.
    pub fn write_csv(&self, path: &Path) -> Result<(), PipelineError> {
        ensure_parent_dir(path)?;
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.columns())?;
        for row in self.rows() {
            writer.write_record(row.values().map(ToString::to_string))?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_add_declares_columns_in_order() {
        let mut frame = Frame::new();
        frame
            .add([("smiles", Cell::from("CC")), ("value", Cell::from(1.5))])
            .unwrap();
        assert_eq!(frame.columns().collect::<Vec<_>>(), vec!["smiles", "value"]);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.schema(), FrameSchema::Dynamic);
    }

    #[test]
    fn contains_is_false_for_undeclared_column() {
        let mut frame = Frame::new();
        frame.add([("smiles", "CC")]).unwrap();
        assert!(frame.contains("smiles", "CC"));
        assert!(!frame.contains("smiles", "CCC"));
        assert!(!frame.contains("canonical_smiles", "CC"));
    }

    #[test]
    fn pad_columns_squares_ragged_columns_with_nulls() {
        let mut columns = IndexMap::new();
        columns.insert(
            "a".to_string(),
            vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)],
        );
        columns.insert("b".to_string(), vec![Cell::Int(10)]);
        columns.insert("c".to_string(), vec![Cell::Int(20), Cell::Int(21)]);
        let mut frame = Frame::from_columns(columns);

        frame.pad_columns();

        for name in ["a", "b", "c"] {
            assert_eq!(frame.column(name).unwrap().len(), 3, "column {name}");
        }
        assert_eq!(
            frame.column("b").unwrap(),
            &[Cell::Int(10), Cell::Null, Cell::Null]
        );
        assert_eq!(
            frame.column("c").unwrap(),
            &[Cell::Int(20), Cell::Int(21), Cell::Null]
        );
        assert_eq!(frame.column("a").unwrap()[2], Cell::Int(3));

        frame.pad_columns();
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn strict_frame_rejects_unknown_fields_without_appending() {
        let mut frame = Frame::with_columns(["smiles", "value"]);
        frame.add([("smiles", "CC")]).unwrap();

        let err = frame
            .add([("smiles", Cell::from("CCC")), ("unit", Cell::from("K"))])
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownField { ref field } if field == "unit"));
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.column("value").unwrap(), &[Cell::Null]);
    }

    #[test]
    fn dynamic_frame_widens_and_backfills_prior_rows() {
        let mut frame = Frame::new();
        frame.add([("polymer", "pe")]).unwrap();
        frame.add([("polymer", "pp")]).unwrap();
        frame
            .add([("polymer", Cell::from("ps")), ("alias", Cell::from("styrene"))])
            .unwrap();

        assert_eq!(
            frame.column("alias").unwrap(),
            &[Cell::Null, Cell::Null, Cell::from("styrene")]
        );
        let rows = frame.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["alias"], Cell::Null);
        assert_eq!(rows[2]["polymer"], Cell::from("ps"));
    }

    #[test]
    fn unique_count_distinguishes_types() {
        let mut frame = Frame::new();
        frame.add([("v", Cell::Int(1))]).unwrap();
        frame.add([("v", Cell::Float(1.0))]).unwrap();
        frame.add([("v", Cell::Int(1))]).unwrap();
        assert_eq!(frame.unique_count("v"), 2);
        assert_eq!(frame.unique_count("missing"), 0);
    }

    #[test]
    fn parse_field_infers_scalar_types() {
        assert_eq!(Cell::parse_field(""), Cell::Null);
        assert_eq!(Cell::parse_field(" 42 "), Cell::Int(42));
        assert_eq!(Cell::parse_field("3.5e-6"), Cell::Float(3.5e-6));
        assert_eq!(Cell::parse_field("True"), Cell::Bool(true));
        assert_eq!(Cell::parse_field("[*]CC[*]"), Cell::from("[*]CC[*]"));
    }

    #[test]
    fn jsonl_output_is_one_object_per_row_with_nulls() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("rows.jsonl");
        let mut frame = Frame::new();
        frame
            .add([("hp_id", Cell::Int(7)), ("prop_id", Cell::Null)])
            .unwrap();
        frame
            .add([("hp_id", Cell::Int(8)), ("prop_id", Cell::Float(f64::NAN))])
            .unwrap();
        frame.write_jsonl(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            r#"{"hp_id":7,"prop_id":null}"#,
            r#"{"hp_id":8,"prop_id":null}"#,
        ]);
    }

    #[test]
    fn csv_output_has_header_and_empty_nulls() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("rows.csv");
        let mut frame = Frame::new();
        frame
            .add([("smiles", Cell::from("CC")), ("idempotent", Cell::Bool(true))])
            .unwrap();
        frame.add([("smiles", "C,C")]).unwrap();
        frame.write_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "smiles,idempotent\nCC,true\n\"C,C\",\n");
    }
}
