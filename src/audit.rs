//! Idempotence audit of the canonicalizer, run by the `check` command.
//!
//! Each observed structure is canonicalized twice. A healthy canonicalizer
//! returns the same string both times; anything else is a counterexample and
//! lands in `list_not_idempotent.csv`. Nothing here touches the store.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chem::Canonicalizer;
use crate::config::{DatasetSpec, PipelineOptions};
use crate::constants::columns;
use crate::constants::outputs::{IDEMPOTENT_FILE, NOT_IDEMPOTENT_FILE};
use crate::errors::PipelineError;
use crate::frame::{Cell, Frame};
use crate::source::CsvSource;
use crate::types::RawSmiles;

/// Column set of both audit frames.
pub const AUDIT_COLUMNS: [&str; 4] = [
    columns::SMILES,
    columns::CANONICAL,
    columns::CANONICAL2,
    columns::IDEMPOTENT,
];

/// Counts accumulated by an auditor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Distinct raw structures checked.
    pub checked: usize,
    /// Structures whose second canonicalization differed from the first.
    pub not_idempotent: usize,
}

/// Result of one double canonicalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotenceCheck {
    /// Input structure.
    pub smiles: RawSmiles,
    /// First canonical form.
    pub canonical: String,
    /// Canonical form of the first canonical form.
    pub canonical2: String,
}

impl IdempotenceCheck {
    /// Run both passes over `raw`.
    pub fn run(canonicalizer: &dyn Canonicalizer, raw: &str) -> Result<Self, PipelineError> {
        let canonical = canonicalizer.canonicalize(raw)?;
        let canonical2 = canonicalizer.canonicalize(&canonical)?;
        Ok(Self {
            smiles: raw.to_string(),
            canonical,
            canonical2,
        })
    }

    /// True when both passes agree.
    pub fn is_idempotent(&self) -> bool {
        self.canonical == self.canonical2
    }

    fn record(&self) -> [(&'static str, Cell); 4] {
        [
            (columns::SMILES, Cell::from(&self.smiles)),
            (columns::CANONICAL, Cell::from(&self.canonical)),
            (columns::CANONICAL2, Cell::from(&self.canonical2)),
            (columns::IDEMPOTENT, Cell::Bool(self.is_idempotent())),
        ]
    }
}

/// Accumulates all-checked and not-idempotent records across datasets.
pub struct IdempotenceAuditor<'a> {
    canonicalizer: &'a dyn Canonicalizer,
    options: PipelineOptions,
    checked: Frame,
    not_idempotent: Frame,
}

impl<'a> IdempotenceAuditor<'a> {
    /// Empty auditor.
    pub fn new(canonicalizer: &'a dyn Canonicalizer, options: PipelineOptions) -> Self {
        Self {
            canonicalizer,
            options,
            checked: Frame::with_columns(AUDIT_COLUMNS),
            not_idempotent: Frame::with_columns(AUDIT_COLUMNS),
        }
    }

    /// Check one raw structure. Repeated inputs are only recorded once.
    pub fn observe(&mut self, raw: &str) -> Result<bool, PipelineError> {
        let check = IdempotenceCheck::run(self.canonicalizer, raw)?;
        let idempotent = check.is_idempotent();
        if !self.checked.contains(columns::SMILES, raw) {
            self.checked.add(check.record())?;
            if !idempotent {
                warn!(
                    smiles = raw,
                    canonical = %check.canonical,
                    canonical2 = %check.canonical2,
                    "canonicalization is not idempotent"
                );
                self.not_idempotent.add(check.record())?;
            }
        }
        Ok(idempotent)
    }

    /// Check every structure of a dataset, honoring the row limit.
    pub fn audit_dataset(&mut self, spec: &DatasetSpec) -> Result<AuditReport, PipelineError> {
        let smiles_column = spec.smiles_column()?;
        let csv_path = spec.csv_path(&self.options.data_dir);
        let source = CsvSource::open(&csv_path)?;
        source.require_columns([smiles_column])?;
        let (rows, cols) = source.shape();
        info!(csv = %csv_path.display(), rows, cols, "read dataset");

        let before = self.report();
        let mut processed = 0usize;
        for row in source.rows() {
            if let Some(raw) = row.text(smiles_column) {
                self.observe(&raw)?;
            } else {
                debug!(row = row.number, "empty structure field skipped");
            }
            processed += 1;
            if self.options.limit_reached(processed) {
                break;
            }
        }

        let after = self.report();
        let delta = AuditReport {
            checked: after.checked - before.checked,
            not_idempotent: after.not_idempotent - before.not_idempotent,
        };
        info!(
            dataset = %spec.output_stem,
            checked = delta.checked,
            not_idempotent = delta.not_idempotent,
            "audited dataset"
        );
        Ok(delta)
    }

    /// Running totals.
    pub fn report(&self) -> AuditReport {
        AuditReport {
            checked: self.checked.len(),
            not_idempotent: self.not_idempotent.len(),
        }
    }

    /// All checked records.
    pub fn checked(&self) -> &Frame {
        &self.checked
    }

    /// Counterexamples only.
    pub fn not_idempotent(&self) -> &Frame {
        &self.not_idempotent
    }

    /// Write `idempotent.csv` and `list_not_idempotent.csv` under `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), PipelineError> {
        self.checked.write_csv(&dir.join(IDEMPOTENT_FILE))?;
        self.not_idempotent.write_csv(&dir.join(NOT_IDEMPOTENT_FILE))?;
        Ok(())
    }
}

/// Re-run the double canonicalization over a previously written
/// counterexample list, returning each structure with its current verdict.
pub fn recheck_file(
    canonicalizer: &dyn Canonicalizer,
    path: &Path,
) -> Result<Vec<(RawSmiles, bool)>, PipelineError> {
    let source = CsvSource::open(path)?;
    source.require_columns([columns::SMILES])?;
    let mut verdicts = Vec::with_capacity(source.len());
    for row in source.rows() {
        let Some(raw) = row.text(columns::SMILES) else {
            continue;
        };
        let check = IdempotenceCheck::run(canonicalizer, &raw)?;
        info!(smiles = %raw, idempotent = check.is_idempotent(), "recheck");
        verdicts.push((raw, check.is_idempotent()));
    }
    Ok(verdicts)
}
