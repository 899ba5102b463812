//! Batch pipeline driver for the `prepare` command.
//!
//! For each dataset the driver reads the CSV, canonicalizes every structure,
//! routes the row to the existing- or new-polymer property batch, and stages
//! unseen polymers in a run-wide new-polymer frame. The new-polymer frame is
//! verified for uniqueness once every dataset has been processed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, info, trace, warn};

use crate::chem::{Canonicalizer, Fingerprinter};
use crate::config::{DatasetSpec, PipelineOptions, PrepareManifest, PropertyErrorPolicy};
use crate::constants::columns;
use crate::constants::outputs::{
    EXISTING_SUFFIX, NEW_POLYMER_LIST_FILE, NEW_PROPERTIES_FILE, NEW_SUFFIX, PREPARE_REPORT_FILE,
};
use crate::dedup::{
    Deduplicator, PropertyLookup, Resolution, new_polymer_frame, stage_new_polymer,
    verify_new_polymers,
};
use crate::errors::PipelineError;
use crate::frame::{Cell, Frame, ensure_parent_dir};
use crate::source::{CsvRow, CsvSource};
use crate::store::StoreContext;
use crate::types::{DatasetId, ShortName};

/// Column set of property rows whose polymer is already persisted.
pub const EXISTING_PROPERTY_COLUMNS: [&str; 6] = [
    columns::HP_ID,
    columns::PROP_ID,
    columns::VALUE,
    columns::CALCULATION_METHOD,
    columns::CONDITIONS,
    columns::NOTE,
];

/// Column set of property rows whose polymer is staged for creation.
pub const NEW_PROPERTY_COLUMNS: [&str; 7] = [
    columns::SMILES,
    columns::CANONICAL_SMILES,
    columns::PROP_ID,
    columns::VALUE,
    columns::CALCULATION_METHOD,
    columns::CONDITIONS,
    columns::NOTE,
];

/// Property batches produced from one dataset.
#[derive(Clone, Debug)]
pub struct DatasetBatches {
    /// Output stem of the dataset.
    pub dataset: DatasetId,
    /// Outcome of the property-type lookup.
    pub property: PropertyLookup,
    /// Property rows for polymers already in the store.
    pub existing_properties: Frame,
    /// Property rows for polymers staged in the new-polymer frame.
    pub new_properties: Frame,
    /// Rows read from the CSV.
    pub processed_rows: usize,
    /// Polymers this dataset added to the new-polymer frame.
    pub staged_polymers: usize,
}

impl DatasetBatches {
    /// `<stem>_existing_polymers.jsonl` under `dir`.
    pub fn existing_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.dataset, EXISTING_SUFFIX))
    }

    /// `<stem>_new_polymers.jsonl` under `dir`.
    pub fn new_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.dataset, NEW_SUFFIX))
    }

    /// Write both property batches under `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), PipelineError> {
        self.existing_properties.write_jsonl(&self.existing_path(dir))?;
        self.new_properties.write_jsonl(&self.new_path(dir))?;
        Ok(())
    }
}

/// Per-dataset counts recorded in the run report.
#[derive(Clone, Debug, Serialize)]
pub struct DatasetReport {
    /// Output stem of the dataset.
    pub dataset: DatasetId,
    /// Source CSV.
    pub csv: PathBuf,
    /// Property short name, if configured.
    pub short_name: Option<ShortName>,
    /// Property lookup outcome.
    pub property: PropertyLookup,
    /// Rows read from the CSV.
    pub processed_rows: usize,
    /// Rows routed to the existing-polymer batch.
    pub existing_properties: usize,
    /// Rows routed to the new-polymer batch.
    pub new_properties: usize,
    /// Polymers newly staged by this dataset.
    pub staged_polymers: usize,
}

/// Summary of a `prepare` run, written to `prepare_report.json`.
#[derive(Clone, Debug, Serialize)]
pub struct PrepareReport {
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time.
    pub finished_at: DateTime<Utc>,
    /// Whether lookups reached a store.
    pub store_connected: bool,
    /// Row cap per dataset, if any.
    pub row_limit: Option<usize>,
    /// Per-dataset counts, in processing order.
    pub datasets: Vec<DatasetReport>,
    /// Rows in `new_polymer_list.jsonl`.
    pub new_polymers: usize,
}

/// Drives datasets through canonicalization, deduplication, and batching.
pub struct Pipeline<'a> {
    context: &'a StoreContext,
    canonicalizer: &'a dyn Canonicalizer,
    fingerprinter: &'a dyn Fingerprinter,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    /// Create a driver over an explicit store context and chemistry collaborators.
    pub fn new(
        context: &'a StoreContext,
        canonicalizer: &'a dyn Canonicalizer,
        fingerprinter: &'a dyn Fingerprinter,
        options: PipelineOptions,
    ) -> Self {
        Self {
            context,
            canonicalizer,
            fingerprinter,
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run every dataset of `manifest` and write all outputs.
    ///
    /// Fails with `DataQuality` when the new-polymer list is not unique; the
    /// per-dataset property files written before that point stay on disk.
    pub fn prepare(&self, manifest: &PrepareManifest) -> Result<PrepareReport, PipelineError> {
        let started_at = Utc::now();
        let output_dir = &self.options.output_dir;

        property_catalogue(manifest)?.write_jsonl(&output_dir.join(NEW_PROPERTIES_FILE))?;

        let mut new_polymers = new_polymer_frame();
        let mut datasets = Vec::with_capacity(manifest.datasets.len());
        for spec in &manifest.datasets {
            let batches = self.prepare_dataset(spec, &mut new_polymers)?;
            batches.write(output_dir)?;
            datasets.push(DatasetReport {
                dataset: batches.dataset.clone(),
                csv: spec.csv_path(&self.options.data_dir),
                short_name: spec.short_name.clone(),
                property: batches.property.clone(),
                processed_rows: batches.processed_rows,
                existing_properties: batches.existing_properties.len(),
                new_properties: batches.new_properties.len(),
                staged_polymers: batches.staged_polymers,
            });
        }

        if let Err(err) = verify_new_polymers(&new_polymers) {
            error!(error = %err, "new polymer list failed uniqueness check");
            return Err(err);
        }
        new_polymers.write_jsonl(&output_dir.join(NEW_POLYMER_LIST_FILE))?;
        info!(count = new_polymers.len(), "new polymer list saved");

        let report = PrepareReport {
            started_at,
            finished_at: Utc::now(),
            store_connected: self.context.is_connected(),
            row_limit: self.options.row_limit,
            datasets,
            new_polymers: new_polymers.len(),
        };
        write_report(&report, &output_dir.join(PREPARE_REPORT_FILE))?;
        Ok(report)
    }

    /// Process one dataset, staging unseen polymers into `new_polymers`.
    pub fn prepare_dataset(
        &self,
        spec: &DatasetSpec,
        new_polymers: &mut Frame,
    ) -> Result<DatasetBatches, PipelineError> {
        let smiles_column = spec.smiles_column()?;
        let value_column = spec.value_column()?;
        let csv_path = spec.csv_path(&self.options.data_dir);
        let source = CsvSource::open(&csv_path)?;
        source.require_columns(spec.required_columns()?)?;
        let (rows, cols) = source.shape();
        info!(csv = %csv_path.display(), rows, cols, "read dataset");

        let dedup = Deduplicator::new(self.context);
        let property = self.resolve_property(&dedup, spec)?;
        let prop_id = Cell::from(property.prop_id());

        let mut existing_properties = Frame::with_columns(EXISTING_PROPERTY_COLUMNS);
        let mut new_properties = Frame::with_columns(NEW_PROPERTY_COLUMNS);
        let mut processed_rows = 0usize;
        let mut staged_polymers = 0usize;

        for row in source.rows() {
            let raw = row
                .text(smiles_column)
                .ok_or_else(|| PipelineError::Canonicalization {
                    smiles: String::new(),
                    reason: format!("row {} has an empty '{}' field", row.number, smiles_column),
                })?;
            let canonical = self.canonicalizer.canonicalize(&raw)?;
            trace!(row = row.number, smiles = %raw, canonical = %canonical, "row");

            let value = row.get(value_column);
            let conditions = conditions_document(spec, row)?;
            let criteria = Deduplicator::criteria_for(&spec.selection, &raw, &canonical, row);

            match dedup.resolve(&criteria)? {
                Resolution::Existing { hp_id } => {
                    existing_properties.add([
                        (columns::HP_ID, Cell::Int(hp_id)),
                        (columns::PROP_ID, prop_id.clone()),
                        (columns::VALUE, value),
                        (columns::CALCULATION_METHOD, Cell::from(&spec.calculation_method)),
                        (columns::CONDITIONS, Cell::from(conditions)),
                        (columns::NOTE, Cell::from(&spec.note)),
                    ])?;
                }
                Resolution::New => {
                    if stage_new_polymer(
                        new_polymers,
                        self.fingerprinter,
                        &raw,
                        &canonical,
                        &spec.category,
                    )? {
                        staged_polymers += 1;
                    }
                    // Both forms are kept so the row can be joined once the
                    // polymer has been inserted.
                    new_properties.add([
                        (columns::SMILES, Cell::from(&raw)),
                        (columns::CANONICAL_SMILES, Cell::from(&canonical)),
                        (columns::PROP_ID, prop_id.clone()),
                        (columns::VALUE, value),
                        (columns::CALCULATION_METHOD, Cell::from(&spec.calculation_method)),
                        (columns::CONDITIONS, Cell::from(conditions)),
                        (columns::NOTE, Cell::from(&spec.note)),
                    ])?;
                }
            }

            processed_rows += 1;
            if self.options.limit_reached(processed_rows) {
                break;
            }
        }

        info!(
            dataset = %spec.output_stem,
            processed_rows,
            existing = existing_properties.len(),
            new = new_properties.len(),
            staged_polymers,
            "processed dataset"
        );
        Ok(DatasetBatches {
            dataset: spec.output_stem.clone(),
            property,
            existing_properties,
            new_properties,
            processed_rows,
            staged_polymers,
        })
    }

    fn resolve_property(
        &self,
        dedup: &Deduplicator<'_>,
        spec: &DatasetSpec,
    ) -> Result<PropertyLookup, PipelineError> {
        let lookup = dedup.property_id(spec.short_name.as_deref());
        let short_name = spec.short_name.as_deref().unwrap_or("-");
        match &lookup {
            PropertyLookup::Found(prop_id) => {
                info!(short_name, prop_id, "property ID resolved");
            }
            PropertyLookup::NotFound => {
                info!(short_name, "property not in DB; prop_id left empty");
            }
            PropertyLookup::LookupError(reason) => match self.options.on_property_lookup_error {
                PropertyErrorPolicy::Degrade => {
                    warn!(
                        short_name,
                        reason = %reason,
                        "PROPERTY LOOKUP FAILED; every row of this dataset gets a null prop_id"
                    );
                }
                PropertyErrorPolicy::Abort => {
                    error!(short_name, reason = %reason, "property lookup failed; aborting dataset");
                    return Err(PipelineError::PropertyLookup {
                        short_name: short_name.to_string(),
                        reason: reason.clone(),
                    });
                }
            },
        }
        Ok(lookup)
    }
}

/// Conditions document for one row: configured keys in order, values from the CSV.
fn conditions_document(spec: &DatasetSpec, row: &CsvRow) -> Result<String, PipelineError> {
    let conditions: IndexMap<&str, Cell> = spec
        .conditions_map
        .iter()
        .map(|(key, column)| (key.as_str(), row.get(column)))
        .collect();
    Ok(serde_json::to_string(&conditions)?)
}

/// Property-type catalogue frame from the manifest definitions.
pub fn property_catalogue(manifest: &PrepareManifest) -> Result<Frame, PipelineError> {
    let mut catalogue = Frame::with_columns([
        columns::NAME,
        columns::SHORT_NAME,
        "unit",
        "plot_symbol",
    ]);
    for property in &manifest.properties {
        catalogue.add([
            (columns::NAME, Cell::from(&property.name)),
            (columns::SHORT_NAME, Cell::from(&property.short_name)),
            ("unit", Cell::from(&property.unit)),
            ("plot_symbol", Cell::from(property.plot_symbol.clone())),
        ])?;
    }
    Ok(catalogue)
}

fn write_report(report: &PrepareReport, path: &Path) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
