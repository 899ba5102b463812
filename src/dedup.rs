//! Routing of rows between "known polymer" and "new polymer" batches.
//!
//! Two guards apply. The persisted store is asked whether a structure is
//! already committed, and the in-memory new-polymer frame is asked whether the
//! structure was already staged earlier in this run. Neither guard protects
//! against a concurrent writer committing the same structure meanwhile.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chem::Fingerprinter;
use crate::config::SelectionSource;
use crate::constants::columns;
use crate::errors::PipelineError;
use crate::frame::{Cell, Frame};
use crate::source::CsvRow;
use crate::store::{Criteria, StoreContext, Table};
use crate::types::{ColumnName, HpId, PropId};

/// Outcome of looking a structure up in the persisted store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Already persisted under this key.
    Existing {
        /// Persisted homopolymer key.
        hp_id: HpId,
    },
    /// Not persisted (or no store is connected).
    New,
}

/// Outcome of a property-type lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PropertyLookup {
    /// The property exists under this key.
    Found(PropId),
    /// No property with that short name, or no short name configured.
    NotFound,
    /// The lookup itself failed.
    LookupError(String),
}

impl PropertyLookup {
    /// Property key to attach to rows; null unless found.
    pub fn prop_id(&self) -> Option<PropId> {
        match self {
            PropertyLookup::Found(id) => Some(*id),
            _ => None,
        }
    }
}

/// Store-backed deduplication over an explicit connection context.
pub struct Deduplicator<'a> {
    context: &'a StoreContext,
}

impl<'a> Deduplicator<'a> {
    /// Wrap a connection context.
    pub fn new(context: &'a StoreContext) -> Self {
        Self { context }
    }

    /// Exact-match criteria for one row from a dataset selection map.
    pub fn criteria_for(
        selection: &IndexMap<ColumnName, SelectionSource>,
        raw: &str,
        canonical: &str,
        row: &CsvRow,
    ) -> Criteria {
        selection
            .iter()
            .map(|(column, source)| {
                let value = match source {
                    SelectionSource::Canonical => Cell::from(canonical),
                    SelectionSource::Smiles => Cell::from(raw),
                    SelectionSource::Column(csv_column) => row.get(csv_column),
                };
                (column.clone(), value)
            })
            .collect()
    }

    /// Look up a persisted polymer by `criteria`.
    ///
    /// An offline context resolves everything as new. Store errors propagate.
    pub fn resolve(&self, criteria: &Criteria) -> Result<Resolution, PipelineError> {
        let Some(store) = self.context.store() else {
            return Ok(Resolution::New);
        };
        match store.get_one(Table::Homopolymer, criteria)? {
            Some(row) => {
                let hp_id = Table::Homopolymer.row_id(&row).ok_or_else(|| {
                    PipelineError::DataQuality(format!(
                        "persisted homopolymer matching {criteria:?} has no hp_id"
                    ))
                })?;
                debug!(hp_id, "polymer found in DB");
                Ok(Resolution::Existing { hp_id })
            }
            None => Ok(Resolution::New),
        }
    }

    /// Look up a property type by short name, keeping "absent" and "failed" apart.
    pub fn property_id(&self, short_name: Option<&str>) -> PropertyLookup {
        let Some(short_name) = short_name else {
            return PropertyLookup::NotFound;
        };
        let Some(store) = self.context.store() else {
            return PropertyLookup::LookupError("no store connected".to_string());
        };
        let mut criteria = Criteria::new();
        criteria.insert(columns::SHORT_NAME.to_string(), Cell::from(short_name));
        match store.get_one(Table::Property, &criteria) {
            Ok(Some(row)) => match Table::Property.row_id(&row) {
                Some(id) => PropertyLookup::Found(id),
                None => PropertyLookup::LookupError(format!(
                    "property '{short_name}' row has no prop_id"
                )),
            },
            Ok(None) => PropertyLookup::NotFound,
            Err(err) => {
                warn!(short_name, error = %err, "property lookup failed");
                PropertyLookup::LookupError(err.to_string())
            }
        }
    }
}

/// Stage a polymer in the new-polymer frame unless this canonical form is
/// already staged. The fingerprint is only computed for staged rows.
///
/// Returns true when a row was added.
pub fn stage_new_polymer(
    polymers: &mut Frame,
    fingerprinter: &dyn Fingerprinter,
    raw: &str,
    canonical: &str,
    category: &str,
) -> Result<bool, PipelineError> {
    if polymers.contains(columns::CANONICAL_SMILES, canonical) {
        return Ok(false);
    }
    info!(smiles = raw, "new homopolymer");
    let fingerprint = fingerprinter.fingerprint(canonical)?;
    polymers.add([
        (columns::PID, Cell::Null),
        (columns::RID, Cell::Null),
        (columns::SMILES, Cell::from(raw)),
        (columns::CANONICAL_SMILES, Cell::from(canonical)),
        (columns::PG_FINGERPRINT, Cell::from(fingerprint.encoded()?)),
        (columns::PG_FINGERPRINT_VERSION, Cell::from(fingerprint.version)),
        (columns::CATEGORY, Cell::from(category)),
    ])?;
    Ok(true)
}

/// Column set of the new-polymer frame.
pub const NEW_POLYMER_COLUMNS: [&str; 7] = [
    columns::PID,
    columns::RID,
    columns::SMILES,
    columns::CANONICAL_SMILES,
    columns::PG_FINGERPRINT,
    columns::PG_FINGERPRINT_VERSION,
    columns::CATEGORY,
];

/// Strict frame for new polymers.
pub fn new_polymer_frame() -> Frame {
    Frame::with_columns(NEW_POLYMER_COLUMNS)
}

/// Fail with `DataQuality` unless every staged polymer has a distinct raw and
/// canonical SMILES.
pub fn verify_new_polymers(polymers: &Frame) -> Result<(), PipelineError> {
    let count = polymers.len();
    let unique_smiles = polymers.unique_count(columns::SMILES);
    let unique_canonical = polymers.unique_count(columns::CANONICAL_SMILES);
    if count != unique_smiles {
        return Err(PipelineError::DataQuality(format!(
            "unique smiles ({unique_smiles}) and total polymer count ({count}) mismatch"
        )));
    }
    if count != unique_canonical {
        return Err(PipelineError::DataQuality(format!(
            "unique canonical smiles ({unique_canonical}) and total polymer count ({count}) mismatch"
        )));
    }
    Ok(())
}
