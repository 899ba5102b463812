use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::env::{
    DB_HOST, DB_NAME, DB_PASSWORD, DB_PATH, DB_PORT, DB_USER, DEFAULT_DB_PORT,
};
use crate::constants::pipeline::{
    COLUMN_MAP_SMILES, COLUMN_MAP_VALUE, DEBUG_ROW_LIMIT, DEFAULT_CALCULATION_METHOD,
    DEFAULT_CATEGORY,
};
use crate::errors::PipelineError;
use crate::types::{ColumnName, DatasetId, ShortName};

/// Connection target of the persisted store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSettings {
    /// SQLite database file holding the polymer tables.
    Sqlite {
        /// Database file.
        db_path: PathBuf,
    },
    /// PostgreSQL server holding the polymer tables.
    Postgres(PostgresSettings),
}

impl StoreSettings {
    /// SQLite target at `db_path`.
    pub fn sqlite(db_path: impl Into<PathBuf>) -> Self {
        Self::Sqlite {
            db_path: db_path.into(),
        }
    }

    /// Read settings from the process environment.
    ///
    /// Returns `Ok(None)` when neither `DB_PATH` nor `DB_HOST` is set, which
    /// disables store access for the run.
    pub fn from_env() -> Result<Option<Self>, PipelineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// `DB_PATH` selects SQLite. Otherwise `DB_HOST` selects PostgreSQL, which
    /// then also needs `DB_USER` and `DB_NAME`.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, PipelineError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(db_path) = var(DB_PATH) {
            return Ok(Some(Self::sqlite(db_path)));
        }
        let Some(host) = var(DB_HOST) else {
            return Ok(None);
        };
        let port = match var(DB_PORT) {
            None => DEFAULT_DB_PORT,
            Some(port) => port.parse().map_err(|_| {
                PipelineError::Configuration(format!("{DB_PORT} is not a port number: {port:?}"))
            })?,
        };
        let require = |key: &str| {
            var(key).ok_or_else(|| {
                PipelineError::Configuration(format!("{DB_HOST} is set but {key} is missing"))
            })
        };
        Ok(Some(Self::Postgres(PostgresSettings {
            host,
            port,
            user: require(DB_USER)?,
            password: lookup(DB_PASSWORD).filter(|password| !password.is_empty()),
            dbname: require(DB_NAME)?,
        })))
    }
}

impl fmt::Display for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite { db_path } => write!(f, "sqlite:{}", db_path.display()),
            Self::Postgres(settings) => write!(
                f,
                "postgres://{}@{}:{}/{}",
                settings.user, settings.host, settings.port, settings.dbname
            ),
        }
    }
}

/// PostgreSQL connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password, if the server asks for one.
    pub password: Option<String>,
    /// Database holding the polymer tables.
    pub dbname: String,
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// Where a store lookup criterion takes its value from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// The row's canonical SMILES.
    Canonical,
    /// The row's raw SMILES.
    Smiles,
    /// Another CSV column of the row.
    Column(ColumnName),
}

/// One property-type definition for the property catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Human-readable property name.
    pub name: String,
    /// Short name used as lookup key.
    pub short_name: ShortName,
    /// Unit string.
    pub unit: String,
    /// Plot symbol (LaTeX).
    #[serde(default)]
    pub plot_symbol: Option<String>,
}

/// Configuration of one source dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// CSV path, relative to the data directory unless absolute.
    pub csv: PathBuf,
    /// Short name of the property type in the store, if any.
    #[serde(default)]
    pub short_name: Option<ShortName>,
    /// Prefix for this dataset's output files.
    pub output_stem: DatasetId,
    /// Map of `smiles` / `value` to the CSV column holding them.
    pub column_map: IndexMap<String, ColumnName>,
    /// Map of condition key to the CSV column folded into the conditions document.
    #[serde(default)]
    pub conditions_map: IndexMap<String, ColumnName>,
    /// Store columns used to find an existing polymer, and where each value comes from.
    #[serde(default = "default_selection")]
    pub selection: IndexMap<ColumnName, SelectionSource>,
    /// Free-text note attached to every property row.
    #[serde(default)]
    pub note: String,
    /// Calculation method tag attached to every property row.
    #[serde(default = "default_calculation_method")]
    pub calculation_method: String,
    /// Category assigned to polymers staged from this dataset.
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_selection() -> IndexMap<ColumnName, SelectionSource> {
    let mut selection = IndexMap::new();
    selection.insert("canonical_smiles".to_string(), SelectionSource::Canonical);
    selection
}

fn default_calculation_method() -> String {
    DEFAULT_CALCULATION_METHOD.to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl DatasetSpec {
    /// Dataset with the default selection, method, and category.
    pub fn new(
        csv: impl Into<PathBuf>,
        output_stem: impl Into<DatasetId>,
        smiles_column: impl Into<ColumnName>,
        value_column: impl Into<ColumnName>,
    ) -> Self {
        let mut column_map = IndexMap::new();
        column_map.insert(COLUMN_MAP_SMILES.to_string(), smiles_column.into());
        column_map.insert(COLUMN_MAP_VALUE.to_string(), value_column.into());
        Self {
            csv: csv.into(),
            short_name: None,
            output_stem: output_stem.into(),
            column_map,
            conditions_map: IndexMap::new(),
            selection: default_selection(),
            note: String::new(),
            calculation_method: default_calculation_method(),
            category: default_category(),
        }
    }

    /// Set the property short name.
    pub fn with_short_name(mut self, short_name: impl Into<ShortName>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    /// Add a condition key read from a CSV column.
    pub fn with_condition(mut self, key: impl Into<String>, column: impl Into<ColumnName>) -> Self {
        self.conditions_map.insert(key.into(), column.into());
        self
    }

    /// Replace the selection criteria.
    pub fn with_selection(mut self, selection: IndexMap<ColumnName, SelectionSource>) -> Self {
        self.selection = selection;
        self
    }

    /// Set the note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// CSV column holding the structure string.
    pub fn smiles_column(&self) -> Result<&str, PipelineError> {
        self.mapped_column(COLUMN_MAP_SMILES)
    }

    /// CSV column holding the measured value.
    pub fn value_column(&self) -> Result<&str, PipelineError> {
        self.mapped_column(COLUMN_MAP_VALUE)
    }

    fn mapped_column(&self, key: &str) -> Result<&str, PipelineError> {
        self.column_map
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                PipelineError::InvalidColumnMap(format!(
                    "dataset '{}' must map the '{}' field to a CSV column",
                    self.output_stem, key
                ))
            })
    }

    /// Every CSV column this dataset reads.
    pub fn required_columns(&self) -> Result<Vec<&str>, PipelineError> {
        let mut columns = vec![self.smiles_column()?, self.value_column()?];
        columns.extend(self.conditions_map.values().map(String::as_str));
        columns.extend(self.selection.values().filter_map(|source| match source {
            SelectionSource::Column(column) => Some(column.as_str()),
            _ => None,
        }));
        Ok(columns)
    }

    /// CSV path resolved against `data_dir`.
    pub fn csv_path(&self, data_dir: &Path) -> PathBuf {
        if self.csv.is_absolute() {
            self.csv.clone()
        } else {
            data_dir.join(&self.csv)
        }
    }
}

/// Datasets and property types processed by one `prepare` run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareManifest {
    /// Property catalogue written to `new_properties.jsonl`.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// Datasets, processed in order.
    pub datasets: Vec<DatasetSpec>,
}

impl PrepareManifest {
    /// Load a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&text)?;
        if manifest.datasets.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "manifest {} lists no datasets",
                path.display()
            )));
        }
        Ok(manifest)
    }

    /// Built-in catalogue of the molecular dynamics property datasets.
    pub fn builtin() -> Self {
        let note = "Source: pmd database by Kevin";
        Self {
            properties: vec![
                PropertyDef {
                    name: "Gas Diffusivity".into(),
                    short_name: "D_gas".into(),
                    unit: "cm^2/s".into(),
                    plot_symbol: Some(r"$\D_\text{g}$".into()),
                },
                PropertyDef {
                    name: "Solvent Diffusivity".into(),
                    short_name: "D_sol".into(),
                    unit: "cm^2/s".into(),
                    plot_symbol: Some(r"$\D_\text{s}$".into()),
                },
                PropertyDef {
                    name: "Gas Solubility".into(),
                    short_name: "sol_g".into(),
                    unit: "cc(STP)/cc*cmHg".into(),
                    plot_symbol: Some(r"$\delta_\text{g}$".into()),
                },
            ],
            datasets: vec![
                DatasetSpec::new("Tg.csv", "tg", "smiles", "Value")
                    .with_short_name("Tg")
                    .with_note(note),
                DatasetSpec::new("Dgas.csv", "gas_diffusivity", "smiles", "value")
                    .with_short_name("D_gas")
                    .with_condition("gas", "gas")
                    .with_note(note),
                DatasetSpec::new("Dsol.csv", "solvent_diffusivity", "smiles", "value")
                    .with_short_name("D_sol")
                    .with_condition("solvent_smiles", "solvent_smiles")
                    .with_condition("ratio", "ratio")
                    .with_condition("temp", "temp")
                    .with_note(
                        "Source: pmd database by Kevin.\n\
                         Ratio is defined as the number of monomers over the number of solvent molecules.",
                    ),
                DatasetSpec::new("Sgas.csv", "gas_solubility", "smiles", "value")
                    .with_short_name("sol_g")
                    .with_condition("gas", "gas")
                    .with_note(note),
            ],
        }
    }
}

/// What to do when a property-type lookup errors (as opposed to not finding it).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyErrorPolicy {
    /// Continue with a null property reference and log loudly.
    #[default]
    Degrade,
    /// Abort the dataset with `PipelineError::PropertyLookup`.
    Abort,
}

/// Runtime options shared by the prepare and check commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Directory holding the dataset CSV files.
    pub data_dir: PathBuf,
    /// Directory receiving output files.
    pub output_dir: PathBuf,
    /// Maximum rows processed per dataset, if any.
    pub row_limit: Option<usize>,
    /// Handling of property lookup errors.
    pub on_property_lookup_error: PropertyErrorPolicy,
}

impl PipelineOptions {
    /// Options writing outputs next to the inputs, without a row limit.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            output_dir: data_dir.clone(),
            data_dir,
            row_limit: None,
            on_property_lookup_error: PropertyErrorPolicy::default(),
        }
    }

    /// Write outputs to `output_dir`.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Cap rows per dataset at the debug limit when `debug` is set.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.row_limit = debug.then_some(DEBUG_ROW_LIMIT);
        self
    }

    /// Set the property lookup error policy.
    pub fn with_property_error_policy(mut self, policy: PropertyErrorPolicy) -> Self {
        self.on_property_lookup_error = policy;
        self
    }

    /// True once `processed` rows reach the row limit.
    pub fn limit_reached(&self, processed: usize) -> bool {
        self.row_limit.is_some_and(|limit| processed >= limit)
    }
}
