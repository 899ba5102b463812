//! Persisted polymer store interfaces.
//!
//! Ownership model:
//! - `RecordStore` is the record-level interface (`get_one`, `get_all`,
//!   `insert`, `update`, `upsert`) keyed by exact-match criteria.
//! - `StoreContext` owns at most one open store for the whole process run and
//!   is passed explicitly to every pipeline call. Dropping it releases the
//!   connection.
//! - The preparation pipeline only ever reads through the context.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::StoreSettings;
use crate::errors::StoreError;
use crate::frame::Cell;
use crate::types::ColumnName;

/// PostgreSQL-backed store implementation.
pub mod postgres;
/// SQLite-backed store implementation.
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Exact-match lookup criteria, column → value.
pub type Criteria = IndexMap<ColumnName, Cell>;
/// One persisted row, column → value.
pub type StoredRow = IndexMap<ColumnName, Cell>;

/// Tables the pipeline reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// Distinct polymer structures, keyed by `hp_id`.
    Homopolymer,
    /// Property types, keyed by `prop_id`.
    Property,
    /// Names attached to polymers, keyed by `name_id`.
    PolymerName,
}

impl Table {
    /// Table name in the store.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Homopolymer => "homopolymer",
            Table::Property => "property",
            Table::PolymerName => "polymer_name",
        }
    }

    /// Stable foreign-key column of the table.
    pub const fn id_column(self) -> &'static str {
        match self {
            Table::Homopolymer => "hp_id",
            Table::Property => "prop_id",
            Table::PolymerName => "name_id",
        }
    }

    /// Foreign key of `row` for this table, if present.
    pub fn row_id(self, row: &StoredRow) -> Option<i64> {
        row.get(self.id_column()).and_then(Cell::as_i64)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record-level access to the persisted store.
pub trait RecordStore {
    /// First row of `table` matching every criterion, if any.
    fn get_one(&self, table: Table, criteria: &Criteria) -> Result<Option<StoredRow>, StoreError>;

    /// Every row of `table` matching every criterion. Empty criteria match all rows.
    fn get_all(&self, table: Table, criteria: &Criteria) -> Result<Vec<StoredRow>, StoreError>;

    /// Insert `record` into `table`.
    fn insert(&mut self, table: Table, record: &StoredRow) -> Result<(), StoreError>;

    /// Overwrite the columns in `values` on the row whose key is `id`.
    fn update(&mut self, table: Table, id: i64, values: &StoredRow) -> Result<(), StoreError>;

    /// Insert `payload` unless a row matching `which` exists; update that row
    /// instead when `update_existing` is set. The criteria columns are copied
    /// into the payload first. Returns the row matching `which` afterwards.
    fn upsert(
        &mut self,
        table: Table,
        which: &Criteria,
        mut payload: StoredRow,
        update_existing: bool,
    ) -> Result<Option<StoredRow>, StoreError> {
        for (column, value) in which {
            payload.insert(column.clone(), value.clone());
        }
        match self.get_one(table, which)? {
            None => {
                self.insert(table, &payload)?;
                tracing::trace!(table = %table, "store add");
            }
            Some(existing) => {
                if update_existing {
                    let id = table.row_id(&existing).ok_or_else(|| StoreError::Query {
                        table: table.name().to_string(),
                        reason: format!("matched row has no {}", table.id_column()),
                    })?;
                    self.update(table, id, &payload)?;
                    tracing::trace!(table = %table, id, "store update");
                } else {
                    tracing::trace!(table = %table, "store ok");
                }
            }
        }
        self.get_one(table, which)
    }
}

/// True when `column` is a plain SQL identifier.
pub fn is_identifier(column: &str) -> bool {
    let mut chars = column.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Fail with `InvalidIdentifier` unless `column` is a plain SQL identifier.
pub fn validate_identifier(column: &str) -> Result<(), StoreError> {
    if is_identifier(column) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(column.to_string()))
    }
}

fn row_matches(row: &StoredRow, criteria: &Criteria) -> bool {
    criteria.iter().all(|(column, value)| {
        row.get(column).unwrap_or(&Cell::Null) == value
    })
}

/// In-memory store for tests and offline fixtures.
///
/// Inserted rows without a key get the next integer id for their table.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<Table, Vec<StoredRow>>,
    next_ids: HashMap<Table, i64>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for fixtures.
    pub fn with_row<I, K, V>(mut self, table: Table, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ColumnName>,
        V: Into<Cell>,
    {
        let row: StoredRow = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.push_row(table, row);
        self
    }

    /// Number of rows in `table`.
    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map(Vec::len).unwrap_or(0)
    }

    /// True when `table` holds no rows.
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }

    fn push_row(&mut self, table: Table, mut row: StoredRow) {
        let next = self.next_ids.entry(table).or_insert(1);
        match table.row_id(&row) {
            Some(id) => *next = (*next).max(id + 1),
            None => {
                row.insert(table.id_column().to_string(), Cell::Int(*next));
                *next += 1;
            }
        }
        self.tables.entry(table).or_default().push(row);
    }
}

impl RecordStore for MemoryStore {
    fn get_one(&self, table: Table, criteria: &Criteria) -> Result<Option<StoredRow>, StoreError> {
        Ok(self
            .tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| row_matches(row, criteria)))
            .cloned())
    }

    fn get_all(&self, table: Table, criteria: &Criteria) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, criteria))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn insert(&mut self, table: Table, record: &StoredRow) -> Result<(), StoreError> {
        self.push_row(table, record.clone());
        Ok(())
    }

    fn update(&mut self, table: Table, id: i64, values: &StoredRow) -> Result<(), StoreError> {
        let row = self
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| table.row_id(row) == Some(id)))
            .ok_or_else(|| StoreError::Query {
                table: table.name().to_string(),
                reason: format!("no row with {} = {}", table.id_column(), id),
            })?;
        for (column, value) in values {
            if column != table.id_column() {
                row.insert(column.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Connection context shared by every pipeline call in one process run.
///
/// An offline context answers every lookup as a miss.
pub struct StoreContext {
    store: Option<Box<dyn RecordStore>>,
}

impl StoreContext {
    /// Context without a store.
    pub fn offline() -> Self {
        Self { store: None }
    }

    /// Context over an already-open store.
    pub fn with_store(store: Box<dyn RecordStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Open the store described by `settings` for reading only.
    pub fn try_connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let store: Box<dyn RecordStore> = match settings {
            StoreSettings::Sqlite { db_path } => Box::new(SqliteStore::open_read_only(db_path)?),
            StoreSettings::Postgres(pg) => Box::new(PostgresStore::connect_read_only(pg)?),
        };
        info!(store = %settings, "DB connected.");
        Ok(Self::with_store(store))
    }

    /// Open the store if configured, degrading to an offline context on any
    /// failure.
    pub fn connect(settings: Option<&StoreSettings>) -> Self {
        let Some(settings) = settings else {
            warn!("DB access disabled; running without store lookups");
            return Self::offline();
        };
        match Self::try_connect(settings) {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    store = %settings,
                    error = %err,
                    "DB connection failed; running without store lookups"
                );
                Self::offline()
            }
        }
    }

    /// True when lookups reach a real store.
    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Borrow the store, if connected.
    pub fn store(&self) -> Option<&dyn RecordStore> {
        self.store.as_deref()
    }

    /// Mutably borrow the store, if connected.
    pub fn store_mut(&mut self) -> Option<&mut (dyn RecordStore + 'static)> {
        self.store.as_deref_mut()
    }
}

impl Drop for StoreContext {
    fn drop(&mut self) {
        if self.store.take().is_some() {
            info!("DB disconnect.");
        }
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(column: &str, value: impl Into<Cell>) -> Criteria {
        let mut criteria = Criteria::new();
        criteria.insert(column.to_string(), value.into());
        criteria
    }

    #[test]
    fn memory_store_assigns_ids_and_matches_criteria() {
        let store = MemoryStore::new()
            .with_row(Table::Homopolymer, [("canonical_smiles", "[*]CC[*]")])
            .with_row(
                Table::Homopolymer,
                [("hp_id", Cell::Int(10)), ("canonical_smiles", Cell::from("c1ccccc1"))],
            )
            .with_row(Table::Homopolymer, [("canonical_smiles", "[*]CC([*])C")]);

        let hit = store
            .get_one(Table::Homopolymer, &criteria("canonical_smiles", "c1ccccc1"))
            .unwrap()
            .unwrap();
        assert_eq!(Table::Homopolymer.row_id(&hit), Some(10));

        let first = store
            .get_one(Table::Homopolymer, &criteria("canonical_smiles", "[*]CC[*]"))
            .unwrap()
            .unwrap();
        assert_eq!(Table::Homopolymer.row_id(&first), Some(1));

        let last = store
            .get_one(Table::Homopolymer, &criteria("canonical_smiles", "[*]CC([*])C"))
            .unwrap()
            .unwrap();
        assert_eq!(Table::Homopolymer.row_id(&last), Some(11));

        assert!(
            store
                .get_one(Table::Homopolymer, &criteria("canonical_smiles", "CCO"))
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store.get_all(Table::Homopolymer, &Criteria::new()).unwrap().len(),
            3
        );
        assert!(store.get_all(Table::Property, &Criteria::new()).unwrap().is_empty());
    }

    #[test]
    fn upsert_inserts_then_updates_only_when_requested() {
        let mut store = MemoryStore::new();
        let which = criteria("short_name", "Tg");
        let mut payload = StoredRow::new();
        payload.insert("name".into(), "Glass transition".into());

        let row = store
            .upsert(Table::Property, &which, payload.clone(), false)
            .unwrap()
            .unwrap();
        assert_eq!(row["short_name"], Cell::from("Tg"));
        assert_eq!(store.len(Table::Property), 1);

        payload.insert("name".into(), "Glass transition temperature".into());
        let row = store
            .upsert(Table::Property, &which, payload.clone(), false)
            .unwrap()
            .unwrap();
        assert_eq!(row["name"], Cell::from("Glass transition"));

        let row = store
            .upsert(Table::Property, &which, payload, true)
            .unwrap()
            .unwrap();
        assert_eq!(row["name"], Cell::from("Glass transition temperature"));
        assert_eq!(store.len(Table::Property), 1);
    }

    #[test]
    fn identifiers_reject_sql_fragments() {
        assert!(is_identifier("canonical_smiles"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a; DROP TABLE homopolymer"));
        assert!(matches!(
            validate_identifier("a\"b"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn unreachable_target_degrades_to_offline() {
        let settings = StoreSettings::sqlite("/nonexistent/polydb.sqlite");
        assert!(matches!(
            StoreContext::try_connect(&settings),
            Err(StoreError::Unavailable(_))
        ));
        assert!(!StoreContext::connect(Some(&settings)).is_connected());
    }

    #[test]
    fn offline_context_has_no_store() {
        let context = StoreContext::connect(None);
        assert!(!context.is_connected());
        assert!(context.store().is_none());
    }
}
