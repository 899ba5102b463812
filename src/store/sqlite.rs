use std::path::Path;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::trace;

use super::{Criteria, RecordStore, StoredRow, Table, validate_identifier};
use crate::errors::StoreError;
use crate::frame::Cell;

/// Schema for the three tables the pipeline reads. Used to bootstrap fresh
/// databases and test fixtures.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS homopolymer (
    hp_id INTEGER PRIMARY KEY,
    pid INTEGER,
    rid INTEGER,
    smiles TEXT,
    canonical_smiles TEXT UNIQUE,
    pg_fingerprint TEXT,
    pg_fingerprint_version TEXT,
    category TEXT
);
CREATE TABLE IF NOT EXISTS property (
    prop_id INTEGER PRIMARY KEY,
    name TEXT,
    short_name TEXT UNIQUE,
    unit TEXT,
    plot_symbol TEXT
);
CREATE TABLE IF NOT EXISTS polymer_name (
    name_id INTEGER PRIMARY KEY,
    hp_id INTEGER REFERENCES homopolymer (hp_id),
    name TEXT,
    search_name TEXT
);
";

/// Polymer store backed by a SQLite database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open an existing database for reading and writing. A missing file is
    /// reported as unavailable rather than silently created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Open an existing database that rejects every write.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open_with_flags(path: &Path, mode: OpenFlags) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Unavailable(format!(
                "database file {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, mode | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database with the polymer schema.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create the polymer tables when missing.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn select(
        &self,
        table: Table,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let mut sql = format!("SELECT * FROM \"{}\"", table.name());
        let mut params = Vec::with_capacity(criteria.len());
        for (idx, (column, value)) in criteria.iter().enumerate() {
            validate_identifier(column)?;
            sql.push_str(if idx == 0 { " WHERE " } else { " AND " });
            // `IS` also matches NULL criteria.
            sql.push_str(&format!("\"{}\" IS ?{}", column, idx + 1));
            params.push(to_sql_value(value));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        trace!(sql = %sql, "store select");

        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|name| name.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = StoredRow::new();
            for (idx, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_sql_value(row.get_ref(idx)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

impl RecordStore for SqliteStore {
    fn get_one(&self, table: Table, criteria: &Criteria) -> Result<Option<StoredRow>, StoreError> {
        Ok(self.select(table, criteria, Some(1))?.into_iter().next())
    }

    fn get_all(&self, table: Table, criteria: &Criteria) -> Result<Vec<StoredRow>, StoreError> {
        self.select(table, criteria, None)
    }

    fn insert(&mut self, table: Table, record: &StoredRow) -> Result<(), StoreError> {
        if record.is_empty() {
            self.conn
                .execute(&format!("INSERT INTO \"{}\" DEFAULT VALUES", table.name()), [])?;
            return Ok(());
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        for (idx, column) in record.keys().enumerate() {
            validate_identifier(column)?;
            columns.push(format!("\"{column}\""));
            placeholders.push(format!("?{}", idx + 1));
        }
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table.name(),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(record.values().map(to_sql_value)))?;
        Ok(())
    }

    fn update(&mut self, table: Table, id: i64, values: &StoredRow) -> Result<(), StoreError> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in values {
            if column == table.id_column() {
                continue;
            }
            validate_identifier(column)?;
            params.push(to_sql_value(value));
            assignments.push(format!("\"{}\" = ?{}", column, params.len()));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        params.push(Value::Integer(id));
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?{}",
            table.name(),
            assignments.join(", "),
            table.id_column(),
            params.len()
        );
        let changed = self.conn.execute(&sql, params_from_iter(params))?;
        if changed == 0 {
            return Err(StoreError::Query {
                table: table.name().to_string(),
                reason: format!("no row with {} = {}", table.id_column(), id),
            });
        }
        Ok(())
    }
}

fn to_sql_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Integer(i64::from(*value)),
        Cell::Int(value) => Value::Integer(*value),
        Cell::Float(value) => Value::Real(*value),
        Cell::Text(value) => Value::Text(value.clone()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(value) => Cell::Int(value),
        ValueRef::Real(value) => Cell::Float(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Cell::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn criteria(column: &str, value: impl Into<Cell>) -> Criteria {
        let mut criteria = Criteria::new();
        criteria.insert(column.to_string(), value.into());
        criteria
    }

    #[test]
    fn insert_then_lookup_by_canonical_smiles() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut row = StoredRow::new();
        row.insert("smiles".into(), "C1=CC=CC=C1".into());
        row.insert("canonical_smiles".into(), "c1ccccc1".into());
        store.insert(Table::Homopolymer, &row).unwrap();

        let hit = store
            .get_one(Table::Homopolymer, &criteria("canonical_smiles", "c1ccccc1"))
            .unwrap()
            .unwrap();
        assert_eq!(Table::Homopolymer.row_id(&hit), Some(1));
        assert_eq!(hit["smiles"], Cell::from("C1=CC=CC=C1"));
        assert_eq!(hit["category"], Cell::Null);

        assert!(
            store
                .get_one(Table::Homopolymer, &criteria("canonical_smiles", "CCO"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn upsert_updates_existing_property() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let which = criteria("short_name", "D_gas");
        let mut payload = StoredRow::new();
        payload.insert("unit".into(), "cm^2/s".into());
        store.upsert(Table::Property, &which, payload, false).unwrap();

        let mut payload = StoredRow::new();
        payload.insert("unit".into(), "m^2/s".into());
        let row = store
            .upsert(Table::Property, &which, payload, true)
            .unwrap()
            .unwrap();
        assert_eq!(row["unit"], Cell::from("m^2/s"));
        assert_eq!(store.get_all(Table::Property, &Criteria::new()).unwrap().len(), 1);
    }

    #[test]
    fn update_of_missing_row_is_an_error() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut values = StoredRow::new();
        values.insert("name".into(), "pe".into());
        assert!(matches!(
            store.update(Table::PolymerName, 99, &values),
            Err(StoreError::Query { .. })
        ));
    }

    #[test]
    fn criteria_columns_must_be_identifiers() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .get_one(Table::Homopolymer, &criteria("smiles = '' OR 1=1 --", "x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[test]
    fn open_reports_missing_file_as_unavailable() {
        let temp = tempdir().unwrap();
        let err = SqliteStore::open(&temp.path().join("absent.db")).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn open_reads_an_existing_database_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("polydb.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_SQL).unwrap();
            conn.execute(
                "INSERT INTO property (short_name, name) VALUES ('Tg', 'Glass transition')",
                [],
            )
            .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let row = store
            .get_one(Table::Property, &criteria("short_name", "Tg"))
            .unwrap()
            .unwrap();
        assert_eq!(Table::Property.row_id(&row), Some(1));
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("polydb.sqlite");
        Connection::open(&path).unwrap().execute_batch(SCHEMA_SQL).unwrap();

        let mut store = SqliteStore::open_read_only(&path).unwrap();
        assert!(store.get_all(Table::Property, &Criteria::new()).unwrap().is_empty());
        let mut row = StoredRow::new();
        row.insert("short_name".into(), "Tg".into());
        assert!(matches!(
            store.insert(Table::Property, &row),
            Err(StoreError::Sqlite(_))
        ));
        assert!(matches!(
            SqliteStore::open_read_only(&temp.path().join("absent.db")),
            Err(StoreError::Unavailable(_))
        ));
    }
}
