use std::cell::{RefCell, RefMut};

use postgres::{Client, Config, NoTls};
use serde_json::Value;
use tracing::trace;

use super::{Criteria, RecordStore, StoredRow, Table, validate_identifier};
use crate::config::PostgresSettings;
use crate::errors::StoreError;
use crate::frame::Cell;

/// Polymer store backed by a PostgreSQL database.
///
/// Values cross the wire as one JSON document per statement. The server
/// converts it to the table's row type with `json_populate_record`, so column
/// types never have to be known on this side.
pub struct PostgresStore {
    client: RefCell<Client>,
}

impl PostgresStore {
    /// Connect for reading and writing.
    pub fn connect(settings: &PostgresSettings) -> Result<Self, StoreError> {
        let client = config_for(settings)
            .connect(NoTls)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            client: RefCell::new(client),
        })
    }

    /// Connect with a session that rejects every write.
    pub fn connect_read_only(settings: &PostgresSettings) -> Result<Self, StoreError> {
        let store = Self::connect(settings)?;
        store
            .client()?
            .batch_execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")?;
        Ok(store)
    }

    fn client(&self) -> Result<RefMut<'_, Client>, StoreError> {
        self.client
            .try_borrow_mut()
            .map_err(|_| StoreError::Unavailable("postgres client already in use".to_string()))
    }

    fn select(
        &self,
        table: Table,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let sql = select_sql(table, criteria, limit)?;
        trace!(sql = %sql, "store select");
        let document = serde_json::to_string(criteria).map_err(|err| query_error(table, err))?;
        let rows = self.client()?.query(sql.as_str(), &[&document])?;
        rows.iter()
            .map(|row| {
                let json: String = row.try_get(0)?;
                row_from_json(table, &json)
            })
            .collect()
    }
}

fn config_for(settings: &PostgresSettings) -> Config {
    let mut config = Config::new();
    config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .dbname(&settings.dbname);
    if let Some(password) = &settings.password {
        config.password(password);
    }
    config
}

fn query_error(table: Table, err: impl std::fmt::Display) -> StoreError {
    StoreError::Query {
        table: table.name().to_string(),
        reason: err.to_string(),
    }
}

/// `SELECT` returning each matching row as JSON text. `$1` carries the
/// criteria document; `IS NOT DISTINCT FROM` also matches NULL criteria.
fn select_sql(table: Table, criteria: &Criteria, limit: Option<usize>) -> Result<String, StoreError> {
    let name = table.name();
    let mut sql = format!(
        "SELECT row_to_json(t)::text FROM \"{name}\" AS t, \
         json_populate_record(NULL::\"{name}\", $1::text::json) AS c"
    );
    for (idx, column) in criteria.keys().enumerate() {
        validate_identifier(column)?;
        sql.push_str(if idx == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("t.\"{column}\" IS NOT DISTINCT FROM c.\"{column}\""));
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

fn insert_sql(table: Table, record: &StoredRow) -> Result<String, StoreError> {
    let name = table.name();
    if record.is_empty() {
        return Ok(format!("INSERT INTO \"{name}\" DEFAULT VALUES"));
    }
    let columns = quoted_columns(record.keys())?;
    Ok(format!(
        "INSERT INTO \"{name}\" ({columns}) \
         SELECT {columns} FROM json_populate_record(NULL::\"{name}\", $1::text::json)"
    ))
}

/// `UPDATE` by key. `$1` carries the values document, `$2` the key as text.
fn update_sql(table: Table, values: &StoredRow) -> Result<Option<String>, StoreError> {
    let name = table.name();
    let id_column = table.id_column();
    let assigned: Vec<&String> = values.keys().filter(|column| *column != id_column).collect();
    if assigned.is_empty() {
        return Ok(None);
    }
    let columns = quoted_columns(assigned)?;
    Ok(Some(format!(
        "UPDATE \"{name}\" SET ({columns}) = \
         (SELECT {columns} FROM json_populate_record(NULL::\"{name}\", $1::text::json)) \
         WHERE \"{id_column}\"::text = $2"
    )))
}

fn quoted_columns<'a>(columns: impl IntoIterator<Item = &'a String>) -> Result<String, StoreError> {
    let mut quoted = Vec::new();
    for column in columns {
        validate_identifier(column)?;
        quoted.push(format!("\"{column}\""));
    }
    Ok(quoted.join(", "))
}

fn row_from_json(table: Table, json: &str) -> Result<StoredRow, StoreError> {
    match serde_json::from_str::<Value>(json).map_err(|err| query_error(table, err))? {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .map(|(column, value)| (column, cell_from_json(value)))
            .collect()),
        other => Err(query_error(table, format!("expected a row object, got {other}"))),
    }
}

fn cell_from_json(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(value) => Cell::Bool(value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => Cell::Int(value),
            None => number.as_f64().map(Cell::Float).unwrap_or_default(),
        },
        Value::String(text) => Cell::Text(text),
        other => Cell::Text(other.to_string()),
    }
}

impl RecordStore for PostgresStore {
    fn get_one(&self, table: Table, criteria: &Criteria) -> Result<Option<StoredRow>, StoreError> {
        Ok(self.select(table, criteria, Some(1))?.into_iter().next())
    }

    fn get_all(&self, table: Table, criteria: &Criteria) -> Result<Vec<StoredRow>, StoreError> {
        self.select(table, criteria, None)
    }

    fn insert(&mut self, table: Table, record: &StoredRow) -> Result<(), StoreError> {
        let sql = insert_sql(table, record)?;
        let client = self.client.get_mut();
        if record.is_empty() {
            client.execute(sql.as_str(), &[])?;
        } else {
            let document =
                serde_json::to_string(record).map_err(|err| query_error(table, err))?;
            client.execute(sql.as_str(), &[&document])?;
        }
        Ok(())
    }

    fn update(&mut self, table: Table, id: i64, values: &StoredRow) -> Result<(), StoreError> {
        let Some(sql) = update_sql(table, values)? else {
            return Ok(());
        };
        let document = serde_json::to_string(values).map_err(|err| query_error(table, err))?;
        let changed = self
            .client
            .get_mut()
            .execute(sql.as_str(), &[&document, &id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::Query {
                table: table.name().to_string(),
                reason: format!("no row with {} = {}", table.id_column(), id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(pairs: &[(&str, Cell)]) -> Criteria {
        pairs
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn select_matches_every_criterion_through_the_json_document() {
        let sql = select_sql(
            Table::Homopolymer,
            &criteria(&[
                ("canonical_smiles", Cell::from("[*]CC[*]")),
                ("category", Cell::Null),
            ]),
            Some(1),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT row_to_json(t)::text FROM \"homopolymer\" AS t, \
             json_populate_record(NULL::\"homopolymer\", $1::text::json) AS c \
             WHERE t.\"canonical_smiles\" IS NOT DISTINCT FROM c.\"canonical_smiles\" \
             AND t.\"category\" IS NOT DISTINCT FROM c.\"category\" LIMIT 1"
        );
        assert!(
            !select_sql(Table::Property, &Criteria::new(), None)
                .unwrap()
                .contains("WHERE")
        );
    }

    #[test]
    fn statements_reject_non_identifier_columns() {
        let bad = criteria(&[("name; DROP TABLE property", Cell::from("x"))]);
        assert!(matches!(
            select_sql(Table::Property, &bad, None),
            Err(StoreError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            insert_sql(Table::Property, &bad),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn insert_and_update_populate_typed_columns() {
        let record = criteria(&[("hp_id", Cell::Int(1)), ("name", Cell::from("pe"))]);
        assert_eq!(
            insert_sql(Table::PolymerName, &record).unwrap(),
            "INSERT INTO \"polymer_name\" (\"hp_id\", \"name\") \
             SELECT \"hp_id\", \"name\" FROM json_populate_record(NULL::\"polymer_name\", $1::text::json)"
        );
        assert_eq!(
            insert_sql(Table::Property, &StoredRow::new()).unwrap(),
            "INSERT INTO \"property\" DEFAULT VALUES"
        );

        let values = criteria(&[("prop_id", Cell::Int(3)), ("unit", Cell::from("K"))]);
        assert_eq!(
            update_sql(Table::Property, &values).unwrap().unwrap(),
            "UPDATE \"property\" SET (\"unit\") = \
             (SELECT \"unit\" FROM json_populate_record(NULL::\"property\", $1::text::json)) \
             WHERE \"prop_id\"::text = $2"
        );
        let key_only = criteria(&[("prop_id", Cell::Int(3))]);
        assert_eq!(update_sql(Table::Property, &key_only).unwrap(), None);
    }

    #[test]
    fn json_rows_become_cells() {
        let row = row_from_json(
            Table::Homopolymer,
            r#"{"hp_id":7,"smiles":"C=C","pg_fingerprint":{"a":1},"density":0.95,"category":null}"#,
        )
        .unwrap();
        assert_eq!(Table::Homopolymer.row_id(&row), Some(7));
        assert_eq!(row["smiles"], Cell::from("C=C"));
        assert_eq!(row["pg_fingerprint"], Cell::from(r#"{"a":1}"#));
        assert_eq!(row["density"], Cell::Float(0.95));
        assert_eq!(row["category"], Cell::Null);
        assert!(matches!(
            row_from_json(Table::Homopolymer, "[1]"),
            Err(StoreError::Query { .. })
        ));
    }
}
