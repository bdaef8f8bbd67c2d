//! SQLite Table Store
//! Persists canonical tables and reads them back as DataFrames.

use super::hints::TypeHints;
use crate::data::{CanonicalTable, GRADE, RESEARCH_ID};
use polars::prelude::*;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("table '{0}' does not exist")]
    MissingTable(String),
    #[error("table '{0}' has no columns")]
    EmptySchema(String),
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn to_sql_value(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Integer(i64::from(b)),
        AnyValue::Int8(v) => Value::Integer(v.into()),
        AnyValue::Int16(v) => Value::Integer(v.into()),
        AnyValue::Int32(v) => Value::Integer(v.into()),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt8(v) => Value::Integer(v.into()),
        AnyValue::UInt16(v) => Value::Integer(v.into()),
        AnyValue::UInt32(v) => Value::Integer(v.into()),
        AnyValue::UInt64(v) => i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or(Value::Real(v as f64)),
        AnyValue::Float32(v) => Value::Real(v.into()),
        AnyValue::Float64(v) => Value::Real(v),
        AnyValue::String(s) => Value::Text(s.to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        other => Value::Text(other.to_string().trim_matches('"').to_string()),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(v) => Some(*v as f64),
        Value::Real(v) => Some(*v),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build a column from SQLite values, choosing the narrowest dtype that
/// holds every value. `declared` decides the dtype of an all-null column.
fn column_from_values(name: &str, values: Vec<Value>, declared: &str) -> Column {
    let non_null = values.iter().filter(|v| !matches!(v, Value::Null)).count();
    let all_integer = values
        .iter()
        .all(|v| matches!(v, Value::Null | Value::Integer(_)));
    let all_numeric = values
        .iter()
        .all(|v| matches!(v, Value::Null | Value::Integer(_) | Value::Real(_)));
    let declared = declared.to_ascii_uppercase();

    let as_integer = if non_null == 0 {
        declared.contains("INT")
    } else {
        all_integer
    };
    let as_real = if non_null == 0 {
        declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB")
    } else {
        all_numeric
    };

    if as_integer {
        let data: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .collect();
        Column::new(name.into(), data)
    } else if as_real {
        let data: Vec<Option<f64>> = values.iter().map(value_as_f64).collect();
        Column::new(name.into(), data)
    } else {
        let data: Vec<Option<String>> = values
            .into_iter()
            .map(|v| match v {
                Value::Null => None,
                Value::Integer(i) => Some(i.to_string()),
                Value::Real(r) => Some(r.to_string()),
                Value::Text(s) => Some(s),
                Value::Blob(b) => Some(String::from_utf8_lossy(&b).to_string()),
            })
            .collect();
        Column::new(name.into(), data)
    }
}

/// Owns the SQLite connection for one run.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened database");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create or replace table `table.name` with the given column types.
    ///
    /// Runs in one transaction, so a failure keeps the previous contents.
    pub fn create_and_store(
        &mut self,
        table: &CanonicalTable,
        hints: &TypeHints,
    ) -> Result<(), StoreError> {
        let df = &table.frame;
        let columns = df.get_columns();
        if columns.is_empty() {
            return Err(StoreError::EmptySchema(table.name.clone()));
        }

        let definitions: Vec<String> = columns
            .iter()
            .map(|c| {
                let sql_type = hints.resolve(c.name().as_str(), c.dtype());
                format!("{} {}", quote(c.name().as_str()), sql_type.as_sql())
            })
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote(&table.name)), [])?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", quote(&table.name), definitions.join(", ")),
            [],
        )?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                quote(&table.name),
                placeholders
            ))?;
            for row in 0..df.height() {
                let values = columns
                    .iter()
                    .map(|c| c.get(row).map(to_sql_value))
                    .collect::<PolarsResult<Vec<Value>>>()?;
                insert.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!(table = %table.name, rows = df.height(), "stored");
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Full scan of a stored table.
    pub fn read_table(&self, name: &str) -> Result<DataFrame, StoreError> {
        if !self.table_exists(name)? {
            return Err(StoreError::MissingTable(name.to_string()));
        }

        let declared = self.declared_types(name)?;
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", quote(name)))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut cells: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(row.get::<_, Value>(i)?);
            }
        }

        let columns: Vec<Column> = names
            .iter()
            .zip(cells)
            .zip(declared.iter().map(String::as_str).chain(std::iter::repeat("")))
            .map(|((name, values), declared)| column_from_values(name, values, declared))
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    /// Column names of a stored table, in table order.
    pub fn column_names(&self, name: &str) -> Result<Vec<String>, StoreError> {
        if !self.table_exists(name)? {
            return Err(StoreError::MissingTable(name.to_string()));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn declared_types(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT type FROM pragma_table_info(?1) ORDER BY cid")?;
        let types = stmt
            .query_map([name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    /// Names of all user tables, sorted.
    pub fn list_table_names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// `Grade` of student `id` in table `name`, if the student has a row.
    pub fn grade_for(&self, name: &str, id: i64) -> Result<Option<f64>, StoreError> {
        if !self.table_exists(name)? {
            return Err(StoreError::MissingTable(name.to_string()));
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            quote(GRADE),
            quote(name),
            quote(RESEARCH_ID)
        );
        let value = self
            .conn
            .query_row(&sql, [id], |row| row.get::<_, Value>(0))
            .optional()?;
        Ok(value.as_ref().and_then(value_as_f64))
    }

    /// Close the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
