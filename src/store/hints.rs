//! SQL column types applied when a table is stored.

use crate::data::{is_numeric_dtype, GRADE, RESEARCH_ID};
use polars::prelude::DataType;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Timestamp,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Text => "TEXT",
        }
    }

    /// Fallback type for a column without a hint.
    pub fn from_dtype(dtype: &DataType) -> SqlType {
        match dtype {
            DataType::Float32 | DataType::Float64 => SqlType::Real,
            DataType::Boolean => SqlType::Integer,
            other if is_numeric_dtype(other) => SqlType::Integer,
            _ => SqlType::Text,
        }
    }
}

/// Column name → SQL type for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeHints {
    hints: BTreeMap<String, SqlType>,
}

impl TypeHints {
    /// Fixed convention for test-result tables: `ResearchId` is an integer,
    /// `StartedOn` / `Completed` are timestamps, `Grade` and `Q*` are reals.
    pub fn for_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        let mut hints = BTreeMap::new();
        hints.insert(RESEARCH_ID.to_string(), SqlType::Integer);
        hints.insert("StartedOn".to_string(), SqlType::Timestamp);
        hints.insert("Completed".to_string(), SqlType::Timestamp);
        hints.insert(GRADE.to_string(), SqlType::Real);

        for column in columns.iter().map(AsRef::as_ref) {
            if column.starts_with('Q') {
                hints.insert(column.to_string(), SqlType::Real);
            }
        }

        Self { hints }
    }

    pub fn get(&self, column: &str) -> Option<SqlType> {
        self.hints.get(column).copied()
    }

    /// Hinted type, else one derived from the column's dtype.
    pub fn resolve(&self, column: &str, dtype: &DataType) -> SqlType {
        self.get(column)
            .unwrap_or_else(|| SqlType::from_dtype(dtype))
    }
}
