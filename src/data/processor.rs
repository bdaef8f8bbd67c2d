//! Data Processor Module
//! Cleans raw test-result exports into canonical, one-row-per-student tables.

use super::coerce::GradeCoercer;
use super::names::{NameNormalizer, GRADE, RESEARCH_ID};
use polars::prelude::*;
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("schema error{}: required column '{column}' is missing", in_table(.table))]
    MissingColumn {
        table: Option<String>,
        column: String,
    },
    #[error("schema error{}: more than one column normalizes to '{column}'", in_table(.table))]
    DuplicateColumn {
        table: Option<String>,
        column: String,
    },
}

fn in_table(table: &Option<String>) -> String {
    table
        .as_ref()
        .map(|t| format!(" in table '{t}'"))
        .unwrap_or_default()
}

impl ProcessorError {
    pub fn missing(column: &str) -> Self {
        ProcessorError::MissingColumn {
            table: None,
            column: column.to_string(),
        }
    }

    /// Attach the table name to a schema error.
    pub fn within(self, name: &str) -> Self {
        match self {
            ProcessorError::MissingColumn { column, .. } => ProcessorError::MissingColumn {
                table: Some(name.to_string()),
                column,
            },
            ProcessorError::DuplicateColumn { column, .. } => ProcessorError::DuplicateColumn {
                table: Some(name.to_string()),
                column,
            },
            other => other,
        }
    }

    pub fn is_schema_error(&self) -> bool {
        !matches!(self, ProcessorError::PolarsError(_))
    }
}

pub(crate) fn require_column<'a>(
    df: &'a DataFrame,
    name: &str,
) -> Result<&'a Column, ProcessorError> {
    df.column(name).map_err(|_| ProcessorError::missing(name))
}

/// A cleaned table together with its destination name.
#[derive(Debug, Clone)]
pub struct CanonicalTable {
    pub name: String,
    pub frame: DataFrame,
}

impl CanonicalTable {
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// Collapses repeated attempts to one row per student.
pub struct Deduplicator;

impl Deduplicator {
    /// Keep each student's highest-graded row.
    ///
    /// Rows are stably sorted by `Grade` descending, missing grades last, and
    /// the first row seen for every `ResearchId` is kept. Equal grades keep the
    /// earlier input row.
    pub fn dedupe(df: &DataFrame) -> Result<DataFrame, ProcessorError> {
        let ids = require_column(df, RESEARCH_ID)?.cast(&DataType::String)?;
        let grades = GradeCoercer::parse_column(require_column(df, GRADE)?)?;
        let ids: Vec<Option<&str>> = ids.str()?.into_iter().collect();

        let keep = Self::retained_rows(&ids, &grades);
        debug!(rows = df.height(), kept = keep.len(), "deduplicated");

        let idx = IdxCa::from_vec("idx".into(), keep);
        Ok(df.take(&idx)?)
    }

    fn retained_rows<K: Eq + std::hash::Hash>(ids: &[K], grades: &[Option<f64>]) -> Vec<IdxSize> {
        let mut order: Vec<usize> = (0..ids.len()).collect();
        order.sort_by(|&a, &b| match (grades[a], grades[b]) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let mut seen = HashSet::new();
        order
            .into_iter()
            .filter(|&i| seen.insert(&ids[i]))
            .map(|i| i as IdxSize)
            .collect()
    }
}

/// Runs the fixed cleaning pass over one raw table.
#[derive(Debug, Clone)]
pub struct TableProcessor {
    drop_columns: Vec<String>,
}

impl Default for TableProcessor {
    fn default() -> Self {
        Self {
            drop_columns: vec!["State".to_string(), "TimeTaken".to_string()],
        }
    }
}

impl TableProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list of columns removed at the end of the pass.
    pub fn with_drop_columns(mut self, columns: Vec<String>) -> Self {
        self.drop_columns = columns;
        self
    }

    /// Clean `df` into the canonical table `name`.
    ///
    /// Order: normalize names, coerce score columns keeping nulls, cast ids,
    /// dedupe, zero-fill scores, drop unneeded columns. Missing grades must
    /// still be null while deduplicating so that they sort last.
    pub fn process(&self, name: &str, df: &DataFrame) -> Result<CanonicalTable, ProcessorError> {
        let frame = self.clean(df).map_err(|e| e.within(name))?;
        debug!(table = name, rows = frame.height(), columns = frame.width(), "processed");
        Ok(CanonicalTable {
            name: name.to_string(),
            frame,
        })
    }

    fn clean(&self, df: &DataFrame) -> Result<DataFrame, ProcessorError> {
        let df = Self::normalize_columns(df)?;
        require_column(&df, RESEARCH_ID)?;

        let score_columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|s| NameNormalizer::is_score_column(s))
            .collect();

        let df = GradeCoercer::coerce_keep_missing(&df, &score_columns)?;
        let df = Self::with_integer_ids(df)?;
        let df = Deduplicator::dedupe(&df)?;
        let df = GradeCoercer::zero_fill(&df, &score_columns)?;
        self.drop_unneeded(df)
    }

    fn normalize_columns(df: &DataFrame) -> Result<DataFrame, ProcessorError> {
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(df.width());

        for column in df.get_columns() {
            let name = NameNormalizer::normalize(column.name().as_str());
            if name.is_empty() {
                warn!(column = %column.name(), "dropping column with a blank name");
                continue;
            }
            if !seen.insert(name.clone()) {
                return Err(ProcessorError::DuplicateColumn {
                    table: None,
                    column: name,
                });
            }
            columns.push(column.clone().with_name(name.into()));
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Integer view of an id column. Fractional, non-numeric and
    /// out-of-range values are null.
    fn integer_ids(column: &Column) -> Result<Vec<Option<i64>>, ProcessorError> {
        if column.dtype().is_integer() {
            return Ok(column.cast(&DataType::Int64)?.i64()?.into_iter().collect());
        }

        Ok(GradeCoercer::parse_column(column)?
            .into_iter()
            .map(|v| {
                v.filter(|x| x.fract() == 0.0 && x.abs() < i64::MAX as f64)
                    .map(|x| x as i64)
            })
            .collect())
    }

    /// Cast `ResearchId` to Int64 and drop rows without a usable id.
    fn with_integer_ids(mut df: DataFrame) -> Result<DataFrame, ProcessorError> {
        let ids = Column::new(RESEARCH_ID.into(), Self::integer_ids(df.column(RESEARCH_ID)?)?);
        let valid = ids.i64()?.is_not_null();
        let dropped = valid.into_iter().filter(|v| *v == Some(false)).count();

        df.with_column(ids)?;
        if dropped > 0 {
            warn!(dropped, "dropping rows without an integer ResearchId");
            df = df.filter(&valid)?;
        }
        Ok(df)
    }

    fn drop_unneeded(&self, mut df: DataFrame) -> Result<DataFrame, ProcessorError> {
        for name in &self.drop_columns {
            if df.column(name).is_ok() {
                df = df.drop(name)?;
            }
        }
        Ok(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64s(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().cast(&DataType::Float64).unwrap().f64().unwrap().into_iter().collect()
    }

    fn i64s(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
        df.column(name).unwrap().cast(&DataType::Int64).unwrap().i64().unwrap().into_iter().collect()
    }

    #[test]
    fn dedupe_keeps_max_grade_per_id() {
        let df = df!(
            "ResearchId" => [1i64, 1, 2, 3, 3, 3],
            "Grade" => [80.0, 90.0, 85.0, 10.0, 70.0, 40.0],
            "Attempt" => [1i64, 2, 1, 1, 2, 3],
        )
        .unwrap();

        let out = Deduplicator::dedupe(&df).unwrap();

        assert_eq!(out.height(), 3);
        assert_eq!(i64s(&out, "ResearchId"), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(f64s(&out, "Grade"), vec![Some(90.0), Some(85.0), Some(70.0)]);
        assert_eq!(i64s(&out, "Attempt"), vec![Some(2), Some(1), Some(2)]);
    }

    #[test]
    fn dedupe_ties_keep_first_row() {
        let df = df!(
            "ResearchId" => [7i64, 7, 7],
            "Grade" => [50.0, 50.0, 20.0],
            "Attempt" => [1i64, 2, 3],
        )
        .unwrap();

        let out = Deduplicator::dedupe(&df).unwrap();
        assert_eq!(i64s(&out, "Attempt"), vec![Some(1)]);
    }

    #[test]
    fn dedupe_sorts_missing_grades_last() {
        let df = df!(
            "ResearchId" => [1i64, 1],
            "Grade" => [None, Some(0.0)],
            "Attempt" => [1i64, 2],
        )
        .unwrap();

        let out = Deduplicator::dedupe(&df).unwrap();
        assert_eq!(i64s(&out, "Attempt"), vec![Some(2)]);
    }

    #[test]
    fn dedupe_requires_grade() {
        let df = df!("ResearchId" => [1i64]).unwrap();
        let err = Deduplicator::dedupe(&df).unwrap_err();
        assert!(matches!(err, ProcessorError::MissingColumn { ref column, .. } if column == "Grade"));
    }

    #[test]
    fn process_cleans_and_drops() {
        let df = df!(
            "ResearchId" => [1i64, 1, 2],
            "Grade/100.00" => [Some(80.0), None, Some(60.0)],
            "State" => ["Finished", "Finished", "Finished"],
            "Time taken" => ["30 mins", "45 mins", "40 mins"],
            "Q. 1 /50.00" => [Some("40"), Some("-"), Some("30")],
        )
        .unwrap();

        let table = TableProcessor::new().process("Test1", &df).unwrap();
        let out = &table.frame;

        assert_eq!(table.name, "Test1");
        assert_eq!(table.column_names(), vec!["ResearchId", "Grade", "Q.1"]);
        assert_eq!(out.height(), 2);
        assert_eq!(i64s(out, "ResearchId"), vec![Some(1), Some(2)]);
        assert_eq!(f64s(out, "Grade"), vec![Some(80.0), Some(60.0)]);
        assert_eq!(f64s(out, "Q.1"), vec![Some(40.0), Some(30.0)]);
        let nulls: usize = out.get_columns().iter().map(|c| c.null_count()).sum();
        assert_eq!(nulls, 0);
    }

    #[test]
    fn process_prefers_graded_attempt_over_missing() {
        let df = df!(
            "ResearchId" => [1i64, 1, 2],
            "Grade" => [None, Some(80.0), Some(60.0)],
        )
        .unwrap();

        let table = TableProcessor::new().process("Test2", &df).unwrap();
        assert_eq!(f64s(&table.frame, "Grade"), vec![Some(80.0), Some(60.0)]);
    }

    #[test]
    fn process_zero_fills_after_dedupe() {
        let df = df!(
            "ResearchId" => ["5", "6"],
            "Grade" => ["-", "70"],
        )
        .unwrap();

        let table = TableProcessor::new().process("Test3", &df).unwrap();
        assert_eq!(i64s(&table.frame, "ResearchId"), vec![Some(6), Some(5)]);
        assert_eq!(f64s(&table.frame, "Grade"), vec![Some(70.0), Some(0.0)]);
        assert_eq!(table.frame.column("ResearchId").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn process_drops_rows_without_id() {
        let df = df!(
            "ResearchId" => [Some("1"), None, Some("x")],
            "Grade" => [50.0, 60.0, 70.0],
        )
        .unwrap();

        let table = TableProcessor::new().process("Test4", &df).unwrap();
        assert_eq!(i64s(&table.frame, "ResearchId"), vec![Some(1)]);
    }

    #[test]
    fn process_drops_fractional_ids() {
        let df = df!(
            "ResearchId" => [1.5, 2.0],
            "Grade" => [50.0, 60.0],
        )
        .unwrap();
        let table = TableProcessor::new().process("T", &df).unwrap();
        assert_eq!(i64s(&table.frame, "ResearchId"), vec![Some(2)]);

        // distinct fractional ids must not collapse into one student
        let df = df!(
            "ResearchId" => [1.2, 1.7, 3.0],
            "Grade" => [80.0, 90.0, 70.0],
        )
        .unwrap();
        let table = TableProcessor::new().process("T", &df).unwrap();
        assert_eq!(i64s(&table.frame, "ResearchId"), vec![Some(3)]);
        assert_eq!(f64s(&table.frame, "Grade"), vec![Some(70.0)]);

        let df = df!(
            "ResearchId" => ["4", "4.5", "5.0"],
            "Grade" => [10.0, 20.0, 30.0],
        )
        .unwrap();
        let table = TableProcessor::new().process("T", &df).unwrap();
        assert_eq!(i64s(&table.frame, "ResearchId"), vec![Some(5), Some(4)]);
    }

    #[test]
    fn process_without_research_id_fails_with_table_name() {
        let df = df!("Student" => [1i64], "Grade" => [50.0]).unwrap();
        let err = TableProcessor::new().process("Sumtest", &df).unwrap_err();

        assert!(err.is_schema_error());
        assert_eq!(
            err.to_string(),
            "schema error in table 'Sumtest': required column 'ResearchId' is missing"
        );
    }

    #[test]
    fn process_rejects_colliding_names() {
        let df = df!(
            "ResearchId" => [1i64],
            "Grade" => [1.0],
            "grade" => [2.0],
        )
        .unwrap();

        let err = TableProcessor::new().process("Dup", &df).unwrap_err();
        assert!(matches!(err, ProcessorError::DuplicateColumn { ref column, .. } if column == "Grade"));
    }

    #[test]
    fn process_skips_blank_column_names() {
        let df = df!(
            "ResearchId" => [1i64],
            "Grade" => [1.0],
            "/unit" => ["x"],
        )
        .unwrap();

        let table = TableProcessor::new().process("Blank", &df).unwrap();
        assert_eq!(table.column_names(), vec!["ResearchId", "Grade"]);
    }

    #[test]
    fn custom_drop_list() {
        let df = df!(
            "ResearchId" => [1i64],
            "Grade" => [1.0],
            "Started on" => ["2023-10-01"],
        )
        .unwrap();

        let table = TableProcessor::new()
            .with_drop_columns(vec!["StartedOn".to_string()])
            .process("T", &df)
            .unwrap();
        assert_eq!(table.column_names(), vec!["ResearchId", "Grade"]);
    }
}
