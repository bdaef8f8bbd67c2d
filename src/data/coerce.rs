//! Grade Coercion Module
//! Turns textual grade and question cells into numbers.

use super::processor::{require_column, ProcessorError};
use polars::prelude::*;
use tracing::debug;

/// Cell value used by the exports for "not attempted".
pub const MISSING_SENTINEL: &str = "-";

/// Whether a dtype can be cast to Float64 without going through text.
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Converts grade-like columns to Float64.
///
/// Coercion is lossy: a cell that fails to parse ends up as 0.0 and cannot be
/// told apart from a real zero afterwards.
pub struct GradeCoercer;

impl GradeCoercer {
    /// Parse one cell. The sentinel, blanks, unparseable text and non-finite
    /// numbers are all missing.
    pub fn parse_cell(cell: &str) -> Option<f64> {
        let cell = cell.trim();
        if cell == MISSING_SENTINEL {
            return None;
        }
        cell.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Numeric view of a column, nulls for anything that is not a number.
    pub fn parse_column(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
        if is_numeric_dtype(column.dtype()) {
            let values = column.cast(&DataType::Float64)?;
            return Ok(values
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect());
        }

        let text = column.cast(&DataType::String)?;
        Ok(text
            .str()?
            .into_iter()
            .map(|cell| cell.and_then(Self::parse_cell))
            .collect())
    }

    /// Coerce `columns` to Float64, missing and invalid cells become 0.0.
    pub fn coerce(df: &DataFrame, columns: &[String]) -> Result<DataFrame, ProcessorError> {
        let df = Self::coerce_keep_missing(df, columns)?;
        Self::zero_fill(&df, columns)
    }

    /// Coerce `columns` to Float64 but leave missing and invalid cells null.
    pub fn coerce_keep_missing(
        df: &DataFrame,
        columns: &[String],
    ) -> Result<DataFrame, ProcessorError> {
        let mut out = df.clone();

        for name in columns {
            let column = require_column(df, name)?;
            let values = Self::parse_column(column)?;

            let parsed = values.iter().filter(|v| v.is_some()).count();
            let invalid = (column.len() - column.null_count()).saturating_sub(parsed);
            if invalid > 0 {
                debug!(column = %name, invalid, "non-numeric cells treated as missing");
            }

            out.with_column(Column::new(name.as_str().into(), values))?;
        }

        Ok(out)
    }

    /// Replace nulls in `columns` with 0.0. The columns must already be Float64.
    pub fn zero_fill(df: &DataFrame, columns: &[String]) -> Result<DataFrame, ProcessorError> {
        let mut out = df.clone();

        for name in columns {
            let column = require_column(df, name)?.cast(&DataType::Float64)?;
            let filled: Vec<f64> = column
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect();
            out.with_column(Column::new(name.as_str().into(), filled))?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn parse_cell_rules() {
        assert_eq!(GradeCoercer::parse_cell("80"), Some(80.0));
        assert_eq!(GradeCoercer::parse_cell(" 7.50 "), Some(7.5));
        assert_eq!(GradeCoercer::parse_cell("-"), None);
        assert_eq!(GradeCoercer::parse_cell("five"), None);
        assert_eq!(GradeCoercer::parse_cell(""), None);
        assert_eq!(GradeCoercer::parse_cell("NaN"), None);
        assert_eq!(GradeCoercer::parse_cell("-3"), Some(-3.0));
    }

    #[test]
    fn coerce_leaves_no_sentinel_or_null() {
        let df = df!(
            "ResearchId" => [1i64, 2, 3, 4],
            "Grade" => [Some("80"), Some("-"), None, Some("abc")],
            "Q1" => [Some("1.5"), Some("2"), Some("-"), None],
            "Comment" => ["a", "-", "c", "d"],
        )
        .unwrap();

        let out = GradeCoercer::coerce(&df, &names(&["Grade", "Q1"])).unwrap();

        let grade: Vec<Option<f64>> = out.column("Grade").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(grade, vec![Some(80.0), Some(0.0), Some(0.0), Some(0.0)]);
        let q1: Vec<Option<f64>> = out.column("Q1").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(q1, vec![Some(1.5), Some(2.0), Some(0.0), Some(0.0)]);

        // untouched column keeps its sentinel
        assert_eq!(out.column("Comment").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn keep_missing_leaves_nulls() {
        let df = df!("Grade" => [Some("90"), Some("-"), None]).unwrap();
        let out = GradeCoercer::coerce_keep_missing(&df, &names(&["Grade"])).unwrap();
        let grade: Vec<Option<f64>> = out.column("Grade").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(grade, vec![Some(90.0), None, None]);
    }

    #[test]
    fn numeric_columns_are_cast() {
        let df = df!("Q2" => [Some(3i64), None, Some(5)]).unwrap();
        let out = GradeCoercer::coerce(&df, &names(&["Q2"])).unwrap();
        let q2: Vec<Option<f64>> = out.column("Q2").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(q2, vec![Some(3.0), Some(0.0), Some(5.0)]);
    }

    #[test]
    fn missing_column_is_schema_error() {
        let df = df!("Grade" => [1.0]).unwrap();
        let err = GradeCoercer::coerce(&df, &names(&["Q9"])).unwrap_err();
        assert!(matches!(err, ProcessorError::MissingColumn { ref column, .. } if column == "Q9"));
    }
}
