//! Statistics Calculator Module
//! Max / average aggregation, relative performance and grade standardization.

use crate::data::{GradeCoercer, GRADE, RESEARCH_ID};
use polars::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("schema error: required column '{column}' is missing")]
    MissingColumn { column: String },
}

pub(crate) fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, StatsError> {
    df.column(name).map_err(|_| StatsError::MissingColumn {
        column: name.to_string(),
    })
}

/// Non-null numeric cells of a column.
pub(crate) fn numeric_values(df: &DataFrame, column: &str) -> Result<Vec<f64>, StatsError> {
    let values = GradeCoercer::parse_column(require_column(df, column)?)?;
    Ok(values.into_iter().flatten().collect())
}

/// A student's value in one column next to the column average.
///
/// Both fields are `None` when the student has no row in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ColumnScore {
    pub value: Option<f64>,
    pub average: Option<f64>,
}

impl ColumnScore {
    /// `value - average`, when both are known.
    pub fn relative(&self) -> Option<f64> {
        match (self.value, self.average) {
            (Some(v), Some(a)) => Some(StatsCalculator::relative_performance(v, a)),
            _ => None,
        }
    }
}

/// Handles per-column aggregation over a single table.
pub struct StatsCalculator;

impl StatsCalculator {
    /// Maximum numeric value of `column`, nulls and text ignored.
    pub fn max_of(df: &DataFrame, column: &str) -> Result<Option<f64>, StatsError> {
        let values = numeric_values(df, column)?;
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(Statistics::max(&values)))
    }

    /// Arithmetic mean of the numeric cells of `column`.
    ///
    /// Null and non-numeric cells are excluded from both sum and count; a
    /// column with no numeric cell has no mean.
    pub fn mean_of(df: &DataFrame, column: &str) -> Result<Option<f64>, StatsError> {
        let values = numeric_values(df, column)?;
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(Statistics::mean(&values)))
    }

    /// The value of `column` for student `id` and the column's class average.
    pub fn grade_and_average(
        df: &DataFrame,
        id: i64,
        column: &str,
    ) -> Result<ColumnScore, StatsError> {
        let ids = require_column(df, RESEARCH_ID)?.cast(&DataType::Int64)?;
        let Some(row) = ids.i64()?.into_iter().position(|v| v == Some(id)) else {
            return Ok(ColumnScore::default());
        };

        let values = GradeCoercer::parse_column(require_column(df, column)?)?;
        Ok(ColumnScore {
            value: values[row],
            average: Self::mean_of(df, column)?,
        })
    }

    /// Scale a score and its average to percentages of `max`.
    ///
    /// Returns an empty score when the value is missing or `max` is not a
    /// positive number.
    pub fn standardize_scores(score: ColumnScore, max: f64) -> ColumnScore {
        let Some(value) = score.value else {
            return ColumnScore::default();
        };
        if !(max.is_finite() && max > 0.0) {
            return ColumnScore::default();
        }

        ColumnScore {
            value: Some(value / max * 100.0),
            average: score.average.map(|a| a / max * 100.0),
        }
    }

    pub fn relative_performance(value: f64, average: f64) -> f64 {
        value - average
    }

    /// Columns holding per-question scores, in table order.
    pub fn question_columns(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|s| s.starts_with('Q'))
            .collect()
    }
}

/// Rescales the `Grade` column to 0–100.
pub struct GradeStandardizer;

impl GradeStandardizer {
    /// Replace `Grade` with `Grade / max(Grade) * 100`.
    ///
    /// Rows whose grade is missing or not numeric are removed first, so an
    /// all-missing table comes back empty. When the highest grade is 0 the
    /// percentage is undefined: rows are kept and every `Grade` is null.
    pub fn standardize(df: &DataFrame) -> Result<DataFrame, StatsError> {
        let grades = GradeCoercer::parse_column(require_column(df, GRADE)?)?;

        let mut out = df.clone();
        out.with_column(Column::new(GRADE.into(), grades))?;
        let present = out.column(GRADE)?.f64()?.is_not_null();
        let mut out = out.filter(&present)?;

        let values: Vec<f64> = out.column(GRADE)?.f64()?.into_iter().flatten().collect();
        if values.is_empty() {
            return Ok(out);
        }

        let max = Statistics::max(&values);
        let scaled: Vec<Option<f64>> = if max > 0.0 {
            values.iter().map(|v| Some(v / max * 100.0)).collect()
        } else {
            warn!("highest grade is 0, standardized grades are undefined");
            vec![None; values.len()]
        };
        out.with_column(Column::new(GRADE.into(), scaled))?;
        Ok(out)
    }

    /// Standardize each table and rename it `Clean<name>`.
    pub fn standardize_all<'a, I>(tables: I) -> Result<Vec<(String, DataFrame)>, StatsError>
    where
        I: IntoIterator<Item = (&'a str, &'a DataFrame)>,
    {
        tables
            .into_iter()
            .map(|(name, df)| Ok((format!("Clean{name}"), Self::standardize(df)?)))
            .collect()
    }
}
