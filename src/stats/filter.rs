//! Threshold Filters
//! Count-and-compare row filters and grade band classification.

use super::calculator::{require_column, StatsError};
use super::matrix::ConsolidatedMatrix;
use crate::data::{GradeCoercer, RESEARCH_ID};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Inclusive grade range counted as "low" by default.
pub const DEFAULT_LOW: f64 = 1.0;
pub const DEFAULT_HIGH: f64 = 49.0;
/// Low grades needed before a student is flagged.
pub const DEFAULT_MIN_COUNT: usize = 3;

/// Keeps rows by counting matching grades.
pub struct ThresholdFilter;

impl ThresholdFilter {
    /// Per-row count of `columns` whose value satisfies `predicate`.
    /// Missing values never match.
    pub fn match_counts<P>(df: &DataFrame, columns: &[String], predicate: P) -> Result<Vec<usize>, StatsError>
    where
        P: Fn(f64) -> bool,
    {
        let mut counts = vec![0usize; df.height()];
        for name in columns {
            let values = GradeCoercer::parse_column(require_column(df, name)?)?;
            for (count, value) in counts.iter_mut().zip(values) {
                if value.is_some_and(&predicate) {
                    *count += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Keep rows where at least `min_count` of `columns` satisfy `predicate`.
    pub fn count_and_filter<P>(
        df: &DataFrame,
        columns: &[String],
        predicate: P,
        min_count: usize,
    ) -> Result<DataFrame, StatsError>
    where
        P: Fn(f64) -> bool,
    {
        let keep: Vec<bool> = Self::match_counts(df, columns, predicate)?
            .into_iter()
            .map(|c| c >= min_count)
            .collect();
        Ok(df.filter(&BooleanChunked::from_slice("mask".into(), &keep))?)
    }

    /// Keep rows with at least `min_count` grades in `[low, high]`.
    pub fn flag_low_performers(
        df: &DataFrame,
        columns: &[String],
        low: f64,
        high: f64,
        min_count: usize,
    ) -> Result<DataFrame, StatsError> {
        Self::count_and_filter(df, columns, |v| (low..=high).contains(&v), min_count)
    }

    /// [`Self::flag_low_performers`] over every grade column of a matrix.
    pub fn flag_low_performers_in(
        matrix: &ConsolidatedMatrix,
        low: f64,
        high: f64,
        min_count: usize,
    ) -> Result<ConsolidatedMatrix, StatsError> {
        let frame = Self::flag_low_performers(matrix.frame(), &matrix.grade_columns(), low, high, min_count)?;
        Ok(ConsolidatedMatrix::from_frame(frame))
    }
}

/// Band a standardized grade falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GradeBand {
    /// `[0, 50)`
    Low,
    /// `[50, 70)`
    Middle,
    /// `70` and above
    High,
}

impl GradeBand {
    pub fn classify(value: f64) -> Option<GradeBand> {
        if value >= 70.0 {
            Some(GradeBand::High)
        } else if value >= 50.0 {
            Some(GradeBand::Middle)
        } else if value >= 0.0 {
            Some(GradeBand::Low)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GradeBand::Low => "low",
            GradeBand::Middle => "middle",
            GradeBand::High => "high",
        }
    }
}

/// Self-rating and grade rules for the hardworking list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardworkingCriteria {
    /// Identifier column of the ratings export.
    pub id_column: String,
    /// Self-reported skill column of the ratings export.
    pub rating_column: String,
    /// Ratings that count as a beginner.
    pub ratings: Vec<String>,
    /// Grades strictly above this qualify.
    pub min_grade: f64,
}

impl Default for HardworkingCriteria {
    fn default() -> Self {
        Self {
            id_column: "research id".to_string(),
            rating_column: "What level programming knowledge do you have?".to_string(),
            ratings: vec!["Below Beginner".to_string(), "Beginner".to_string()],
            min_grade: 60.0,
        }
    }
}

/// Output column holding the summative grade in the hardworking list.
pub const SUMTEST_GRADE: &str = "Grade_SumTest";
/// Output column holding the self-rating in the hardworking list.
pub const RATINGS: &str = "Ratings";

/// Beginners who still scored well on the summative test.
pub struct HardworkingFilter;

impl HardworkingFilter {
    /// Join `ratings` with `sumtest` on the student id and keep beginners whose
    /// summative grade exceeds the floor, best grade first.
    ///
    /// Output columns: `ResearchId`, `Grade_SumTest`, `Ratings`.
    pub fn select(
        ratings: &DataFrame,
        sumtest: &DataFrame,
        criteria: &HardworkingCriteria,
    ) -> Result<DataFrame, StatsError> {
        let grades_by_id = Self::grades_by_id(sumtest)?;

        let rating_ids = require_column(ratings, &criteria.id_column)?.cast(&DataType::Int64)?;
        let rating_text = require_column(ratings, &criteria.rating_column)?.cast(&DataType::String)?;

        let mut rows: Vec<(i64, f64, String)> = Vec::new();
        for (id, rating) in rating_ids.i64()?.into_iter().zip(rating_text.str()?.into_iter()) {
            let (Some(id), Some(rating)) = (id, rating) else {
                continue;
            };
            let rating = rating.trim();
            let Some(&grade) = grades_by_id.get(&id) else {
                continue;
            };
            if criteria.ratings.iter().any(|r| r == rating) && grade > criteria.min_grade {
                rows.push((id, grade, rating.to_string()));
            }
        }
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let df = DataFrame::new(vec![
            Column::new(RESEARCH_ID.into(), rows.iter().map(|r| r.0).collect::<Vec<_>>()),
            Column::new(SUMTEST_GRADE.into(), rows.iter().map(|r| r.1).collect::<Vec<_>>()),
            Column::new(RATINGS.into(), rows.iter().map(|r| r.2.clone()).collect::<Vec<_>>()),
        ])?;
        Ok(df)
    }

    fn grades_by_id(sumtest: &DataFrame) -> Result<HashMap<i64, f64>, StatsError> {
        let ids = require_column(sumtest, RESEARCH_ID)?.cast(&DataType::Int64)?;
        let grades = GradeCoercer::parse_column(require_column(sumtest, crate::data::GRADE)?)?;

        let mut by_id = HashMap::new();
        for (id, grade) in ids.i64()?.into_iter().zip(grades) {
            if let (Some(id), Some(grade)) = (id, grade) {
                by_id.entry(id).or_insert(grade);
            }
        }
        Ok(by_id)
    }
}
