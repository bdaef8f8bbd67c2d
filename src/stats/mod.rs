//! Statistics module - aggregation, grade matrix and threshold filters

mod calculator;
mod filter;
mod matrix;

pub use calculator::{ColumnScore, GradeStandardizer, StatsCalculator, StatsError};
pub use filter::{
    GradeBand, HardworkingCriteria, HardworkingFilter, ThresholdFilter, DEFAULT_HIGH, DEFAULT_LOW,
    DEFAULT_MIN_COUNT, RATINGS, SUMTEST_GRADE,
};
pub use matrix::{ConsolidatedMatrix, MatrixBuilder, GRADE_PREFIX};
