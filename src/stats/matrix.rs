//! Consolidated Grade Matrix
//! One row per student, one `Grade_<Test>` column per test table.

use super::calculator::{require_column, StatsError};
use crate::data::{GradeCoercer, CanonicalTable, GRADE, RESEARCH_ID};
use polars::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Column name prefix of per-test grades.
pub const GRADE_PREFIX: &str = "Grade_";

/// Wide per-student grade table keyed by `ResearchId`.
#[derive(Debug, Clone)]
pub struct ConsolidatedMatrix {
    frame: DataFrame,
}

impl ConsolidatedMatrix {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn research_ids(&self) -> Vec<i64> {
        self.frame
            .column(RESEARCH_ID)
            .ok()
            .and_then(|c| c.i64().ok().map(|ca| ca.into_iter().flatten().collect()))
            .unwrap_or_default()
    }

    /// Names of the `Grade_<Test>` columns in build order.
    pub fn grade_columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|s| s.starts_with(GRADE_PREFIX))
            .collect()
    }

    fn grade_values(&self, column: &str) -> Result<Vec<Option<f64>>, StatsError> {
        Ok(require_column(&self.frame, column)?
            .f64()?
            .into_iter()
            .collect())
    }

    fn map_grade_columns<F>(&self, f: F) -> Result<Self, StatsError>
    where
        F: Fn(Vec<Option<f64>>) -> Vec<Option<f64>>,
    {
        let mut frame = self.frame.clone();
        for name in self.grade_columns() {
            let values = f(self.grade_values(&name)?);
            frame.with_column(Column::new(name.as_str().into(), values))?;
        }
        Ok(Self { frame })
    }

    /// Copy with every missing grade set to 0.0.
    pub fn zero_filled(&self) -> Result<Self, StatsError> {
        self.map_grade_columns(|values| values.into_iter().map(|v| Some(v.unwrap_or(0.0))).collect())
    }

    /// Copy with every grade column rescaled to a percentage of its maximum,
    /// rounded to one decimal. Columns whose maximum is not positive become null.
    pub fn standardized(&self) -> Result<Self, StatsError> {
        self.map_grade_columns(|values| {
            let max = values.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
            if !(max.is_finite() && max > 0.0) {
                return vec![None; values.len()];
            }
            values
                .into_iter()
                .map(|v| v.map(|g| (g / max * 1000.0).round() / 10.0))
                .collect()
        })
    }

    /// Copy with rows stably sorted ascending by `column`, missing values last.
    pub fn sorted_by(&self, column: &str) -> Result<Self, StatsError> {
        let values = self.grade_values(column)?;
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| match (values[a], values[b]) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let idx = IdxCa::from_vec("idx".into(), order.into_iter().map(|i| i as IdxSize).collect());
        Ok(Self {
            frame: self.frame.take(&idx)?,
        })
    }

    /// Wrap a frame derived from a matrix, such as a row filter of one.
    pub(crate) fn from_frame(frame: DataFrame) -> Self {
        Self { frame }
    }
}

/// Joins per-test tables on `ResearchId`.
pub struct MatrixBuilder;

impl MatrixBuilder {
    /// Build the matrix from canonical tables, in the given order.
    pub fn build(tables: &[CanonicalTable]) -> Result<ConsolidatedMatrix, StatsError> {
        let named: Vec<(&str, &DataFrame)> = tables
            .iter()
            .map(|t| (t.name.as_str(), &t.frame))
            .collect();
        Self::build_from(&named)
    }

    /// Build the matrix from `(test name, table)` pairs.
    ///
    /// Rows are the union of all ids, ascending. A student missing from a
    /// test gets a null in that test's column.
    pub fn build_from(tables: &[(&str, &DataFrame)]) -> Result<ConsolidatedMatrix, StatsError> {
        let mut all_ids = BTreeSet::new();
        let mut per_test = Vec::with_capacity(tables.len());

        for (name, df) in tables {
            let ids = require_column(df, RESEARCH_ID)?.cast(&DataType::Int64)?;
            let grades = GradeCoercer::parse_column(require_column(df, GRADE)?)?;

            let mut by_id: HashMap<i64, Option<f64>> = HashMap::new();
            for (id, grade) in ids.i64()?.into_iter().zip(grades) {
                if let Some(id) = id {
                    all_ids.insert(id);
                    by_id.entry(id).or_insert(grade);
                }
            }
            per_test.push((format!("{GRADE_PREFIX}{name}"), by_id));
        }

        let ids: Vec<i64> = all_ids.into_iter().collect();
        let mut columns = vec![Column::new(RESEARCH_ID.into(), ids.clone())];
        for (column, by_id) in per_test {
            let values: Vec<Option<f64>> = ids
                .iter()
                .map(|id| by_id.get(id).copied().flatten())
                .collect();
            columns.push(Column::new(column.into(), values));
        }

        let frame = DataFrame::new(columns)?;
        debug!(students = frame.height(), tests = tables.len(), "built grade matrix");
        Ok(ConsolidatedMatrix { frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(m: &ConsolidatedMatrix, name: &str) -> Vec<Option<f64>> {
        m.frame().column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    fn tables() -> (DataFrame, DataFrame) {
        let test1 = df!("ResearchId" => [1i64, 2], "Grade" => [80.0, 40.0]).unwrap();
        let sumtest = df!("ResearchId" => [3i64, 2], "Grade" => [55.0, 65.0]).unwrap();
        (test1, sumtest)
    }

    #[test]
    fn ids_are_the_union() {
        let (test1, sumtest) = tables();
        let m = MatrixBuilder::build_from(&[("Test1", &test1), ("Sumtest", &sumtest)]).unwrap();

        assert_eq!(m.research_ids(), vec![1, 2, 3]);
        assert_eq!(m.grade_columns(), vec!["Grade_Test1", "Grade_Sumtest"]);
        assert_eq!(column(&m, "Grade_Test1"), vec![Some(80.0), Some(40.0), None]);
        assert_eq!(column(&m, "Grade_Sumtest"), vec![None, Some(65.0), Some(55.0)]);
    }

    #[test]
    fn build_from_canonical_tables() {
        let (test1, _) = tables();
        let table = CanonicalTable {
            name: "Test1".to_string(),
            frame: test1,
        };
        let m = MatrixBuilder::build(&[table]).unwrap();
        assert_eq!(m.height(), 2);
    }

    #[test]
    fn table_without_grade_is_rejected() {
        let bad = df!("ResearchId" => [1i64]).unwrap();
        let err = MatrixBuilder::build_from(&[("Bad", &bad)]).unwrap_err();
        assert!(matches!(err, StatsError::MissingColumn { ref column } if column == "Grade"));
    }

    #[test]
    fn zero_fill_standardize_and_sort() {
        let (test1, sumtest) = tables();
        let m = MatrixBuilder::build_from(&[("Test1", &test1), ("Sumtest", &sumtest)])
            .unwrap()
            .zero_filled()
            .unwrap();
        assert_eq!(column(&m, "Grade_Sumtest"), vec![Some(0.0), Some(65.0), Some(55.0)]);

        let m = m.standardized().unwrap();
        assert_eq!(column(&m, "Grade_Test1"), vec![Some(100.0), Some(50.0), Some(0.0)]);
        assert_eq!(column(&m, "Grade_Sumtest"), vec![Some(0.0), Some(100.0), Some(84.6)]);

        let m = m.sorted_by("Grade_Sumtest").unwrap();
        assert_eq!(m.research_ids(), vec![1, 3, 2]);
    }

    #[test]
    fn standardize_all_zero_column_is_null() {
        let t = df!("ResearchId" => [1i64], "Grade" => [0.0]).unwrap();
        let m = MatrixBuilder::build_from(&[("T", &t)]).unwrap().standardized().unwrap();
        assert_eq!(column(&m, "Grade_T"), vec![None]);
    }
}
