//! Reports over the stored tables.

use crate::config::{HardworkingConfig, UnderperformingConfig};
use crate::data::{column_names, GRADE, RESEARCH_ID};
use crate::stats::{
    ColumnScore, ConsolidatedMatrix, GradeBand, HardworkingFilter, MatrixBuilder, StatsCalculator, StatsError,
    ThresholdFilter, RATINGS, SUMTEST_GRADE,
};
use crate::store::{SqliteStore, StoreError};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
}

/// A student's grade in one stored table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub table: String,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResults {
    pub research_id: i64,
    pub results: Vec<TestResult>,
}

impl StudentResults {
    pub fn has_results(&self) -> bool {
        self.results.iter().any(|r| r.grade.is_some())
    }
}

/// The student's `Grade` in every stored table that has one.
pub fn student_results(store: &SqliteStore, id: i64) -> Result<StudentResults, ReportError> {
    let mut results = Vec::new();
    for table in store.list_table_names()? {
        let columns = store.column_names(&table)?;
        if !columns.iter().any(|c| c == RESEARCH_ID) || !columns.iter().any(|c| c == GRADE) {
            debug!(%table, "no grades, skipped");
            continue;
        }
        let grade = store.grade_for(&table, id)?;
        results.push(TestResult { table, grade });
    }

    Ok(StudentResults {
        research_id: id,
        results,
    })
}

/// Standardized score of one question next to the class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionPerformance {
    pub question: String,
    /// Highest raw score in the class.
    pub max: Option<f64>,
    /// Student and class average, as percentages of `max`.
    pub score: ColumnScore,
    pub relative: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub research_id: i64,
    pub table: String,
    /// Whether the student has a row in the table.
    pub found: bool,
    pub questions: Vec<QuestionPerformance>,
}

fn has_student(df: &DataFrame, id: i64) -> Result<bool, ReportError> {
    let Ok(ids) = df.column(RESEARCH_ID) else {
        return Ok(false);
    };
    let ids = ids.cast(&DataType::Int64)?;
    let found = ids.i64()?.into_iter().any(|v| v == Some(id));
    Ok(found)
}

/// Per-question standardized grade, class average and relative performance.
pub fn question_performance(store: &SqliteStore, table: &str, id: i64) -> Result<PerformanceReport, ReportError> {
    let df = store.read_table(table)?;
    let found = has_student(&df, id)?;

    let mut questions = Vec::new();
    for question in StatsCalculator::question_columns(&df) {
        let max = StatsCalculator::max_of(&df, &question)?;
        let raw = StatsCalculator::grade_and_average(&df, id, &question)?;
        let score = max
            .map(|m| StatsCalculator::standardize_scores(raw, m))
            .unwrap_or_default();
        questions.push(QuestionPerformance {
            relative: score.relative(),
            question,
            max,
            score,
        });
    }

    Ok(PerformanceReport {
        research_id: id,
        table: table.to_string(),
        found,
        questions,
    })
}

/// One flagged student with standardized grades per test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedStudent {
    pub research_id: i64,
    pub grades: BTreeMap<String, Option<f64>>,
    /// Band of each highlighted column.
    pub bands: BTreeMap<String, Option<GradeBand>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnderperformingReport {
    pub columns: Vec<String>,
    pub low: f64,
    pub high: f64,
    pub min_count: usize,
    pub students: Vec<FlaggedStudent>,
}

/// Build, zero-fill and standardize the grade matrix, keep students with
/// enough low grades, and sort them.
pub fn underperforming_matrix(
    tables: &[(&str, &DataFrame)],
    config: &UnderperformingConfig,
) -> Result<ConsolidatedMatrix, ReportError> {
    let matrix = MatrixBuilder::build_from(tables)?
        .zero_filled()?
        .standardized()?;
    let flagged = ThresholdFilter::flag_low_performers_in(&matrix, config.low, config.high, config.min_count)?;
    Ok(flagged.sorted_by(&config.sort_by)?)
}

fn column_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, ReportError> {
    Ok(df.column(name)?.f64()?.into_iter().collect())
}

pub fn underperforming(store: &SqliteStore, config: &UnderperformingConfig) -> Result<UnderperformingReport, ReportError> {
    let frames = config
        .tables
        .iter()
        .map(|name| store.read_table(name))
        .collect::<Result<Vec<_>, _>>()?;
    let named: Vec<(&str, &DataFrame)> = config.tables.iter().map(String::as_str).zip(frames.iter()).collect();

    let matrix = underperforming_matrix(&named, config)?;
    let columns = matrix.grade_columns();
    let ids = matrix.research_ids();

    let mut values = BTreeMap::new();
    for column in &columns {
        values.insert(column.clone(), column_values(matrix.frame(), column)?);
    }

    let students = ids
        .into_iter()
        .enumerate()
        .map(|(row, research_id)| {
            let grades: BTreeMap<String, Option<f64>> = values
                .iter()
                .map(|(column, v)| (column.clone(), v[row]))
                .collect();
            let bands = config
                .highlight
                .iter()
                .filter_map(|column| {
                    grades
                        .get(column)
                        .map(|grade| (column.clone(), grade.and_then(GradeBand::classify)))
                })
                .collect();
            FlaggedStudent {
                research_id,
                grades,
                bands,
            }
        })
        .collect();

    Ok(UnderperformingReport {
        columns,
        low: config.low,
        high: config.high,
        min_count: config.min_count,
        students,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardworkingStudent {
    pub research_id: i64,
    pub grade: f64,
    pub rating: String,
}

/// Beginners who did well on the summative test.
pub fn hardworking(
    store: &SqliteStore,
    ratings: &DataFrame,
    config: &HardworkingConfig,
) -> Result<Vec<HardworkingStudent>, ReportError> {
    let sumtest = store.read_table(&config.table)?;
    let df = HardworkingFilter::select(ratings, &sumtest, &config.criteria)?;
    debug!(columns = ?column_names(&df), rows = df.height(), "hardworking list");

    let ids = df.column(RESEARCH_ID)?.i64()?.clone();
    let grades = df.column(SUMTEST_GRADE)?.f64()?.clone();
    let labels = df.column(RATINGS)?.str()?.clone();

    let students = ids
        .into_iter()
        .zip(grades.into_iter())
        .zip(labels.into_iter())
        .filter_map(|((id, grade), rating)| {
            Some(HardworkingStudent {
                research_id: id?,
                grade: grade?,
                rating: rating?.to_string(),
            })
        })
        .collect();
    Ok(students)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CanonicalTable;
    use crate::store::TypeHints;

    fn store_with(tables: &[(&str, DataFrame)]) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for (name, frame) in tables {
            let table = CanonicalTable {
                name: name.to_string(),
                frame: frame.clone(),
            };
            let hints = TypeHints::for_columns(&table.column_names());
            store.create_and_store(&table, &hints).unwrap();
        }
        store
    }

    #[test]
    fn results_cover_every_graded_table() {
        let store = store_with(&[
            ("Test1", df!("ResearchId" => [1i64, 2], "Grade" => [80.0, 60.0]).unwrap()),
            ("Test2", df!("ResearchId" => [2i64], "Grade" => [70.0]).unwrap()),
            ("Notes", df!("ResearchId" => [1i64], "Text" => ["x"]).unwrap()),
        ]);

        let report = student_results(&store, 1).unwrap();
        assert_eq!(
            report.results,
            vec![
                TestResult { table: "Test1".to_string(), grade: Some(80.0) },
                TestResult { table: "Test2".to_string(), grade: None },
            ]
        );
        assert!(report.has_results());
        assert!(!student_results(&store, 9).unwrap().has_results());
    }

    #[test]
    fn question_performance_is_standardized() {
        let store = store_with(&[(
            "Test1",
            df!(
                "ResearchId" => [1i64, 2],
                "Grade" => [50.0, 100.0],
                "Q1" => [5.0, 10.0],
                "Q2" => [2.0, 0.0],
            )
            .unwrap(),
        )]);

        let report = question_performance(&store, "Test1", 1).unwrap();
        assert!(report.found);
        assert_eq!(report.questions.len(), 2);

        let q1 = &report.questions[0];
        assert_eq!(q1.question, "Q1");
        assert_eq!(q1.max, Some(10.0));
        assert_eq!(q1.score.value, Some(50.0));
        assert_eq!(q1.score.average, Some(75.0));
        assert_eq!(q1.relative, Some(-25.0));

        let q2 = &report.questions[1];
        assert_eq!(q2.score.value, Some(100.0));
        assert_eq!(q2.relative, Some(50.0));
    }

    #[test]
    fn question_performance_for_absent_student() {
        let store = store_with(&[("Test1", df!("ResearchId" => [1i64], "Grade" => [5.0], "Q1" => [5.0]).unwrap())]);
        let report = question_performance(&store, "Test1", 4).unwrap();
        assert!(!report.found);
        assert_eq!(report.questions[0].score, ColumnScore::default());
        assert_eq!(report.questions[0].relative, None);
    }

    #[test]
    fn underperforming_flags_and_bands() {
        let config = UnderperformingConfig {
            tables: vec!["Test1".into(), "Test2".into(), "Sumtest".into()],
            min_count: 2,
            sort_by: "Grade_Sumtest".into(),
            highlight: vec!["Grade_Test1".into(), "Grade_Test2".into()],
            ..UnderperformingConfig::default()
        };
        let store = store_with(&[
            ("Test1", df!("ResearchId" => [1i64, 2, 3], "Grade" => [20.0, 100.0, 30.0]).unwrap()),
            ("Test2", df!("ResearchId" => [1i64, 2, 3], "Grade" => [40.0, 100.0, 10.0]).unwrap()),
            ("Sumtest", df!("ResearchId" => [1i64, 2, 3], "Grade" => [90.0, 100.0, 40.0]).unwrap()),
        ]);

        let report = underperforming(&store, &config).unwrap();
        let ids: Vec<i64> = report.students.iter().map(|s| s.research_id).collect();
        assert_eq!(ids, vec![3, 1]);

        let first = &report.students[0];
        assert_eq!(first.grades["Grade_Test1"], Some(30.0));
        assert_eq!(first.bands["Grade_Test1"], Some(GradeBand::Low));
        assert!(!first.bands.contains_key("Grade_Sumtest"));
    }

    #[test]
    fn underperforming_needs_configured_tables() {
        let store = store_with(&[]);
        let err = underperforming(&store, &UnderperformingConfig::default()).unwrap_err();
        assert!(matches!(err, ReportError::Store(StoreError::MissingTable(_))));
    }

    #[test]
    fn hardworking_reads_sumtest_from_store() {
        let store = store_with(&[("Sumtest", df!("ResearchId" => [1i64, 2], "Grade" => [75.0, 95.0]).unwrap())]);
        let ratings = df!(
            "research id" => [1i64, 2],
            "What level programming knowledge do you have?" => ["Beginner", "Advanced"],
        )
        .unwrap();

        let students = hardworking(&store, &ratings, &HardworkingConfig::default()).unwrap();
        assert_eq!(
            students,
            vec![HardworkingStudent {
                research_id: 1,
                grade: 75.0,
                rating: "Beginner".to_string(),
            }]
        );
    }
}
