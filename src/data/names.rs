//! Column and Table Naming Module
//! Canonicalizes column names and maps export file names to table names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Student identifier column, the only name exempt from normalization.
pub const RESEARCH_ID: &str = "ResearchId";
/// Overall grade column of a test export.
pub const GRADE: &str = "Grade";

/// Canonicalizes external column names.
pub struct NameNormalizer;

impl NameNormalizer {
    /// Normalize a single column name.
    ///
    /// `ResearchId` is returned as-is. Any other name is cut at the first `/`,
    /// title-cased word by word and stripped of whitespace, so
    /// `"Q1 /10.00"` becomes `"Q1"` and `"Started on"` becomes `"StartedOn"`.
    pub fn normalize(name: &str) -> String {
        if name == RESEARCH_ID {
            return name.to_string();
        }

        let head = name.split('/').next().unwrap_or_default();
        Self::title_case(head)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    /// Upper-case the first letter after any non-letter, lower-case the rest.
    fn title_case(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_word = false;

        for c in text.chars() {
            if c.is_alphabetic() {
                if in_word {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                in_word = true;
            } else {
                out.push(c);
                in_word = false;
            }
        }

        out
    }

    /// Whether a normalized column holds grade or question scores.
    pub fn is_score_column(name: &str) -> bool {
        name.contains(GRADE) || name.starts_with('Q')
    }
}

/// Source name → destination table name.
///
/// Names not present in the mapping keep their own name. A deserialized map
/// extends the default pairs and overrides them where the sources match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct TableNameMapping {
    names: BTreeMap<String, String>,
}

impl Default for TableNameMapping {
    fn default() -> Self {
        let names = [
            ("Formative_Test_1", "Test1"),
            ("Formative_Test_2", "Test2"),
            ("Formative_Test_3", "Test3"),
            ("Formative_Test_4", "Test4"),
            ("Formative_Mock_Test", "Mocktest"),
            ("SumTest", "Sumtest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { names }
    }
}

impl From<BTreeMap<String, String>> for TableNameMapping {
    fn from(overrides: BTreeMap<String, String>) -> Self {
        let mut mapping = Self::default();
        mapping.names.extend(overrides);
        mapping
    }
}

impl From<TableNameMapping> for BTreeMap<String, String> {
    fn from(mapping: TableNameMapping) -> Self {
        mapping.names
    }
}

impl TableNameMapping {
    /// Destination name for a source, with or without its `.csv` extension.
    pub fn destination(&self, source: &str) -> String {
        let stem = source.strip_suffix(".csv").unwrap_or(source);
        self.names
            .get(stem)
            .cloned()
            .unwrap_or_else(|| stem.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_id_passes_through() {
        assert_eq!(NameNormalizer::normalize("ResearchId"), "ResearchId");
    }

    #[test]
    fn normalizes_known_examples() {
        assert_eq!(NameNormalizer::normalize("test column"), "TestColumn");
        assert_eq!(NameNormalizer::normalize("singleWord"), "Singleword");
        assert_eq!(NameNormalizer::normalize("multi/word column"), "Multi");
        assert_eq!(NameNormalizer::normalize("Q. 1 /10.00"), "Q.1");
        assert_eq!(NameNormalizer::normalize("Grade/100.00"), "Grade");
        assert_eq!(NameNormalizer::normalize("Started on"), "StartedOn");
        assert_eq!(NameNormalizer::normalize("Time taken"), "TimeTaken");
    }

    #[test]
    fn digits_start_a_new_word() {
        assert_eq!(NameNormalizer::normalize("q1a part"), "Q1APart");
    }

    #[test]
    fn output_never_has_spaces_or_slashes() {
        let names = [
            "  spaced   out  ",
            "a/b/c",
            "research id",
            "What level programming knowledge do you have?",
            "\ttabbed\tname",
        ];
        for name in names {
            let out = NameNormalizer::normalize(name);
            assert!(!out.contains(' '), "{out:?}");
            assert!(!out.contains('/'), "{out:?}");
        }
    }

    #[test]
    fn blank_name_normalizes_to_empty() {
        assert_eq!(NameNormalizer::normalize("   "), "");
        assert_eq!(NameNormalizer::normalize("/only a unit"), "");
    }

    #[test]
    fn score_columns() {
        assert!(NameNormalizer::is_score_column("Grade"));
        assert!(NameNormalizer::is_score_column("Grade_Test1"));
        assert!(NameNormalizer::is_score_column("Q3"));
        assert!(!NameNormalizer::is_score_column("ResearchId"));
        assert!(!NameNormalizer::is_score_column("StartedOn"));
    }

    #[test]
    fn mapping_renames_known_sources_only() {
        let mapping = TableNameMapping::default();
        assert_eq!(mapping.len(), 6);
        assert_eq!(mapping.destination("Formative_Test_1"), "Test1");
        assert_eq!(mapping.destination("Formative_Mock_Test.csv"), "Mocktest");
        assert_eq!(mapping.destination("SumTest"), "Sumtest");
        assert_eq!(mapping.destination("Extra_Quiz"), "Extra_Quiz");
    }

    #[test]
    fn overrides_extend_defaults() {
        let overrides = BTreeMap::from([
            ("Quiz_A".to_string(), "QuizA".to_string()),
            ("SumTest".to_string(), "Final".to_string()),
        ]);
        let mapping = TableNameMapping::from(overrides);
        assert_eq!(mapping.len(), 7);
        assert_eq!(mapping.destination("Quiz_A"), "QuizA");
        assert_eq!(mapping.destination("SumTest"), "Final");
        assert_eq!(mapping.destination("Formative_Test_1"), "Test1");
    }
}
