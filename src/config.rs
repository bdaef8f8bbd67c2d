//! Application configuration
//!
//! Every field has a default, so the TOML file is optional and may set only
//! the values it wants to change.

use crate::data::TableNameMapping;
use crate::stats::{HardworkingCriteria, DEFAULT_HIGH, DEFAULT_LOW, DEFAULT_MIN_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: PathBuf,
    pub data_dir: PathBuf,
    pub exclude_files: Vec<String>,
    pub chart_dir: PathBuf,
    /// Columns removed from every cleaned table, by normalized name.
    pub drop_columns: Vec<String>,
    pub table_names: TableNameMapping,
    pub underperforming: UnderperformingConfig,
    pub hardworking: HardworkingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("Resultdatabase.db"),
            data_dir: PathBuf::from("TestResult Folder"),
            exclude_files: vec!["StudentRate.csv".to_string()],
            chart_dir: PathBuf::from("charts"),
            drop_columns: vec!["State".to_string(), "TimeTaken".to_string()],
            table_names: TableNameMapping::default(),
            underperforming: UnderperformingConfig::default(),
            hardworking: HardworkingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn excluded(&self) -> BTreeSet<String> {
        self.exclude_files.iter().cloned().collect()
    }

    /// The ratings export, resolved against `data_dir` when relative.
    pub fn ratings_path(&self) -> PathBuf {
        if self.hardworking.ratings_file.is_absolute() {
            self.hardworking.ratings_file.clone()
        } else {
            self.data_dir.join(&self.hardworking.ratings_file)
        }
    }
}

/// Settings of the underperforming-student report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderperformingConfig {
    /// Stored tables joined into the grade matrix, in column order.
    pub tables: Vec<String>,
    pub low: f64,
    pub high: f64,
    pub min_count: usize,
    pub sort_by: String,
    /// Matrix columns that get a grade band label.
    pub highlight: Vec<String>,
}

impl Default for UnderperformingConfig {
    fn default() -> Self {
        Self {
            tables: ["Test1", "Test2", "Test3", "Test4", "Mocktest", "Sumtest"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            min_count: DEFAULT_MIN_COUNT,
            sort_by: "Grade_Sumtest".to_string(),
            highlight: (1..=4).map(|i| format!("Grade_Test{i}")).collect(),
        }
    }
}

/// Settings of the hardworking-student report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardworkingConfig {
    pub ratings_file: PathBuf,
    /// Stored table holding the summative grades.
    pub table: String,
    #[serde(flatten)]
    pub criteria: HardworkingCriteria,
}

impl Default for HardworkingConfig {
    fn default() -> Self {
        Self {
            ratings_file: PathBuf::from("StudentRate.csv"),
            table: "Sumtest".to_string(),
            criteria: HardworkingCriteria::default(),
        }
    }
}
