//! CSV Data Loader Module
//! Loads test-result exports from a folder using Polars.

use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to load CSV {path}: {source}")]
    CsvError {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error("Failed to read folder {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a folder: {0}")]
    NotADirectory(PathBuf),
}

/// Rows sampled when inferring column types.
const INFER_SCHEMA_ROWS: usize = 10000;

/// Reads CSV exports into DataFrames.
pub struct TableLoader;

impl TableLoader {
    /// Load a single CSV file.
    pub fn load_csv(path: &Path) -> Result<DataFrame, LoaderError> {
        let csv_error = |source| LoaderError::CsvError {
            path: path.to_path_buf(),
            source,
        };

        LazyCsvReader::new(path)
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            .with_ignore_errors(true)
            .finish()
            .map_err(csv_error)?
            .collect()
            .map_err(csv_error)
    }

    /// Load every `*.csv` file in `dir`, keyed by file stem.
    ///
    /// `excluding` may name files either with or without the `.csv` extension.
    pub fn load_tables(
        dir: &Path,
        excluding: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, DataFrame>, LoaderError> {
        if !dir.is_dir() {
            return Err(LoaderError::NotADirectory(dir.to_path_buf()));
        }

        let mut tables = BTreeMap::new();
        for path in Self::csv_files(dir)? {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let file_name = format!("{stem}.csv");
            if excluding.contains(&stem) || excluding.contains(&file_name) {
                debug!(file = %file_name, "excluded");
                continue;
            }

            let df = Self::load_csv(&path)?;
            debug!(table = %stem, rows = df.height(), columns = df.width(), "loaded");
            tables.insert(stem, df);
        }

        info!(dir = %dir.display(), tables = tables.len(), "loaded CSV exports");
        Ok(tables)
    }

    fn csv_files(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
        let io_error = |source| LoaderError::IoError {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if path.is_file() && is_csv {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Column names of a DataFrame as owned strings.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}
