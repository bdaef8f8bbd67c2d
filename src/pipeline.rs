//! Ingestion pipeline
//! load → process → rename → transfer, plus access to original and
//! processed tables by name.

use crate::config::AppConfig;
use crate::data::{CanonicalTable, LoaderError, ProcessorError, TableLoader, TableNameMapping, TableProcessor};
use crate::store::{SqliteStore, StoreError, TypeHints};
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no original table named '{0}'")]
    MissingOriginal(String),
}

/// A table whose cleaning pass failed.
#[derive(Debug)]
pub struct TableFailure {
    /// Source name (file stem).
    pub source: String,
    pub error: ProcessorError,
}

/// Outcome of loading and cleaning one folder.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Raw tables keyed by source name.
    pub originals: BTreeMap<String, DataFrame>,
    /// Cleaned tables under their destination names.
    pub tables: Vec<CanonicalTable>,
    pub failures: Vec<TableFailure>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of writing tables to the store.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// `(name, rows)` of every stored table.
    pub stored: Vec<(String, usize)>,
    pub failed: Vec<(String, StoreError)>,
}

impl TransferReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cleans raw exports and hands them to the store.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    processor: TableProcessor,
    names: TableNameMapping,
}

impl Pipeline {
    pub fn new(processor: TableProcessor, names: TableNameMapping) -> Self {
        Self { processor, names }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let processor = TableProcessor::new().with_drop_columns(config.drop_columns.clone());
        Self::new(processor, config.table_names.clone())
    }

    /// Clean every table. A schema error only fails its own table.
    pub fn process_all(&self, originals: &BTreeMap<String, DataFrame>) -> (Vec<CanonicalTable>, Vec<TableFailure>) {
        let mut tables = Vec::new();
        let mut failures = Vec::new();

        for (source, df) in originals {
            let destination = self.names.destination(source);
            match self.processor.process(&destination, df) {
                Ok(table) => tables.push(table),
                Err(error) => {
                    warn!(table = %source, %error, "table rejected");
                    failures.push(TableFailure {
                        source: source.clone(),
                        error,
                    });
                }
            }
        }

        (tables, failures)
    }

    /// Load and clean every CSV export in `dir`.
    pub fn ingest(&self, dir: &Path, excluding: &BTreeSet<String>) -> Result<IngestReport, PipelineError> {
        let originals = TableLoader::load_tables(dir, excluding)?;
        let (tables, failures) = self.process_all(&originals);
        info!(processed = tables.len(), failed = failures.len(), "ingested");

        Ok(IngestReport {
            originals,
            tables,
            failures,
        })
    }

    /// Store each table. A storage failure is recorded and the remaining
    /// tables are still stored.
    pub fn transfer(store: &mut SqliteStore, tables: &[CanonicalTable]) -> TransferReport {
        let mut report = TransferReport::default();

        for table in tables {
            let hints = TypeHints::for_columns(&table.column_names());
            match store.create_and_store(table, &hints) {
                Ok(()) => {
                    info!(table = %table.name, rows = table.height(), "transferred");
                    report.stored.push((table.name.clone(), table.height()));
                }
                Err(error) => {
                    warn!(table = %table.name, %error, "transfer failed");
                    report.failed.push((table.name.clone(), error));
                }
            }
        }

        report
    }
}

/// Which version of a table to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    /// Cleaned table in the store, by destination name.
    Processed(String),
    /// Raw CSV export, by source name.
    Original(String),
}

/// An open store plus the CSV folder it was built from.
pub struct Session {
    store: SqliteStore,
    data_dir: PathBuf,
    excluding: BTreeSet<String>,
    originals: Option<BTreeMap<String, DataFrame>>,
}

impl Session {
    pub fn new(store: SqliteStore, data_dir: PathBuf, excluding: BTreeSet<String>) -> Self {
        Self {
            store,
            data_dir,
            excluding,
            originals: None,
        }
    }

    pub fn open(config: &AppConfig) -> Result<Self, PipelineError> {
        let store = SqliteStore::open(&config.database)?;
        Ok(Self::new(store, config.data_dir.clone(), config.excluded()))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    /// Fetch a table. Original tables are read from disk once per session.
    pub fn table(&mut self, table: &TableRef) -> Result<DataFrame, PipelineError> {
        match table {
            TableRef::Processed(name) => Ok(self.store.read_table(name)?),
            TableRef::Original(name) => {
                if self.originals.is_none() {
                    self.originals = Some(TableLoader::load_tables(&self.data_dir, &self.excluding)?);
                }
                self.originals
                    .as_ref()
                    .and_then(|tables| tables.get(name))
                    .cloned()
                    .ok_or_else(|| PipelineError::MissingOriginal(name.clone()))
            }
        }
    }

    pub fn close(self) -> Result<(), PipelineError> {
        Ok(self.store.close()?)
    }
}
