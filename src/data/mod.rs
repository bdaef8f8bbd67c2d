//! Data module - CSV loading and cleaning

mod coerce;
mod loader;
mod names;
mod processor;

pub use coerce::{is_numeric_dtype, GradeCoercer, MISSING_SENTINEL};
pub use loader::{column_names, LoaderError, TableLoader};
pub use names::{NameNormalizer, TableNameMapping, GRADE, RESEARCH_ID};
pub use processor::{CanonicalTable, Deduplicator, ProcessorError, TableProcessor};
