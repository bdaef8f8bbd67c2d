//! Store module - SQLite persistence of cleaned tables

mod hints;
mod sqlite;

pub use hints::{SqlType, TypeHints};
pub use sqlite::{SqliteStore, StoreError};
