//! Snapshot ingestion: entity tables and constraint declarations.
//!
//! - [`csv`]: CSV directory source (one file per entity)
//! - [`constraints`]: constraint declaration file parsing
//! - [`preprocess`]: load-time table fixes (dedupe, rounding)

pub mod constraints;
pub mod csv;
pub mod preprocess;

pub use self::csv::CsvDirectory;
pub use constraints::{load_constraints, parse_constraints};
pub use preprocess::Preprocessor;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::schema::Table;
use crate::error::{LoadError, Result};

/// Supplies entity tables by name.
///
/// Loading is synchronous: resolution runs on one thread and pulls tables
/// lazily the first time the constraint graph reaches them.
pub trait TableSource: Send + Sync {
    /// Entity names available in the snapshot.
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Load one entity table with all its rows.
    ///
    /// A table that does not exist in the snapshot is a configuration failure.
    fn load(&self, name: &str) -> Result<Table>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

impl<T: TableSource + ?Sized> TableSource for Arc<T> {
    fn list_tables(&self) -> Result<Vec<String>> {
        (**self).list_tables()
    }

    fn load(&self, name: &str) -> Result<Table> {
        (**self).load(name)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory source, keyed by entity name.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    tables: BTreeMap<String, Table>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }
}

impl TableSource for MemorySource {
    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn load(&self, name: &str) -> Result<Table> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::Config(format!("table {} not found in snapshot", name)))
    }

    fn describe(&self) -> String {
        format!("memory ({} tables)", self.tables.len())
    }
}
