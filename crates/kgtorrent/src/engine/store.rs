//! In-memory table store.
//!
//! Tables are pulled from a [`TableSource`] the first time they are needed,
//! preprocessed once, and then only ever shrink. A written table whose rows
//! nothing still needs can be released: its rows are dropped while the key
//! sets of its referenced columns and its final row count are kept.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::schema::{Column, Table};
use crate::core::value::KeyValue;
use crate::error::{LoadError, Result};
use crate::snapshot::{Preprocessor, TableSource};

#[derive(Debug)]
enum TableData {
    Resident(Table),
    Released {
        columns: Vec<Column>,
        row_count: usize,
        retained_keys: HashMap<String, HashSet<KeyValue>>,
    },
}

#[derive(Debug)]
struct Entry {
    initial_rows: usize,
    written: bool,
    data: TableData,
}

/// Every loaded table of one run, keyed by entity name.
pub struct TableStore {
    source: Box<dyn TableSource>,
    preprocessor: Preprocessor,
    entries: HashMap<String, Entry>,
    load_order: Vec<String>,
}

impl TableStore {
    pub fn new(source: Box<dyn TableSource>, preprocessor: Preprocessor) -> Self {
        Self {
            source,
            preprocessor,
            entries: HashMap::new(),
            load_order: Vec::new(),
        }
    }

    /// Load `name` unless it is already resident or released.
    /// Returns true when this call loaded it.
    pub fn ensure_loaded(&mut self, name: &str) -> Result<bool> {
        if self.entries.contains_key(name) {
            return Ok(false);
        }

        let mut table = self.source.load(name)?;
        let narrowed = table.narrow_integral_floats();
        if !narrowed.is_empty() {
            debug!("{}: integral float columns loaded as integers: {:?}", name, narrowed);
        }
        self.preprocessor.apply(&mut table);
        let initial_rows = table.row_count();
        debug!("Loaded {} ({} rows)", name, initial_rows);

        self.entries.insert(
            name.to_string(),
            Entry {
                initial_rows,
                written: false,
                data: TableData::Resident(table),
            },
        );
        self.load_order.push(name.to_string());
        Ok(true)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Loaded table names, in load order.
    pub fn loaded_tables(&self) -> &[String] {
        &self.load_order
    }

    /// Resident table, `None` when not loaded or released.
    pub fn table(&self, name: &str) -> Option<&Table> {
        match self.entries.get(name).map(|e| &e.data) {
            Some(TableData::Resident(t)) => Some(t),
            _ => None,
        }
    }

    pub fn columns(&self, name: &str) -> Option<&[Column]> {
        self.entries.get(name).map(|e| match &e.data {
            TableData::Resident(t) => t.columns.as_slice(),
            TableData::Released { columns, .. } => columns.as_slice(),
        })
    }

    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|e| match &e.data {
            TableData::Resident(t) => t.row_count(),
            TableData::Released { row_count, .. } => *row_count,
        })
    }

    pub fn initial_rows(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|e| e.initial_rows)
    }

    pub fn is_written(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.written).unwrap_or(false)
    }

    pub fn is_released(&self, name: &str) -> bool {
        matches!(
            self.entries.get(name).map(|e| &e.data),
            Some(TableData::Released { .. })
        )
    }

    /// Loaded tables that have been written, in load order.
    pub fn written_tables(&self) -> Vec<String> {
        self.load_order
            .iter()
            .filter(|t| self.is_written(t))
            .cloned()
            .collect()
    }

    /// Current distinct non-null values of `table.column`.
    pub fn key_set(&self, table: &str, column: &str) -> Result<HashSet<KeyValue>> {
        let entry = self.entry(table)?;
        match &entry.data {
            TableData::Resident(t) => {
                let idx = column_index(t, column)?;
                Ok(t.key_set(idx))
            }
            TableData::Released { retained_keys, .. } => {
                retained_keys.get(column).cloned().ok_or_else(|| {
                    LoadError::Config(format!(
                        "column {}.{} was not retained when the table was released",
                        table, column
                    ))
                })
            }
        }
    }

    /// Keep rows of `table` whose `column` is null or in `keys`.
    /// Returns the number of rows removed.
    pub fn retain_matching(
        &mut self,
        table: &str,
        column: &str,
        keys: &HashSet<KeyValue>,
    ) -> Result<usize> {
        let t = self.resident_mut(table)?;
        let idx = column_index(t, column)?;
        Ok(t.retain_matching(idx, keys))
    }

    /// Self-reference filter, repeated until stable.
    pub fn retain_self_consistent(
        &mut self,
        table: &str,
        column: &str,
        referenced_column: &str,
    ) -> Result<usize> {
        let t = self.resident_mut(table)?;
        let fk = column_index(t, column)?;
        let rc = column_index(t, referenced_column)?;
        Ok(t.retain_self_consistent(fk, rc))
    }

    /// Record that `table` has been materialized. Writing is once per run.
    pub fn mark_written(&mut self, table: &str) -> Result<()> {
        let entry = self.entry_mut(table)?;
        if entry.written {
            return Err(LoadError::transfer(table, "table already written in this run"));
        }
        entry.written = true;
        Ok(())
    }

    /// Drop the rows of a written table, keeping the key sets of `keep_columns`.
    /// Returns false when the table is not written or already released.
    pub fn release(&mut self, table: &str, keep_columns: &[String]) -> bool {
        let Some(entry) = self.entries.get_mut(table) else {
            return false;
        };
        if !entry.written {
            return false;
        }
        let TableData::Resident(t) = &entry.data else {
            return false;
        };

        let retained_keys = keep_columns
            .iter()
            .filter_map(|c| t.column_index(c).map(|idx| (c.clone(), t.key_set(idx))))
            .collect();
        let released = TableData::Released {
            columns: t.columns.clone(),
            row_count: t.row_count(),
            retained_keys,
        };
        entry.data = released;
        debug!("Released rows of {}", table);
        true
    }

    fn entry(&self, table: &str) -> Result<&Entry> {
        self.entries
            .get(table)
            .ok_or_else(|| LoadError::Config(format!("table {} is not loaded", table)))
    }

    fn entry_mut(&mut self, table: &str) -> Result<&mut Entry> {
        self.entries
            .get_mut(table)
            .ok_or_else(|| LoadError::Config(format!("table {} is not loaded", table)))
    }

    fn resident_mut(&mut self, table: &str) -> Result<&mut Table> {
        match &mut self.entry_mut(table)?.data {
            TableData::Resident(t) => Ok(t),
            TableData::Released { .. } => Err(LoadError::transfer(
                table,
                "rows were released and can no longer be filtered",
            )),
        }
    }
}

fn column_index(table: &Table, column: &str) -> Result<usize> {
    table.column_index(column).ok_or_else(|| {
        LoadError::Config(format!("table {} has no column {}", table.name, column))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnType;
    use crate::core::value::Value;
    use crate::snapshot::MemorySource;

    fn store() -> TableStore {
        let users = Table::new(
            "Users",
            vec![
                Column::new("Id", ColumnType::Int),
                Column::new("UserName", ColumnType::Text),
            ],
        )
        .with_rows(vec![
            vec![Value::Int(1), Value::from("alice")],
            vec![Value::Int(2), Value::from("bob")],
        ]);
        TableStore::new(
            Box::new(MemorySource::new().with_table(users)),
            Preprocessor::none(),
        )
    }

    #[test]
    fn test_ensure_loaded_once() {
        let mut s = store();
        assert!(s.ensure_loaded("Users").unwrap());
        assert!(!s.ensure_loaded("Users").unwrap());
        assert_eq!(s.initial_rows("Users"), Some(2));
        assert_eq!(s.loaded_tables(), &["Users".to_string()]);
    }

    #[test]
    fn test_integral_float_columns_load_as_integers() {
        let kernels = Table::new(
            "Kernels",
            vec![
                Column::new("Id", ColumnType::Int),
                Column::new("CurrentKernelVersionId", ColumnType::Float),
            ],
        )
        .with_rows(vec![
            vec![Value::Int(1), Value::Float(10.0)],
            vec![Value::Int(2), Value::Null],
        ]);
        let mut s = TableStore::new(
            Box::new(MemorySource::new().with_table(kernels)),
            Preprocessor::none(),
        );
        s.ensure_loaded("Kernels").unwrap();
        assert_eq!(s.columns("Kernels").unwrap()[1].column_type, ColumnType::Int);
        assert_eq!(s.table("Kernels").unwrap().rows[0][1], Value::Int(10));
    }

    #[test]
    fn test_missing_table_is_config_error() {
        let mut s = store();
        assert!(matches!(s.ensure_loaded("Kernels"), Err(LoadError::Config(_))));
    }

    #[test]
    fn test_release_keeps_keys_and_count() {
        let mut s = store();
        s.ensure_loaded("Users").unwrap();
        assert!(!s.release("Users", &["Id".to_string()]));

        s.mark_written("Users").unwrap();
        assert!(s.release("Users", &["Id".to_string()]));
        assert!(s.is_released("Users"));
        assert!(s.table("Users").is_none());
        assert_eq!(s.row_count("Users"), Some(2));
        assert_eq!(s.key_set("Users", "Id").unwrap().len(), 2);
        assert!(s.key_set("Users", "UserName").is_err());
    }

    #[test]
    fn test_write_once() {
        let mut s = store();
        s.ensure_loaded("Users").unwrap();
        s.mark_written("Users").unwrap();
        assert!(s.mark_written("Users").is_err());
    }

    #[test]
    fn test_unknown_column() {
        let mut s = store();
        s.ensure_loaded("Users").unwrap();
        let err = s.key_set("Users", "Nope").unwrap_err();
        assert!(err.to_string().contains("no column Nope"));
    }
}
