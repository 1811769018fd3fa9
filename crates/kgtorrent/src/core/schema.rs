//! Table and column types for loaded snapshot entities.
//!
//! A [`Table`] owns its schema (an ordered column list fixed at load time) and
//! its rows. Row filtering mutates the table in place.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::value::{KeyValue, Row, Value};

/// Scalar type of a column, resolved once when the table is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Timestamp,
    Bool,
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as it appears in the snapshot header.
    pub name: String,

    /// Resolved column type.
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A loaded entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Entity name (`Users.csv` loads as `Users`).
    pub name: String,

    /// Column definitions, positionally aligned with every row.
    pub columns: Vec<Column>,

    /// Row data.
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Builder-style helper used by in-memory sources and tests.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Number of rows currently held.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Retype as `Int` every float column whose non-null values are all
    /// integral. CSV inference reads an id column with blanks as float, and
    /// PostgreSQL will not add a foreign key from `double precision` to `bigint`.
    /// Returns the narrowed column names.
    pub fn narrow_integral_floats(&mut self) -> Vec<String> {
        let mut narrowed = Vec::new();
        for idx in 0..self.columns.len() {
            if self.columns[idx].column_type != ColumnType::Float {
                continue;
            }
            let integral = self.rows.iter().all(|row| {
                row.get(idx)
                    .map_or(true, |v| v.is_null() || v.as_integral().is_some())
            });
            if !integral {
                continue;
            }
            for row in &mut self.rows {
                if let Some(cell) = row.get_mut(idx) {
                    if let Some(v) = cell.as_integral() {
                        *cell = Value::Int(v);
                    }
                }
            }
            self.columns[idx].column_type = ColumnType::Int;
            narrowed.push(self.columns[idx].name.clone());
        }
        narrowed
    }

    /// Distinct non-null keys of a column.
    pub fn key_set(&self, column: usize) -> HashSet<KeyValue> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::key))
            .collect()
    }

    /// Keep rows whose value in `column` is null or a member of `keys`.
    /// Returns the number of rows removed.
    pub fn retain_matching(&mut self, column: usize, keys: &HashSet<KeyValue>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| match row.get(column).and_then(Value::key) {
            None => true,
            Some(k) => keys.contains(&k),
        });
        before - self.rows.len()
    }

    /// Keep rows whose `fk` value is null or present in this table's own
    /// `referenced` column, repeating until nothing more is removed.
    /// Returns the total number of rows removed.
    pub fn retain_self_consistent(&mut self, fk: usize, referenced: usize) -> usize {
        let mut removed = 0;
        loop {
            let keys = self.key_set(referenced);
            let dropped = self.retain_matching(fk, &keys);
            if dropped == 0 {
                return removed;
            }
            removed += dropped;
        }
    }
}
