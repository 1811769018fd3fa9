//! Load-time table fixes.
//!
//! Applied once to each table as it is loaded, before its initial row count
//! is recorded.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::{DedupeRule, PreprocessConfig, RoundRule};
use crate::core::schema::{ColumnType, Table};
use crate::core::value::Value;

/// Applies the configured dedupe and rounding rules.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    dedupe: Vec<DedupeRule>,
    round: Vec<RoundRule>,
}

impl Preprocessor {
    pub fn from_config(config: &PreprocessConfig) -> Self {
        Self {
            dedupe: config.dedupe.clone(),
            round: config.round.clone(),
        }
    }

    /// A preprocessor that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn apply(&self, table: &mut Table) {
        let name = table.name.clone();
        for rule in self.dedupe.iter().filter(|r| r.table == name) {
            match table.column_index(&rule.column) {
                Some(idx) => {
                    let removed = dedupe_on(table, idx);
                    if removed > 0 {
                        debug!("{}: dropped {} duplicate rows on {}", name, removed, rule.column);
                    }
                }
                None => warn!("{}: dedupe column {} not found", name, rule.column),
            }
        }

        for rule in self.round.iter().filter(|r| r.table == name) {
            for column in &rule.columns {
                match table.column_index(column) {
                    Some(idx) => round_column(table, idx, rule.digits),
                    None => warn!("{}: rounding column {} not found", name, column),
                }
            }
        }
    }
}

/// Keep the first row for each key value; null keys count as one value.
fn dedupe_on(table: &mut Table, idx: usize) -> usize {
    let before = table.rows.len();
    let mut seen = HashSet::new();
    table
        .rows
        .retain(|row| seen.insert(row.get(idx).and_then(Value::key)));
    before - table.rows.len()
}

/// Round to `digits` decimals; non-finite or non-numeric values become null.
/// The column becomes a float column.
fn round_column(table: &mut Table, idx: usize, digits: u32) {
    let factor = 10f64.powi(digits as i32);
    for row in &mut table.rows {
        let Some(cell) = row.get_mut(idx) else {
            continue;
        };
        let raw = match cell {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        *cell = match raw {
            Some(v) if v.is_finite() => Value::Float((v * factor).round() / factor),
            _ => Value::Null,
        };
    }
    table.columns[idx].column_type = ColumnType::Float;
}
