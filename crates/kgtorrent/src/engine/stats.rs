//! Per-table retention after resolution.

use serde::Serialize;

use super::RunState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    /// Rows after load-time preprocessing.
    pub initial_rows: usize,
    pub final_rows: usize,
    /// `final / initial * 100`, two decimals. 100 for empty tables.
    pub ratio: f64,
}

/// Stats for every loaded table, in load order.
pub fn collect_stats(state: &RunState) -> Vec<TableStats> {
    state
        .store
        .loaded_tables()
        .iter()
        .map(|table| {
            let initial_rows = state.store.initial_rows(table).unwrap_or(0);
            let final_rows = state.store.row_count(table).unwrap_or(0);
            TableStats {
                table: table.clone(),
                initial_rows,
                final_rows,
                ratio: retention_ratio(initial_rows, final_rows),
            }
        })
        .collect()
}

fn retention_ratio(initial: usize, remaining: usize) -> f64 {
    if initial == 0 {
        return 100.0;
    }
    (remaining as f64 / initial as f64 * 10_000.0).round() / 100.0
}
