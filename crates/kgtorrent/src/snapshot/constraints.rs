//! Constraint declaration file.
//!
//! Header `Table,Foreign Key,Referenced Table,Referenced Column` with an
//! optional `Resolve` column (`true`/`false`, blank means `true`). Table
//! names may carry a `.csv` suffix.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::reader::{Format, ReaderBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use tracing::info;

use crate::core::identifier::entity_name;
use crate::engine::catalog::{Constraint, ConstraintCatalog, ConstraintMode};
use crate::error::{LoadError, Result};

const TABLE: &str = "Table";
const FOREIGN_KEY: &str = "Foreign Key";
const REFERENCED_TABLE: &str = "Referenced Table";
const REFERENCED_COLUMN: &str = "Referenced Column";
const RESOLVE: &str = "Resolve";

/// Read the declaration file at `path`.
pub fn load_constraints(path: &Path) -> Result<ConstraintCatalog> {
    if !path.is_file() {
        return Err(LoadError::Config(format!(
            "constraints file not found: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    let catalog = parse_constraints(&text)?;
    info!(
        "Loaded {} constraints over {} tables from {}",
        catalog.len(),
        catalog.tables().len(),
        path.display()
    );
    Ok(catalog)
}

/// Parse declaration text. An empty declaration is a configuration failure.
pub fn parse_constraints(text: &str) -> Result<ConstraintCatalog> {
    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(Cursor::new(text.as_bytes()), Some(0))?;

    // Read every column as text regardless of what inference guessed.
    let headers: Vec<String> = inferred
        .fields()
        .iter()
        .map(|f| f.name().trim().to_string())
        .collect();
    let schema = Schema::new(
        headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LoadError::Config(format!("constraints file is missing column '{}'", name)))
    };
    let table_idx = position(TABLE)?;
    let fk_idx = position(FOREIGN_KEY)?;
    let ref_table_idx = position(REFERENCED_TABLE)?;
    let ref_column_idx = position(REFERENCED_COLUMN)?;
    let resolve_idx = headers.iter().position(|h| h == RESOLVE);

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(Cursor::new(text.as_bytes()))?;

    let mut constraints = Vec::new();
    let mut line = 1;
    for batch in reader {
        let batch = batch?;
        for row in 0..batch.num_rows() {
            line += 1;
            let cell = |idx: usize| -> Option<String> {
                let array = batch.column(idx);
                if array.is_null(row) {
                    return None;
                }
                let v = array.as_string::<i32>().value(row).trim();
                (!v.is_empty()).then(|| v.to_string())
            };
            let required = |idx: usize, name: &str| {
                cell(idx).ok_or_else(|| {
                    LoadError::Config(format!(
                        "constraints file line {}: '{}' is empty",
                        line, name
                    ))
                })
            };

            let mode = match resolve_idx.and_then(cell) {
                None => ConstraintMode::Resolve,
                Some(v) => parse_mode(&v).ok_or_else(|| {
                    LoadError::Config(format!(
                        "constraints file line {}: invalid Resolve value '{}'",
                        line, v
                    ))
                })?,
            };

            constraints.push(
                Constraint::new(
                    entity_name(&required(table_idx, TABLE)?),
                    required(fk_idx, FOREIGN_KEY)?,
                    entity_name(&required(ref_table_idx, REFERENCED_TABLE)?),
                    required(ref_column_idx, REFERENCED_COLUMN)?,
                )
                .with_mode(mode),
            );
        }
    }

    if constraints.is_empty() {
        return Err(LoadError::Config(
            "constraints file declares no constraints".into(),
        ));
    }
    Ok(ConstraintCatalog::new(constraints))
}

fn parse_mode(raw: &str) -> Option<ConstraintMode> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(ConstraintMode::Resolve),
        "false" | "no" | "0" => Some(ConstraintMode::HardenOnly),
        _ => None,
    }
}
