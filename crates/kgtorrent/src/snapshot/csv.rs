//! CSV directory source.
//!
//! Column types are inferred with Arrow's CSV schema inference and then
//! narrowed to the loader's column types: integers, floats and booleans keep
//! their type, everything else is text. Columns whose name ends with the
//! configured date suffix are read as text and parsed into timestamps with
//! the configured chrono formats; values that match no format become null.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::reader::{Format, ReaderBuilder};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use super::TableSource;
use crate::config::SourceConfig;
use crate::core::identifier::entity_name;
use crate::core::schema::{Column, ColumnType, Table};
use crate::core::value::{Row, Value};
use crate::error::{LoadError, Result};
use crate::typemap::arrow_to_column_type;

const READ_BATCH_SIZE: usize = 8192;

/// A directory holding one CSV file per entity (`Users.csv` -> `Users`).
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    root: PathBuf,
    date_suffix: String,
    date_formats: Vec<String>,
    infer_rows: Option<usize>,
}

impl CsvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            date_suffix: "Date".to_string(),
            date_formats: crate::config::default_date_formats(),
            infer_rows: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            root: config.path.clone(),
            date_suffix: config.date_suffix.clone(),
            date_formats: config.date_formats.clone(),
            infer_rows: config.infer_rows,
        }
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.csv", entity_name(name)))
    }

    fn is_date_column(&self, name: &str) -> bool {
        !self.date_suffix.is_empty() && name.ends_with(&self.date_suffix)
    }

    /// Infer the reading schema and the column list for a file.
    fn resolve_schema(&self, path: &Path) -> Result<(Arc<Schema>, Vec<Column>)> {
        let mut file = File::open(path)?;
        let (inferred, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, self.infer_rows)?;

        let mut fields = Vec::with_capacity(inferred.fields().len());
        let mut columns = Vec::with_capacity(inferred.fields().len());
        for field in inferred.fields() {
            let column_type = if self.is_date_column(field.name()) {
                ColumnType::Timestamp
            } else {
                arrow_to_column_type(field.data_type())
            };
            let read_type = match column_type {
                ColumnType::Int => DataType::Int64,
                ColumnType::Float => DataType::Float64,
                ColumnType::Bool => DataType::Boolean,
                ColumnType::Text | ColumnType::Timestamp => DataType::Utf8,
            };
            fields.push(Field::new(field.name(), read_type, true));
            columns.push(Column::new(field.name().clone(), column_type));
        }

        Ok((Arc::new(Schema::new(fields)), columns))
    }

    fn parse_timestamp(&self, raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        for fmt in &self.date_formats {
            if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(ts);
            }
            if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
                return date.and_hms_opt(0, 0, 0);
            }
        }
        None
    }

    fn append_batch(&self, batch: &RecordBatch, columns: &[Column], rows: &mut Vec<Row>) {
        let start = rows.len();
        rows.extend((0..batch.num_rows()).map(|_| Vec::with_capacity(columns.len())));

        for (idx, column) in columns.iter().enumerate() {
            let array = batch.column(idx);
            for (offset, row) in rows[start..].iter_mut().enumerate() {
                let value = if array.is_null(offset) {
                    Value::Null
                } else {
                    match column.column_type {
                        ColumnType::Int => Value::Int(array.as_primitive::<Int64Type>().value(offset)),
                        ColumnType::Float => {
                            Value::Float(array.as_primitive::<Float64Type>().value(offset))
                        }
                        ColumnType::Bool => Value::Bool(array.as_boolean().value(offset)),
                        ColumnType::Text => {
                            Value::Text(array.as_string::<i32>().value(offset).to_string())
                        }
                        ColumnType::Timestamp => self
                            .parse_timestamp(array.as_string::<i32>().value(offset))
                            .map_or(Value::Null, Value::Timestamp),
                    }
                };
                row.push(value);
            }
        }
    }
}

impl TableSource for CsvDirectory {
    fn list_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Table> {
        let path = self.file_for(name);
        if !path.is_file() {
            return Err(LoadError::Config(format!(
                "snapshot file not found: {}",
                path.display()
            )));
        }

        let (schema, columns) = self.resolve_schema(&path)?;
        let reader = ReaderBuilder::new(schema)
            .with_format(Format::default().with_header(true))
            .with_batch_size(READ_BATCH_SIZE)
            .build(File::open(&path)?)?;

        let mut rows = Vec::new();
        for batch in reader {
            self.append_batch(&batch?, &columns, &mut rows);
        }

        debug!("{}: read {} rows from {}", name, rows.len(), path.display());
        Ok(Table::new(entity_name(name), columns).with_rows(rows))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, lines: &[&str]) {
        let mut f = File::create(dir.path().join(name)).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_load_infers_types() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "Users.csv",
            &[
                "Id,UserName,PerformanceTier,Score,IsAdmin,RegisterDate",
                "1,alice,2,1.5,true,01/05/2016",
                "2,bob,,2.25,false,not a date",
                "3,carol,1,,true,",
            ],
        );

        let source = CsvDirectory::new(dir.path());
        let table = source.load("Users").unwrap();

        assert_eq!(table.name, "Users");
        assert_eq!(table.row_count(), 3);
        let types: Vec<ColumnType> = table.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Int,
                ColumnType::Text,
                ColumnType::Int,
                ColumnType::Float,
                ColumnType::Bool,
                ColumnType::Timestamp
            ]
        );

        assert_eq!(table.rows[0][1], Value::Text("alice".into()));
        assert_eq!(table.rows[1][2], Value::Null);
        let expected = NaiveDate::from_ymd_opt(2016, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(table.rows[0][5], Value::Timestamp(expected));
        // unparseable and empty dates load as null
        assert_eq!(table.rows[1][5], Value::Null);
        assert_eq!(table.rows[2][5], Value::Null);
    }

    #[test]
    fn test_load_accepts_csv_suffix() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "Tags.csv", &["Id,ParentTagId", "1,", "2,1"]);
        let table = CsvDirectory::new(dir.path()).load("Tags.csv").unwrap();
        assert_eq!(table.name, "Tags");
        assert_eq!(table.rows[0][1], Value::Null);
        assert_eq!(table.rows[1][1], Value::Int(1));
    }

    #[test]
    fn test_timestamp_with_time() {
        let source = CsvDirectory::new("/unused");
        let ts = source.parse_timestamp("07/22/2019 18:03:41").unwrap();
        assert_eq!(ts.to_string(), "2019-07-22 18:03:41");
        assert!(source.parse_timestamp("2019-13-45").is_none());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = CsvDirectory::new(dir.path()).load("Kernels");
        assert!(matches!(result, Err(LoadError::Config(_))));
    }

    #[test]
    fn test_list_tables() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "Users.csv", &["Id", "1"]);
        write_file(&dir, "Kernels.csv", &["Id", "1"]);
        write_file(&dir, "notes.txt", &["ignored"]);
        let names = CsvDirectory::new(dir.path()).list_tables().unwrap();
        assert_eq!(names, vec!["Kernels", "Users"]);
    }
}
