//! Destination store operations.
//!
//! - [`postgres`]: PostgreSQL over a deadpool connection pool, COPY text writes
//! - [`memory`]: in-memory destination enforcing keys, used for dry runs and tests

pub mod memory;
pub mod postgres;

pub use memory::MemoryTarget;
pub use postgres::PgTarget;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

use crate::core::schema::Column;
use crate::core::value::{Row, Value};
use crate::download::{NotebookFilter, NotebookId};
use crate::error::Result;

/// Bulk write parameters.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Rows per COPY batch.
    pub batch_size: usize,
    /// Connections a single table's rows are sharded across.
    pub workers: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            workers: 1,
        }
    }
}

/// Single-column key retrofitted after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Primary,
    Unique,
}

impl KeyKind {
    pub fn sql(&self) -> &'static str {
        match self {
            KeyKind::Primary => "PRIMARY KEY",
            KeyKind::Unique => "UNIQUE",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            KeyKind::Primary => "pk",
            KeyKind::Unique => "uq",
        }
    }
}

/// Foreign key to add, in destination names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Trait for destination store operations.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create the schema if it doesn't exist.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Names of the tables already present in the schema.
    async fn existing_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Drop a table (and anything depending on it) if it exists.
    async fn drop_table(&self, schema: &str, table: &str) -> Result<()>;

    /// Create an empty table.
    async fn create_table(&self, schema: &str, table: &str, columns: &[Column]) -> Result<()>;

    /// Append rows. Either every row lands or the table is left empty and
    /// the error is returned.
    async fn write_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[Column],
        rows: &[Row],
        options: &WriteOptions,
    ) -> Result<u64>;

    /// Add a primary or unique key on one column.
    async fn add_key(
        &self,
        schema: &str,
        table: &str,
        kind: KeyKind,
        column: &str,
        name: &str,
    ) -> Result<()>;

    /// Add a foreign key.
    async fn add_foreign_key(&self, schema: &str, fk: &ForeignKeyDef) -> Result<()>;

    /// Owner, slug and version of every notebook matching the filter.
    async fn notebook_identifiers(
        &self,
        schema: &str,
        filter: &NotebookFilter,
    ) -> Result<Vec<NotebookId>>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// Append one row in COPY text format.
pub(crate) fn encode_copy_row(buf: &mut BytesMut, row: &Row) {
    for (j, value) in row.iter().enumerate() {
        if j > 0 {
            buf.put_u8(b'\t');
        }
        buf.extend_from_slice(value_to_copy_text(value).as_bytes());
    }
    buf.put_u8(b'\n');
}

/// Convert a value to COPY text.
fn value_to_copy_text(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(n) if n.is_nan() => "NaN".to_string(),
        Value::Float(n) if n.is_infinite() => {
            if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        }
        Value::Float(n) => n.to_string(),
        Value::Text(s) => escape_copy_text(s),
        Value::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    }
}

/// Escape special characters for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_text_escapes() {
        assert_eq!(escape_copy_text("a\tb\nc\\d\re"), "a\\tb\\nc\\\\d\\re");
    }

    #[test]
    fn test_encode_copy_row() {
        let mut buf = BytesMut::new();
        encode_copy_row(
            &mut buf,
            &vec![Value::Int(7), Value::Null, Value::from("x\ty"), Value::Bool(false)],
        );
        assert_eq!(&buf[..], b"7\t\\N\tx\\ty\tf\n");
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(value_to_copy_text(&Value::Float(f64::INFINITY)), "Infinity");
        assert_eq!(value_to_copy_text(&Value::Float(f64::NAN)), "NaN");
        assert_eq!(value_to_copy_text(&Value::Float(0.5)), "0.5");
    }

    #[test]
    fn test_key_kind() {
        assert_eq!(KeyKind::Primary.sql(), "PRIMARY KEY");
        assert_eq!(KeyKind::Unique.prefix(), "uq");
    }
}
