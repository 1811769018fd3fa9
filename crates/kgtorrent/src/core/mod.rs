//! Core types shared by every stage of a load.
//!
//! - [`schema`]: tables, columns and column types
//! - [`value`]: typed cells and normalized keys
//! - [`identifier`]: entity naming and PostgreSQL identifier quoting

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{Column, ColumnType, Table};
pub use value::{KeyValue, Row, Value};
