//! Type mapping from inferred CSV column types to PostgreSQL.

use arrow::datatypes::DataType;

use crate::core::schema::ColumnType;

/// Map an inferred Arrow type to a column type.
///
/// Anything the CSV reader infers beyond integers, floats and booleans is
/// loaded as text; date columns are recognized by name, not by inference.
pub fn arrow_to_column_type(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => ColumnType::Int,
        DataType::UInt64 | DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            ColumnType::Float
        }
        DataType::Boolean => ColumnType::Bool,
        _ => ColumnType::Text,
    }
}

/// Map a column type to its PostgreSQL column type.
pub fn column_type_to_postgres(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int => "bigint",
        ColumnType::Float => "double precision",
        ColumnType::Text => "text",
        ColumnType::Timestamp => "timestamp",
        ColumnType::Bool => "boolean",
    }
}
