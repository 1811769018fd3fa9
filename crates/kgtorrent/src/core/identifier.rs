//! Identifier validation, naming and quoting for the PostgreSQL destination.
//!
//! SQL identifiers (table, column, schema and constraint names) cannot be
//! passed as statement parameters. Every identifier that reaches dynamic SQL
//! goes through [`quote_pg`] or [`qualify_pg`], which validate and escape it.
//!
//! Entity names arrive from snapshot file names and the constraint
//! declaration file, so they are normalized here as well:
//! `Users.csv` is the entity `Users`, stored as the table `users`.

use crate::error::{LoadError, Result};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const PG_MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than PostgreSQL keeps.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoadError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > PG_MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            PG_MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Entity name for a snapshot file or declared table name (`Users.csv` -> `Users`).
pub fn entity_name(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.len().checked_sub(4) {
        Some(cut) if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".csv") => {
            trimmed[..cut].to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Destination table name for an entity (lower-cased, no file suffix).
pub fn destination_table_name(entity: &str) -> String {
    entity_name(entity).to_lowercase()
}

/// Build a constraint name, truncated to PostgreSQL's identifier limit on a
/// character boundary.
pub fn constraint_name(prefix: &str, table: &str, column: &str) -> String {
    let full = format!("{}_{}_{}", prefix, table, column).to_lowercase();
    truncate_identifier(&full)
}

fn truncate_identifier(name: &str) -> String {
    if name.len() <= PG_MAX_IDENTIFIER_LENGTH {
        return name.to_string();
    }
    let mut end = PG_MAX_IDENTIFIER_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("ForumMessageVotes").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("users\0; DROP TABLE x");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long = "a".repeat(PG_MAX_IDENTIFIER_LENGTH + 1);
        assert!(validate_identifier(&long).is_err());
        assert!(validate_identifier(&"a".repeat(PG_MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_quote_pg_escapes_double_quote() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_pg_sql_injection_safely_quoted() {
        let quoted = quote_pg("x\"; DROP TABLE users; --").unwrap();
        assert_eq!(quoted, "\"x\"\"; DROP TABLE users; --\"");
    }

    #[test]
    fn test_qualify_pg() {
        assert_eq!(qualify_pg("public", "users").unwrap(), "\"public\".\"users\"");
        assert!(qualify_pg("", "users").is_err());
        assert!(qualify_pg("public", "").is_err());
    }

    #[test]
    fn test_entity_name_strips_csv() {
        assert_eq!(entity_name("Users.csv"), "Users");
        assert_eq!(entity_name("Users.CSV"), "Users");
        assert_eq!(entity_name(" Kernels "), "Kernels");
        assert_eq!(entity_name("csv"), "csv");
    }

    #[test]
    fn test_destination_table_name() {
        assert_eq!(destination_table_name("KernelVersions.csv"), "kernelversions");
        assert_eq!(destination_table_name("Users"), "users");
    }

    #[test]
    fn test_constraint_name_truncates() {
        let name = constraint_name("fk", "ForumMessageVotes", &"X".repeat(80));
        assert_eq!(name.len(), PG_MAX_IDENTIFIER_LENGTH);
        assert!(name.starts_with("fk_forummessagevotes_x"));
        assert_eq!(constraint_name("pk", "Users", "Id"), "pk_users_id");
    }
}
