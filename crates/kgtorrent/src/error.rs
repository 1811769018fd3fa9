//! Error types for the loader library.

use thiserror::Error;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, missing fields, malformed declarations, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Bulk write failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// The destination rejected a row that breaks a declared key or foreign key
    #[error("Constraint {constraint} violated on table {table}: {message}")]
    ConstraintViolation {
        table: String,
        constraint: String,
        message: String,
    },

    /// Snapshot parsing error (CSV reader, schema inference)
    #[error("Snapshot error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Notebook retrieval transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Run cancelled")]
    Cancelled,
}

impl LoadError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a ConstraintViolation error
    pub fn violation(
        table: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        LoadError::ConstraintViolation {
            table: table.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// 2 for configuration and snapshot problems, 3 for destination failures,
    /// 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Io(_) | LoadError::Arrow(_) | LoadError::Yaml(_) => 2,
            LoadError::Target(_)
            | LoadError::Pool { .. }
            | LoadError::Transfer { .. }
            | LoadError::ConstraintViolation { .. } => 3,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(LoadError::Config("missing".into()).exit_code(), 2);
        assert_eq!(LoadError::pool("down", "connect").exit_code(), 3);
        assert_eq!(LoadError::transfer("users", "copy failed").exit_code(), 3);
        assert_eq!(LoadError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = LoadError::transfer("kernels", "broken pipe");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Transfer failed for table kernels"));
    }

    #[test]
    fn test_format_detailed_walks_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "Users.csv");
        let err = LoadError::from(io);
        assert!(err.format_detailed().contains("Users.csv"));
    }
}
