//! Error types for the migration library.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection and pool failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when one or more tables or objects failed to migrate.
pub const EXIT_MIGRATION_ERROR: u8 = 3;
/// Exit code when a statement exceeded the command timeout.
pub const EXIT_TIMEOUT: u8 = 4;
/// Exit code when the run was cancelled.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A catalog query failed for a table.
    #[error("Introspection failed for table {table}: {message}")]
    Introspection { table: String, message: String },

    /// A descriptor could not be turned into DDL.
    #[error("Cannot translate {object}: {message}")]
    Translation { object: String, message: String },

    /// A page fetch or flush failed; remaining pages of the table were skipped.
    #[error("Copy failed for table {table}: {message}")]
    Copy { table: String, message: String },

    /// One or more units of work failed while the run itself completed.
    #[error("Migration finished with {0} failure(s)")]
    Incomplete(usize),

    /// A statement exceeded the configured command timeout.
    #[error("Command timed out after {seconds}s: {context}")]
    Timeout { seconds: u64, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Introspection error
    pub fn introspection(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Introspection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Translation error
    pub fn translation(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Translation {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a Copy error
    pub fn copy(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Copy {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Source(_) | MigrateError::Target(_) | MigrateError::Pool { .. } => {
                EXIT_CONNECTION_ERROR
            }
            MigrateError::Introspection { .. }
            | MigrateError::Translation { .. }
            | MigrateError::Copy { .. }
            | MigrateError::Incomplete(_) => EXIT_MIGRATION_ERROR,
            MigrateError::Timeout { .. } => EXIT_TIMEOUT,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
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

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Run one database command under the configured command timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, context: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::Timeout {
            seconds: timeout.as_secs(),
            context: context.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(MigrateError::pool("x", "y").exit_code(), EXIT_CONNECTION_ERROR);
        assert_eq!(MigrateError::copy("t", "x").exit_code(), EXIT_MIGRATION_ERROR);
        assert_eq!(MigrateError::Incomplete(2).exit_code(), EXIT_MIGRATION_ERROR);
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::copy("dbo.Orders", "insert rejected");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Copy failed for table dbo.Orders: insert rejected"));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_secs(5), "noop", async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_secs(1), "slow query", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        match result {
            Err(MigrateError::Timeout { seconds, context }) => {
                assert_eq!(seconds, 1);
                assert_eq!(context, "slow query");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
