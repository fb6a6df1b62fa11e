//! Error types for the migration engine
//!
//! Every failure the engine reports is a [`MigrationError`]. Discovery problems with
//! individual files are logged and skipped instead, and orphaned ledger rows are reported
//! through status rather than raised.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Unsupported backend, missing or malformed version argument
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A migrations directory could not be enumerated at all
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A pending migration failed; nothing was recorded for it
    #[error("Failed to apply migration {version}: {message}")]
    Apply { version: String, message: String },

    /// A matched definition has no down script to undo it
    #[error("No down script found for migration {version}")]
    MissingDownScript { version: String },

    /// Rollback requested against a database without a ledger
    #[error("Migration ledger does not exist, nothing has been applied")]
    LedgerMissing,

    /// Connection or statement failure reported by the backend driver
    #[error("Execution error: {0}")]
    Execution(String),

    /// Statement exceeded the fixed execution timeout
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// A seed script failed
    #[error("Failed to execute seed {name}: {message}")]
    Seed { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        MigrationError::Configuration(message.into())
    }

    /// Whether this error was raised before anything touched the database
    pub fn is_configuration(&self) -> bool {
        matches!(self, MigrationError::Configuration(_))
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Execution(err.to_string())
    }
}

impl From<tiberius::error::Error> for MigrationError {
    fn from(err: tiberius::error::Error) -> Self {
        MigrationError::Execution(err.to_string())
    }
}
