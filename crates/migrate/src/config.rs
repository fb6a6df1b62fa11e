//! Migration engine configuration
//!
//! The literals the engine relies on (ledger table name, schema fallbacks, descriptions it
//! writes) live here as named defaults instead of being scattered through the backends.

use std::time::Duration;

/// Named defaults
pub mod defaults {
    use std::time::Duration;

    /// Ledger table name, created under the active schema
    pub const LEDGER_TABLE: &str = "__migrationhistory";
    /// PostgreSQL schema used when the descriptor does not name one
    pub const POSTGRES_SCHEMA: &str = "public";
    /// Administrative database used for PostgreSQL existence checks
    pub const POSTGRES_ADMIN_DATABASE: &str = "postgres";
    /// Schema the SQL Server ledger lives in
    pub const SQLSERVER_SCHEMA: &str = "dbo";
    /// Administrative database used for SQL Server existence checks
    pub const SQLSERVER_ADMIN_DATABASE: &str = "master";
    /// Per-call execution timeout, identical for every backend
    pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);
    /// Description recorded for baseline rows
    pub const BASELINE_DESCRIPTION: &str = "Baseline";
    /// Suffix appended to the description of orphaned ledger rows in status output
    pub const ORPHAN_SUFFIX: &str = " (ORPHANED - file not found)";
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Table name for tracking applied migrations
    pub ledger_table: String,
    /// Fallback PostgreSQL schema (search_path)
    pub postgres_schema: String,
    /// SQL Server ledger schema
    pub sqlserver_schema: String,
    /// Timeout applied to every script or statement execution
    pub execution_timeout: Duration,
    /// Description written by baseline
    pub baseline_description: String,
    /// Suffix appended to orphan descriptions in status output
    pub orphan_suffix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            ledger_table: defaults::LEDGER_TABLE.to_string(),
            postgres_schema: defaults::POSTGRES_SCHEMA.to_string(),
            sqlserver_schema: defaults::SQLSERVER_SCHEMA.to_string(),
            execution_timeout: defaults::EXECUTION_TIMEOUT,
            baseline_description: defaults::BASELINE_DESCRIPTION.to_string(),
            orphan_suffix: defaults::ORPHAN_SUFFIX.to_string(),
        }
    }
}

impl MigrationConfig {
    /// Set the ledger table name
    pub fn with_ledger_table<S: Into<String>>(mut self, table: S) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Set the fallback PostgreSQL schema
    pub fn with_postgres_schema<S: Into<String>>(mut self, schema: S) -> Self {
        self.postgres_schema = schema.into();
        self
    }

    /// Set the SQL Server ledger schema
    pub fn with_sqlserver_schema<S: Into<String>>(mut self, schema: S) -> Self {
        self.sqlserver_schema = schema.into();
        self
    }

    /// Set the execution timeout
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Description shown for an orphaned ledger row
    pub fn orphan_description(&self, description: &str) -> String {
        format!("{}{}", description, self.orphan_suffix)
    }
}
